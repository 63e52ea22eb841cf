//! Shared harness: an in-process WebDAV server and axum stub servers.

#![allow(dead_code)]

use dav_server::{DavHandler, fakels::FakeLs, memfs::MemFs};
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use vdrive_kernel::drive::{Drive, Entry};
use vdrive_kernel::task::dummy_context;
use vdrive_webdav::{WebDavConfig, WebDavDrive};

/// A running server. Aborted on drop.
pub struct TestServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a `dav-server` backed by an empty `MemFs`, mounted under `prefix`
/// (`""` for the host root).
pub async fn start_dav_server(prefix: &str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut builder = DavHandler::builder()
        .filesystem(MemFs::new())
        .locksystem(FakeLs::new());
    if !prefix.is_empty() {
        builder = builder.strip_prefix(prefix);
    }
    let handler = Arc::new(builder.build_handler());

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle(req).await) }
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    TestServer {
        url: format!("http://{addr}{prefix}/"),
        handle,
    }
}

/// Serve an axum router on an ephemeral port.
pub async fn start_stub(router: axum::Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    TestServer {
        url: format!("http://{addr}/"),
        handle,
    }
}

pub async fn connect(server: &TestServer) -> Arc<WebDavDrive> {
    WebDavDrive::new(WebDavConfig::new(&server.url).unwrap())
        .await
        .unwrap()
}

pub async fn connect_cached(server: &TestServer, ttl: Duration) -> Arc<WebDavDrive> {
    WebDavDrive::new(WebDavConfig::new(&server.url).unwrap().with_cache_ttl(ttl))
        .await
        .unwrap()
}

pub async fn put(drive: &dyn Drive, path: &str, data: &'static [u8]) -> Arc<dyn Entry> {
    drive
        .save(path, data.len() as i64, true, Box::new(data), dummy_context())
        .await
        .unwrap()
}

pub async fn read(drive: &dyn Drive, path: &str) -> Vec<u8> {
    let entry = drive.get(path).await.unwrap();
    let mut reader = entry
        .content()
        .unwrap()
        .get_reader()
        .await
        .unwrap()
        .into_reader();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

pub fn names(entries: &[Arc<dyn Entry>]) -> Vec<String> {
    let mut names: Vec<String> = entries.iter().map(|e| e.name()).collect();
    names.sort();
    names
}

/// A `207 Multi-Status` body. Each item is `(href, is_collection, size)`.
pub fn multistatus(items: &[(&str, bool, i64)]) -> String {
    let mut body =
        String::from(r#"<?xml version="1.0" encoding="utf-8"?><D:multistatus xmlns:D="DAV:">"#);
    for (href, collection, size) in items {
        let resourcetype = if *collection {
            "<D:resourcetype><D:collection/></D:resourcetype>"
        } else {
            "<D:resourcetype/>"
        };
        body.push_str(&format!(
            "<D:response><D:href>{href}</D:href><D:propstat><D:prop>\
             <D:getlastmodified>Sun, 06 Nov 1994 08:49:37 GMT</D:getlastmodified>\
             <D:getcontentlength>{size}</D:getcontentlength>{resourcetype}\
             </D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>"
        ));
    }
    body.push_str("</D:multistatus>");
    body
}
