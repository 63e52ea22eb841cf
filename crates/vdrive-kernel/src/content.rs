//! Serving file content over HTTP.
//!
//! [`ContentDelivery::deliver`] turns a [`Content`] into a response in one of
//! three ways:
//!
//! - **Redirect**: a public URL is answered with `302 Found`.
//! - **Proxy**: URLs that need credentials (or when the caller forces it) are
//!   fetched server-side and relayed.
//! - **Stream**: entries without a URL are streamed directly; seekable
//!   readers get range and conditional-request handling.

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Method, Response, StatusCode};
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::drive::{
    ByteReader, Content, ContentReader, ContentUrl, DriveError, DriveResult, SeekableReader,
};

const OCTET_STREAM: &str = "application/octet-stream";

/// Request headers never forwarded upstream by the proxy.
const STRIPPED_REQUEST_HEADERS: [HeaderName; 3] =
    [header::REFERER, header::AUTHORIZATION, header::HOST];

/// Connection-scoped headers that must not cross a proxy in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Format a timestamp as an RFC 1123 HTTP date.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an RFC 1123 HTTP date such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Outcome of interpreting a `Range` header against a known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    /// Serve the whole body.
    Full,
    /// Inclusive byte range.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Unsatisfiable;
    };
    // Multi-range requests are answered with the full body.
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return ByteRange::Unsatisfiable;
    };
    let (first, last) = (first.trim(), last.trim());

    if size == 0 {
        return ByteRange::Unsatisfiable;
    }
    if first.is_empty() {
        // Suffix range: the last N bytes.
        return match last.parse::<u64>() {
            Ok(n) if n > 0 => ByteRange::Partial {
                start: size.saturating_sub(n),
                end: size - 1,
            },
            _ => ByteRange::Unsatisfiable,
        };
    }
    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Unsatisfiable;
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return ByteRange::Unsatisfiable,
        }
    };
    ByteRange::Partial { start, end }
}

fn response(status: StatusCode, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

fn header_value(value: &str) -> DriveResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| DriveError::other(format!("invalid header value: {e}")))
}

/// Serves [`Content`] as HTTP responses.
#[derive(Debug, Clone)]
pub struct ContentDelivery {
    client: reqwest::Client,
}

impl ContentDelivery {
    /// Create a delivery helper with its own upstream client. The client never
    /// follows redirects, so upstream redirects reach the requester as-is.
    pub fn new() -> DriveResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DriveError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Answer `request` with the bytes of `content`.
    ///
    /// Errors other than `Unsupported` from [`Content::get_url`] propagate
    /// unchanged. Upstream proxy failures do not: they become a `502`.
    pub async fn deliver(
        &self,
        content: &dyn Content,
        request: &Parts,
        force_proxy: bool,
    ) -> DriveResult<Response<Body>> {
        match content.get_url().await {
            Ok(url) if force_proxy || url.requires_proxy() => Ok(self.proxy(&url, request).await),
            Ok(url) => {
                tracing::debug!(path = %content.path(), "redirecting to content url");
                let mut resp = response(StatusCode::FOUND, Body::empty());
                resp.headers_mut()
                    .insert(header::LOCATION, header_value(&url.url)?);
                Ok(resp)
            }
            Err(e) if e.is_unsupported() => match content.get_reader().await? {
                ContentReader::Seekable(reader) => serve_seekable(content, request, reader).await,
                ContentReader::Stream(reader) => serve_stream(content, request, reader),
            },
            Err(e) => Err(e),
        }
    }

    async fn proxy(&self, url: &ContentUrl, request: &Parts) -> Response<Body> {
        let mut headers = request.headers.clone();
        for name in &STRIPPED_REQUEST_HEADERS {
            headers.remove(name);
        }
        strip_hop_by_hop(&mut headers);
        for (name, value) in &url.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid upstream header"),
            }
        }

        let upstream = self
            .client
            .request(request.method.clone(), &url.url)
            .headers(headers)
            .send()
            .await;
        let upstream = match upstream {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(url = %url.url, error = %e, "content proxy request failed");
                return response(StatusCode::BAD_GATEWAY, Body::empty());
            }
        };

        tracing::debug!(url = %url.url, status = %upstream.status(), "proxying content");
        let status = upstream.status();
        let mut relayed = upstream.headers().clone();
        strip_hop_by_hop(&mut relayed);
        let body = if request.method == Method::HEAD {
            Body::empty()
        } else {
            Body::from_stream(upstream.bytes_stream())
        };
        let mut resp = response(status, body);
        *resp.headers_mut() = relayed;
        resp
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers.keys().filter(|n| is_hop_by_hop(n)).cloned().collect();
    for name in doomed {
        headers.remove(name);
    }
}

fn serve_stream(
    content: &dyn Content,
    request: &Parts,
    reader: ByteReader,
) -> DriveResult<Response<Body>> {
    let body = if request.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(reader))
    };
    let mut resp = response(StatusCode::OK, body);
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    if content.size() >= 0 {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.size()));
    }
    Ok(resp)
}

async fn serve_seekable(
    content: &dyn Content,
    request: &Parts,
    mut reader: Box<dyn SeekableReader>,
) -> DriveResult<Response<Body>> {
    let size = reader.seek(SeekFrom::End(0)).await?;
    let modified = DateTime::<Utc>::from_timestamp_millis(content.mod_time());
    let last_modified = modified.map(format_http_date);

    let request_date = |name: HeaderName| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
    };

    if let Some(modified) = modified {
        // HTTP dates have second precision.
        let modified_secs = modified.timestamp();
        if let Some(limit) = request_date(header::IF_UNMODIFIED_SINCE) {
            if modified_secs > limit.timestamp() {
                return Ok(response(StatusCode::PRECONDITION_FAILED, Body::empty()));
            }
        }
        let cacheable = request.method == Method::GET || request.method == Method::HEAD;
        if cacheable && !request.headers.contains_key(header::IF_NONE_MATCH) {
            if let Some(since) = request_date(header::IF_MODIFIED_SINCE) {
                if modified_secs <= since.timestamp() {
                    let mut resp = response(StatusCode::NOT_MODIFIED, Body::empty());
                    if let Some(lm) = &last_modified {
                        resp.headers_mut()
                            .insert(header::LAST_MODIFIED, header_value(lm)?);
                    }
                    return Ok(resp);
                }
            }
        }
    }

    let range = match request.headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => parse_range(value, size),
        None => ByteRange::Full,
    };
    let (status, start, len) = match range {
        ByteRange::Full => (StatusCode::OK, 0, size),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        ByteRange::Unsatisfiable => {
            let mut resp = response(StatusCode::RANGE_NOT_SATISFIABLE, Body::empty());
            resp.headers_mut()
                .insert(header::CONTENT_RANGE, header_value(&format!("bytes */{size}"))?);
            return Ok(resp);
        }
    };

    let body = if request.method == Method::HEAD {
        Body::empty()
    } else {
        reader.seek(SeekFrom::Start(start)).await?;
        Body::from_stream(ReaderStream::new(reader.take(len)))
    };

    let mut resp = response(status, body);
    let headers = resp.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Some(lm) = &last_modified {
        headers.insert(header::LAST_MODIFIED, header_value(lm)?);
    }
    if status == StatusCode::PARTIAL_CONTENT {
        let end = start + len - 1;
        headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{size}"))?,
        );
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{Drive, DriveRef, DriveResult, Entry, EntryMeta, EntryType, MemoryDrive};
    use crate::task::dummy_context;
    use axum::http::Request;
    use std::any::Any;
    use std::sync::Arc;

    fn parts(method: &str, headers: &[(HeaderName, &str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri("/content");
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn memory_file(data: &'static [u8]) -> (Arc<MemoryDrive>, Arc<dyn Entry>) {
        let drive = MemoryDrive::new();
        let entry = drive
            .save("/file.bin", data.len() as i64, false, Box::new(data), dummy_context())
            .await
            .unwrap();
        (drive, entry)
    }

    /// Content with a fixed URL answer and a non-seekable stream.
    #[derive(Debug)]
    struct Remote {
        url: Option<ContentUrl>,
        data: &'static [u8],
        drive: DriveRef,
    }

    impl Entry for Remote {
        fn path(&self) -> &str {
            "/remote.bin"
        }
        fn entry_type(&self) -> EntryType {
            EntryType::File
        }
        fn size(&self) -> i64 {
            self.data.len() as i64
        }
        fn mod_time(&self) -> i64 {
            0
        }
        fn meta(&self) -> EntryMeta {
            EntryMeta::read_write()
        }
        fn drive(&self) -> DriveResult<Arc<dyn Drive>> {
            self.drive.get()
        }
        fn content(&self) -> Option<&dyn Content> {
            Some(self)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[async_trait::async_trait]
    impl Content for Remote {
        async fn get_url(&self) -> DriveResult<ContentUrl> {
            self.url.clone().ok_or(DriveError::Unsupported)
        }
        async fn get_reader(&self) -> DriveResult<ContentReader> {
            Ok(ContentReader::Stream(Box::new(self.data)))
        }
    }

    fn remote(url: Option<ContentUrl>) -> (Arc<MemoryDrive>, Remote) {
        let drive = MemoryDrive::new();
        let drive_dyn: Arc<dyn Drive> = drive.clone();
        let entry = Remote {
            url,
            data: b"streamed bytes",
            drive: DriveRef::from_arc(&drive_dyn),
        };
        (drive, entry)
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-3", 10), ByteRange::Partial { start: 0, end: 3 });
        assert_eq!(parse_range("bytes=5-", 10), ByteRange::Partial { start: 5, end: 9 });
        assert_eq!(parse_range("bytes=-4", 10), ByteRange::Partial { start: 6, end: 9 });
        assert_eq!(parse_range("bytes=-40", 10), ByteRange::Partial { start: 0, end: 9 });
        assert_eq!(parse_range("bytes=8-100", 10), ByteRange::Partial { start: 8, end: 9 });
        assert_eq!(parse_range("bytes=0-1,4-5", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=4-2", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("items=0-1", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), ByteRange::Unsatisfiable);
    }

    #[test]
    fn test_http_date_round_trip() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed.timestamp(), 784_111_777);
        assert_eq!(format_http_date(parsed), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_http_date("yesterday").is_none());
    }

    #[tokio::test]
    async fn test_full_and_partial_response() {
        let (_drive, entry) = memory_file(b"0123456789").await;
        let delivery = ContentDelivery::new().unwrap();
        let content = entry.content().unwrap();

        let resp = delivery.deliver(content, &parts("GET", &[]), false).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "10");
        assert!(resp.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_bytes(resp).await, b"0123456789");

        let resp = delivery
            .deliver(content, &parts("GET", &[(header::RANGE, "bytes=2-5")]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(body_bytes(resp).await, b"2345");

        let resp = delivery
            .deliver(content, &parts("GET", &[(header::RANGE, "bytes=20-")]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_conditional_requests() {
        let (_drive, entry) = memory_file(b"abc").await;
        let delivery = ContentDelivery::new().unwrap();
        let content = entry.content().unwrap();

        let future = "Fri, 01 Jan 2100 00:00:00 GMT";
        let past = "Thu, 01 Jan 1970 00:00:00 GMT";

        let resp = delivery
            .deliver(content, &parts("GET", &[(header::IF_MODIFIED_SINCE, future)]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        let resp = delivery
            .deliver(content, &parts("GET", &[(header::IF_MODIFIED_SINCE, past)]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = delivery
            .deliver(content, &parts("GET", &[(header::IF_UNMODIFIED_SINCE, past)]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_head_has_headers_but_no_body() {
        let (_drive, entry) = memory_file(b"abcdef").await;
        let delivery = ContentDelivery::new().unwrap();
        let resp = delivery
            .deliver(entry.content().unwrap(), &parts("HEAD", &[]), false)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "6");
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_plain_stream_sets_length() {
        let (_drive, entry) = remote(None);
        let delivery = ContentDelivery::new().unwrap();

        let resp = delivery.deliver(&entry, &parts("GET", &[]), false).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "14");
        assert!(!resp.headers().contains_key(header::ACCEPT_RANGES));
        assert_eq!(body_bytes(resp).await, b"streamed bytes");

        let resp = delivery.deliver(&entry, &parts("HEAD", &[]), false).await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "14");
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_public_url_redirects() {
        let (_drive, entry) = remote(Some(ContentUrl::public("https://cdn.example.com/f")));
        let delivery = ContentDelivery::new().unwrap();
        let resp = delivery.deliver(&entry, &parts("GET", &[]), false).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "https://cdn.example.com/f");
    }

    #[tokio::test]
    async fn test_proxy_injects_and_strips_headers() {
        use axum::routing::get;

        let app = axum::Router::new().route(
            "/blob",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let referer = headers.contains_key(header::REFERER);
                format!("auth={auth};referer={referer}")
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = ContentUrl::public(format!("http://{addr}/blob"))
            .with_header("Authorization", "Basic dXNlcg==");
        let (_drive, entry) = remote(Some(url));
        let delivery = ContentDelivery::new().unwrap();
        let request = parts(
            "GET",
            &[
                (header::AUTHORIZATION, "Bearer client-token"),
                (header::REFERER, "https://elsewhere.example"),
            ],
        );
        let resp = delivery.deliver(&entry, &request, false).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"auth=Basic dXNlcg==;referer=false");
    }

    #[tokio::test]
    async fn test_proxy_failure_is_bad_gateway() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_drive, entry) = remote(Some(ContentUrl::proxied(format!("http://{addr}/gone"))));
        let delivery = ContentDelivery::new().unwrap();
        let resp = delivery.deliver(&entry, &parts("GET", &[]), false).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_other_url_errors_propagate() {
        #[derive(Debug)]
        struct Broken(DriveRef);

        impl Entry for Broken {
            fn path(&self) -> &str {
                "/broken"
            }
            fn entry_type(&self) -> EntryType {
                EntryType::File
            }
            fn size(&self) -> i64 {
                1
            }
            fn mod_time(&self) -> i64 {
                0
            }
            fn meta(&self) -> EntryMeta {
                EntryMeta::read_write()
            }
            fn drive(&self) -> DriveResult<Arc<dyn Drive>> {
                self.0.get()
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        #[async_trait::async_trait]
        impl Content for Broken {
            async fn get_url(&self) -> DriveResult<ContentUrl> {
                Err(DriveError::not_found("/broken"))
            }
            async fn get_reader(&self) -> DriveResult<ContentReader> {
                Err(DriveError::Unsupported)
            }
        }

        let drive: Arc<dyn Drive> = MemoryDrive::new();
        let entry = Broken(DriveRef::from_arc(&drive));
        let delivery = ContentDelivery::new().unwrap();
        let err = delivery.deliver(&entry, &parts("GET", &[]), false).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
