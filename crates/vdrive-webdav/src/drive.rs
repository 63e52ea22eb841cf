//! The WebDAV [`Drive`].
//!
//! Every lookup is a `PROPFIND` against the share, so entries and listings
//! go through the kernel's [`DriveCache`] when a TTL is configured. Mutations
//! evict what they touch and then re-read the result from the server.

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use futures::channel::mpsc;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use url::Url;

use vdrive_kernel::cache::{DriveCache, EntryFactory, new_drive_cache};
use vdrive_kernel::content::parse_http_date;
use vdrive_kernel::copy::{COPY_BUFFER_SIZE, ProgressReader, TransferMode};
use vdrive_kernel::drive::{
    ByteReader, Drive, DriveConfig, DriveError, DriveMeta, DriveResult, Entry, EntryRecord,
    EntryType, UNKNOWN_SIZE, unwrap_entry,
};
use vdrive_kernel::i18n::t;
use vdrive_kernel::path::{clean_path, path_depth, path_parent};
use vdrive_kernel::task::{TaskCtx, cancelable};

use crate::client::{RequestError, WebDavClient};
use crate::config::WebDavConfig;
use crate::entry::WebDavEntry;
use crate::multistatus::{PropfindResponse, parse_multistatus};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
    <D:getlastmodified/>
    <D:getetag/>
  </D:prop>
</D:propfind>"#;

/// Chunks buffered between the reader and an in-flight `PUT`.
const UPLOAD_QUEUE_DEPTH: usize = 4;

/// Percent-decode an `href`, reducing absolute URLs to their path.
fn decode_href(href: &str) -> String {
    let raw = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.clone(),
    }
}

/// Drive backed by a remote WebDAV share.
pub struct WebDavDrive {
    client: WebDavClient,
    /// Decoded path of the share root, without trailing slash.
    path_prefix: String,
    cache: Arc<dyn DriveCache>,
    cache_ttl: Duration,
    this: Weak<WebDavDrive>,
}

impl std::fmt::Debug for WebDavDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavDrive")
            .field("prefix", &self.path_prefix)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl WebDavDrive {
    /// Connect to the share. The root is probed once so that a wrong URL or
    /// bad credentials fail here instead of on first use.
    pub async fn new(config: WebDavConfig) -> DriveResult<Arc<Self>> {
        let client = WebDavClient::new(&config)?;
        let path_prefix = decode_href(config.path_prefix())
            .trim_end_matches('/')
            .to_string();
        let cache_ttl = config.cache_ttl;

        let drive = Arc::new_cyclic(|this: &Weak<Self>| {
            let owner = this.clone();
            let factory: EntryFactory =
                Arc::new(move |record: EntryRecord| -> DriveResult<Arc<dyn Entry>> {
                    Ok(Arc::new(WebDavEntry::from_record(record, owner.clone())))
                });
            Self {
                client,
                path_prefix,
                cache: new_drive_cache(cache_ttl, factory),
                cache_ttl: cache_ttl.unwrap_or_default(),
                this: this.clone(),
            }
        });

        drive.get("/").await?;
        tracing::info!(url = %config.url, cache_ttl = ?cache_ttl, "webdav drive connected");
        Ok(drive)
    }

    /// Build from flat drive parameters, see
    /// [`WebDavConfig::from_drive_config`].
    pub async fn from_drive_config(config: &DriveConfig) -> DriveResult<Arc<Self>> {
        Self::new(WebDavConfig::from_drive_config(config)?).await
    }

    pub(crate) fn client(&self) -> &WebDavClient {
        &self.client
    }

    /// Drive path of a decoded `href`.
    fn relative_path(&self, decoded_href: &str) -> String {
        let relative = decoded_href
            .strip_prefix(self.path_prefix.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(decoded_href);
        clean_path(relative)
    }

    fn entry_from_response(&self, response: &PropfindResponse) -> WebDavEntry {
        let path = self.relative_path(&decode_href(&response.href));
        let mod_time = response
            .last_modified
            .as_deref()
            .and_then(parse_http_date)
            .map(|time| time.timestamp_millis())
            .unwrap_or(0);
        let (entry_type, size) = if response.is_collection {
            (EntryType::Dir, UNKNOWN_SIZE)
        } else {
            (EntryType::File, response.size)
        };
        WebDavEntry {
            path,
            entry_type,
            size,
            mod_time,
            drive: self.this.clone(),
        }
    }

    async fn propfind(&self, path: &str, depth: u8) -> DriveResult<Vec<PropfindResponse>> {
        let headers = [
            ("Depth", depth.to_string()),
            ("Content-Type", "application/xml; charset=utf-8".to_string()),
        ];
        let response = self
            .client
            .send("PROPFIND", path, &headers, Some(PROPFIND_BODY.into()))
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| DriveError::other(format!("PROPFIND {path}: {e}")))?;
        parse_multistatus(&body)
    }

    /// Stream `reader` as the body of a `PUT`.
    async fn put(
        &self,
        path: &str,
        size: i64,
        reader: ByteReader,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        let (mut tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_QUEUE_DEPTH);
        let mut headers: Vec<(&str, String)> = Vec::new();
        if size >= 0 {
            headers.push(("Content-Length", size.to_string()));
        }
        let request = self
            .client
            .send("PUT", path, &headers, Some(reqwest::Body::wrap_stream(rx)));

        let pump = async move {
            let mut chunks =
                ReaderStream::with_capacity(ProgressReader::new(reader, ctx), COPY_BUFFER_SIZE);
            while let Some(chunk) = chunks.next().await {
                if ctx.canceled() {
                    let _ = tx.send(Err(io::Error::other("upload canceled"))).await;
                    return Err(DriveError::Canceled);
                }
                match chunk {
                    Ok(bytes) => {
                        // The request ended early; its own result says why.
                        if tx.send(Ok(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                        return Err(DriveError::Io(e));
                    }
                }
            }
            Ok(())
        };

        cancelable(ctx, async {
            let (sent, pumped) = tokio::join!(request, pump);
            pumped?;
            sent?;
            Ok::<_, DriveError>(())
        })
        .await
    }

    /// Resolve `from` to a file entry of this very drive.
    fn own_file(&self, from: Arc<dyn Entry>) -> Option<Arc<dyn Entry>> {
        unwrap_entry(from, |e| {
            e.as_any()
                .downcast_ref::<WebDavEntry>()
                .is_some_and(|w| w.belongs_to(&self.this) && w.entry_type.is_file())
        })
    }

    async fn server_side(
        &self,
        mode: TransferMode,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        let Some(source) = self.own_file(from) else {
            return Err(DriveError::Unsupported);
        };
        let from_path = source.path().to_string();
        let to = clean_path(to);
        let method = match mode {
            TransferMode::Copy => "COPY",
            TransferMode::Move => "MOVE",
        };

        let mut headers = vec![("Destination", self.client.build_url(&to).to_string())];
        if !override_allowed {
            headers.push(("Overwrite", "F".to_string()));
        }
        let sent = cancelable(ctx, async {
            Ok::<_, DriveError>(self.client.send(method, &from_path, &headers, None).await)
        })
        .await?;

        let moved = match sent {
            Ok(_) => true,
            Err(RequestError::PreconditionFailed) if !override_allowed => {
                tracing::debug!(
                    method,
                    from = %from_path,
                    to = %to,
                    "destination exists, left untouched"
                );
                false
            }
            Err(e) => return Err(e.into()),
        };

        self.cache.evict(&to, true);
        self.cache.evict(&path_parent(&to), false);
        if mode == TransferMode::Move {
            self.cache.evict(&from_path, true);
            self.cache.evict(&path_parent(&from_path), false);
        }
        if moved && source.size() > 0 {
            ctx.progress(source.size(), false);
        }
        self.get(&to).await
    }
}

#[async_trait]
impl Drive for WebDavDrive {
    fn meta(&self) -> DriveMeta {
        DriveMeta { can_write: true }
    }

    async fn get(&self, path: &str) -> DriveResult<Arc<dyn Entry>> {
        let path = clean_path(path);
        if let Some(entry) = self.cache.get_entry(&path) {
            return Ok(entry);
        }
        let responses = self.propfind(&path, 0).await?;
        let Some(response) = responses.first() else {
            return Err(DriveError::not_found(path));
        };
        let mut entry = self.entry_from_response(response);
        // Servers disagree on href spelling; the requested path is canonical.
        entry.path = path;
        self.cache.put_entry(&entry, self.cache_ttl);
        Ok(Arc::new(entry))
    }

    async fn list(&self, path: &str) -> DriveResult<Vec<Arc<dyn Entry>>> {
        let path = clean_path(path);
        if let Some(children) = self.cache.get_children(&path) {
            return Ok(children);
        }
        let responses = self.propfind(&path, 1).await?;

        let own_depth = path_depth(&self.path_prefix) + path_depth(&path);
        let mut children: Vec<Arc<dyn Entry>> = Vec::with_capacity(responses.len());
        for response in &responses {
            if path_depth(&decode_href(&response.href)) > own_depth {
                children.push(Arc::new(self.entry_from_response(response)));
            } else if !response.is_collection {
                return Err(DriveError::not_allowed_paths(
                    t("drive.not_a_dir", &[path.as_str()]),
                    [&path],
                ));
            }
        }
        self.cache.put_children(&path, &children, self.cache_ttl);
        Ok(children)
    }

    async fn save(
        &self,
        path: &str,
        size: i64,
        override_allowed: bool,
        reader: ByteReader,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        let path = clean_path(path);
        if !override_allowed {
            match self.get(&path).await {
                Ok(_) => {
                    return Err(DriveError::not_allowed_paths(t("drive.file_exists", &[]), [&path]));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        self.put(&path, size, reader, ctx).await?;
        self.cache.evict(&path, false);
        self.cache.evict(&path_parent(&path), false);
        self.get(&path).await
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Arc<dyn Entry>> {
        let path = clean_path(path);
        match self.client.send("MKCOL", &path, &[], None).await {
            Ok(_) => {}
            // 405: something already lives there.
            Err(RequestError::Drive(DriveError::RemoteApi { status: 405, .. })) => {
                self.cache.evict(&path, false);
                let existing = self.get(&path).await?;
                if existing.entry_type().is_dir() {
                    return Ok(existing);
                }
                return Err(DriveError::not_allowed_paths(t("drive.file_exists", &[]), [&path]));
            }
            Err(e) => return Err(e.into()),
        }
        self.cache.evict(&path, false);
        self.cache.evict(&path_parent(&path), false);
        self.get(&path).await
    }

    async fn copy(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.server_side(TransferMode::Copy, from, to, override_allowed, ctx)
            .await
    }

    async fn move_entry(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.server_side(TransferMode::Move, from, to, override_allowed, ctx)
            .await
    }

    async fn delete(&self, path: &str, ctx: &dyn TaskCtx) -> DriveResult<()> {
        ctx.check_canceled()?;
        let path = clean_path(path);
        if path == "/" {
            return Err(DriveError::not_allowed_paths(t("drive.root_protected", &[]), [path]));
        }
        self.client.send("DELETE", &path, &[], None).await?;
        self.cache.evict(&path, true);
        self.cache.evict(&path_parent(&path), false);
        Ok(())
    }
}
