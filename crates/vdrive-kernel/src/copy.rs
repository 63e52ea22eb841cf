//! Recursive copy/move engine and byte-stream helpers.
//!
//! A transfer runs in two phases:
//!
//! 1. [`build_entries_tree`] lists the whole source once, accumulating the
//!    expected total on the task context.
//! 2. [`copy_all`] walks that tree depth-first, creating directories, probing
//!    destinations and delegating each file to a [`CopyHandler`].
//!
//! The walk is sequential. Cancellation is polled once per node and once per
//! I/O chunk; bytes already written are not rolled back.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::task::{Context, Poll};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::io::StreamReader;

use crate::drive::{
    ByteReader, Content, ContentUrl, Drive, DriveError, DriveResult, Entry, EntryType,
};
use crate::i18n::t;
use crate::path::{clean_path, join_path};
use crate::task::TaskCtx;

/// Chunk size for stream copies. Cancellation is polled once per chunk.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// One source entry plus its children, in listing order.
#[derive(Debug, Clone)]
pub struct EntryNode {
    pub entry: Arc<dyn Entry>,
    pub children: Vec<EntryNode>,
}

impl EntryNode {
    pub fn is_dir(&self) -> bool {
        self.entry.entry_type().is_dir()
    }
}

/// List `root` recursively into an [`EntryNode`] tree.
///
/// With `track_bytes`, every file adds its size to the context total;
/// otherwise every entry adds one. Any listing failure aborts the build.
pub async fn build_entries_tree(
    root: Arc<dyn Entry>,
    ctx: &dyn TaskCtx,
    track_bytes: bool,
) -> DriveResult<EntryNode> {
    build_node(root, ctx, track_bytes).await
}

fn build_node<'a>(
    entry: Arc<dyn Entry>,
    ctx: &'a dyn TaskCtx,
    track_bytes: bool,
) -> BoxFuture<'a, DriveResult<EntryNode>> {
    async move {
        ctx.check_canceled()?;
        if track_bytes {
            if entry.entry_type().is_file() {
                ctx.total(entry.size(), false);
            }
        } else {
            ctx.total(1, false);
        }
        if entry.entry_type().is_file() {
            return Ok(EntryNode {
                entry,
                children: Vec::new(),
            });
        }

        let listed = entry.drive()?.list(entry.path()).await?;
        let mut children = Vec::with_capacity(listed.len());
        for child in listed {
            children.push(build_node(child, ctx, track_bytes).await?);
        }
        Ok(EntryNode { entry, children })
    }
    .boxed()
}

/// Pre-order flattening of a tree.
pub fn flatten_entries_tree(root: &EntryNode) -> Vec<&EntryNode> {
    fn walk<'a>(node: &'a EntryNode, out: &mut Vec<&'a EntryNode>) {
        out.push(node);
        for child in &node.children {
            walk(child, out);
        }
    }
    let mut out = Vec::new();
    walk(root, &mut out);
    out
}

/// Per-file primitive and per-node hook for [`copy_all`].
#[async_trait]
pub trait CopyHandler: Send + Sync {
    /// Copy one file. The walk has already decided that `to` may be
    /// written (it is absent, or overwriting was requested).
    async fn copy_file(
        &self,
        from: Arc<dyn Entry>,
        drive_to: &dyn Drive,
        to: &str,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()>;

    /// Called once per node after it was handled. `all_processed` is false
    /// for skipped files and for directories with any skipped descendant.
    async fn after(
        &self,
        node: &EntryNode,
        all_processed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        let _ = (node, all_processed, ctx);
        Ok(())
    }
}

/// Apply a tree onto `drive_to` at `to`.
///
/// Existing directories are merged. Existing files are skipped unless
/// `override_allowed`. A directory landing on a file, or a file landing on a
/// directory, fails with `NotAllowed` naming both paths.
pub async fn copy_all(
    tree: &EntryNode,
    drive_to: &dyn Drive,
    to: &str,
    override_allowed: bool,
    ctx: &dyn TaskCtx,
    handler: &dyn CopyHandler,
) -> DriveResult<()> {
    let walk = Walk {
        drive_to,
        override_allowed,
        ctx,
        handler,
    };
    walk.apply(tree, clean_path(to), false).await?;
    Ok(())
}

struct Walk<'a> {
    drive_to: &'a dyn Drive,
    override_allowed: bool,
    ctx: &'a dyn TaskCtx,
    handler: &'a dyn CopyHandler,
}

impl Walk<'_> {
    /// Returns whether `node` and everything under it was processed.
    ///
    /// `fresh_parent` means the parent directory was created by this walk,
    /// so the destination cannot exist yet and the probe is skipped.
    fn apply<'b>(
        &'b self,
        node: &'b EntryNode,
        to: String,
        fresh_parent: bool,
    ) -> BoxFuture<'b, DriveResult<bool>> {
        async move {
            self.ctx.check_canceled()?;

            let existing: Option<EntryType> = if fresh_parent {
                None
            } else {
                match self.drive_to.get(&to).await {
                    Ok(dst) => Some(dst.entry_type()),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                }
            };
            let src = node.entry.path();

            let mut all_processed = true;
            match node.entry.entry_type() {
                EntryType::Dir => {
                    let created = match existing {
                        Some(EntryType::File) => {
                            return Err(DriveError::not_allowed_paths(
                                t("drive.copy_type_mismatch1", &[src, to.as_str()]),
                                [src, to.as_str()],
                            ));
                        }
                        Some(EntryType::Dir) => false,
                        None => {
                            self.drive_to.make_dir(&to).await?;
                            true
                        }
                    };
                    for child in &node.children {
                        let child_to = join_path(&to, &child.entry.name());
                        if !self.apply(child, child_to, created).await? {
                            all_processed = false;
                        }
                    }
                }
                EntryType::File => match existing {
                    Some(EntryType::Dir) => {
                        return Err(DriveError::not_allowed_paths(
                            t("drive.copy_type_mismatch2", &[src, to.as_str()]),
                            [src, to.as_str()],
                        ));
                    }
                    Some(EntryType::File) if !self.override_allowed => {
                        tracing::debug!(from = %src, to = %to, "destination exists, skipping");
                        all_processed = false;
                    }
                    _ => {
                        self.handler
                            .copy_file(node.entry.clone(), self.drive_to, &to, self.ctx)
                            .await?;
                    }
                },
            }

            self.handler.after(node, all_processed, self.ctx).await?;
            Ok(all_processed)
        }
        .boxed()
    }
}

/// Whether a transfer leaves the source in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

/// The standard [`CopyHandler`].
///
/// Tries the destination drive's server-side copy or move first and falls
/// back to [`copy_entry`] when the drive answers `Unsupported`. In
/// [`TransferMode::Move`], every fully processed source node is deleted
/// afterwards.
#[derive(Debug, Clone)]
pub struct TransferHandler {
    mode: TransferMode,
    temp_dir: PathBuf,
}

impl TransferHandler {
    pub fn new(mode: TransferMode, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }
}

#[async_trait]
impl CopyHandler for TransferHandler {
    async fn copy_file(
        &self,
        from: Arc<dyn Entry>,
        drive_to: &dyn Drive,
        to: &str,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        let server_side = match self.mode {
            TransferMode::Copy => drive_to.copy(from.clone(), to, true, ctx).await,
            TransferMode::Move => drive_to.move_entry(from.clone(), to, true, ctx).await,
        };
        match server_side {
            Ok(_) => Ok(()),
            Err(e) if e.is_unsupported() => {
                copy_entry(from.as_ref(), drive_to, to, true, ctx, &self.temp_dir).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn after(
        &self,
        node: &EntryNode,
        all_processed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        if self.mode != TransferMode::Move || !all_processed {
            return Ok(());
        }
        let source = node.entry.drive()?;
        match source.delete(node.entry.path(), ctx).await {
            // Already gone after a server-side move.
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Copy or move `src` (file or directory tree) to `to` on `drive_to`.
pub async fn transfer(
    src: Arc<dyn Entry>,
    drive_to: &dyn Drive,
    to: &str,
    override_allowed: bool,
    mode: TransferMode,
    ctx: &dyn TaskCtx,
    temp_dir: &Path,
) -> DriveResult<()> {
    let tree = build_entries_tree(src, ctx, true).await?;
    let handler = TransferHandler::new(mode, temp_dir);
    copy_all(&tree, drive_to, to, override_allowed, ctx, &handler).await
}

/// Copy one file by streaming its content through a temp file into
/// `drive_to.save`.
///
/// The temp file lives in `temp_dir` and is removed on every exit path.
/// Progress is reported by the destination's `save`, so bytes are counted
/// once.
pub async fn copy_entry(
    from: &dyn Entry,
    drive_to: &dyn Drive,
    to: &str,
    override_allowed: bool,
    ctx: &dyn TaskCtx,
    temp_dir: &Path,
) -> DriveResult<Arc<dyn Entry>> {
    let Some(content) = from.content() else {
        return Err(DriveError::not_allowed_paths(
            t("drive.file_not_readable", &[from.path()]),
            [from.path()],
        ));
    };

    let mut reader = open_content_reader(content).await?;
    let staged = copy_reader_to_temp_file(&mut reader, &CancelOnly(ctx), temp_dir).await?;
    drop(reader);

    let file = tokio::fs::File::from_std(staged.reopen()?);
    drive_to
        .save(to, from.size(), override_allowed, Box::new(file), ctx)
        .await
}

/// Forwards cancellation but swallows progress.
struct CancelOnly<'a>(&'a dyn TaskCtx);

impl TaskCtx for CancelOnly<'_> {
    fn canceled(&self) -> bool {
        self.0.canceled()
    }

    fn progress(&self, _n: i64, _abs: bool) {}

    fn total(&self, _n: i64, _abs: bool) {}
}

/// Copy `src` into `dst` in [`COPY_BUFFER_SIZE`] chunks.
///
/// Polls cancellation before every chunk and reports each chunk as a
/// progress delta. Returns the number of bytes written.
pub async fn copy_with_ctx<W, R>(dst: &mut W, src: &mut R, ctx: &dyn TaskCtx) -> DriveResult<i64>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0i64;
    loop {
        ctx.check_canceled()?;
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        written += n as i64;
        ctx.progress(n as i64, false);
    }
    dst.flush().await?;
    Ok(written)
}

/// Drain `reader` into a fresh temp file under `temp_dir`.
///
/// The returned handle deletes the file when dropped; a failed copy drops it
/// immediately.
pub async fn copy_reader_to_temp_file<R>(
    reader: &mut R,
    ctx: &dyn TaskCtx,
    temp_dir: &Path,
) -> DriveResult<NamedTempFile>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let staged = tempfile::Builder::new()
        .prefix("drive-copy")
        .tempfile_in(temp_dir)?;
    let mut file = tokio::fs::File::from_std(staged.reopen()?);
    copy_with_ctx(&mut file, reader, ctx).await?;
    Ok(staged)
}

/// [`AsyncRead`] adapter that reports every read as a progress delta.
pub struct ProgressReader<'a, R> {
    inner: R,
    ctx: &'a dyn TaskCtx,
}

impl<'a, R> ProgressReader<'a, R> {
    pub fn new(inner: R, ctx: &'a dyn TaskCtx) -> Self {
        Self { inner, ctx }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<'_, R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.ctx.progress(read as i64, false);
            }
        }
        res
    }
}

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// A byte stream for `content`: the resolved URL when there is one, else the
/// entry's own reader.
pub async fn open_content_reader(content: &dyn Content) -> DriveResult<ByteReader> {
    match content.get_url().await {
        Ok(url) => fetch_url(&url).await,
        Err(e) if e.is_unsupported() => Ok(content.get_reader().await?.into_reader()),
        Err(e) => Err(e),
    }
}

/// `GET` a content URL with its extra headers. Anything but `200` is a
/// `RemoteApi` error.
pub async fn fetch_url(url: &ContentUrl) -> DriveResult<ByteReader> {
    let mut request = HTTP_CLIENT.get(&url.url);
    for (name, value) in &url.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let response = request
        .send()
        .await
        .map_err(|e| DriveError::other(format!("GET {} failed: {e}", url.url)))?;

    let status = response.status().as_u16();
    if status != 200 {
        let code = status.to_string();
        return Err(DriveError::remote_api(status, t("util.request_failed", &[code.as_str()])));
    }

    let stream = response.bytes_stream().map_err(io::Error::other).boxed();
    Ok(Box::new(StreamReader::new(stream)))
}
