//! Entry, content and drive traits.
//!
//! Every backend implements [`Drive`] and produces [`Entry`] values; every
//! consumer (cache, copy engine, content delivery, CLI) programs against these
//! traits only.

use async_trait::async_trait;
use std::any::Any;
use std::sync::{Arc, Weak};

use super::error::{DriveError, DriveResult};
use super::types::{
    ByteReader, ContentReader, ContentUrl, DriveMeta, EntryMeta, EntryType, UploadConfig,
};
use crate::i18n::t;
use crate::path::path_base;
use crate::task::TaskCtx;

/// One addressable object in a drive.
///
/// Entries are immutable snapshots. To observe changes, query the drive again.
pub trait Entry: Send + Sync + std::fmt::Debug {
    /// Virtual path, `/`-rooted.
    fn path(&self) -> &str;

    /// Last path segment.
    fn name(&self) -> String {
        path_base(self.path())
    }

    fn entry_type(&self) -> EntryType;

    /// Size in bytes; [`UNKNOWN_SIZE`](super::types::UNKNOWN_SIZE) for directories.
    fn size(&self) -> i64;

    /// Last modification, epoch milliseconds.
    fn mod_time(&self) -> i64;

    fn meta(&self) -> EntryMeta;

    /// The drive that produced this entry.
    fn drive(&self) -> DriveResult<Arc<dyn Drive>>;

    /// Read capability, if this entry has one.
    fn content(&self) -> Option<&dyn Content> {
        None
    }

    /// The entry this one decorates, if any.
    fn inner(&self) -> Option<Arc<dyn Entry>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Read/download capability of a file entry.
///
/// Exactly one of the two accessors is expected to be useful: `get_url`
/// failing with [`DriveError::Unsupported`] means "stream only".
#[async_trait]
pub trait Content: Entry {
    async fn get_url(&self) -> DriveResult<ContentUrl>;

    async fn get_reader(&self) -> DriveResult<ContentReader>;
}

/// One storage backend.
#[async_trait]
pub trait Drive: Send + Sync {
    fn meta(&self) -> DriveMeta;

    /// Look up a single entry. Missing paths fail with `NotFound`.
    async fn get(&self, path: &str) -> DriveResult<Arc<dyn Entry>>;

    /// Direct children of a directory (not recursive).
    async fn list(&self, path: &str) -> DriveResult<Vec<Arc<dyn Entry>>>;

    /// Write `reader` to `path`.
    ///
    /// With `override_allowed == false`, an existing destination fails with
    /// `NotAllowed` and is left untouched.
    async fn save(
        &self,
        path: &str,
        size: i64,
        override_allowed: bool,
        reader: ByteReader,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>>;

    /// Create a directory. The parent must exist.
    async fn make_dir(&self, path: &str) -> DriveResult<Arc<dyn Entry>>;

    /// Server-side copy. `Unsupported` tells the caller to fall back to the
    /// generic engine.
    async fn copy(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        let _ = (from, to, override_allowed, ctx);
        Err(DriveError::Unsupported)
    }

    /// Server-side move. Same contract as [`copy`](Drive::copy).
    async fn move_entry(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        let _ = (from, to, override_allowed, ctx);
        Err(DriveError::Unsupported)
    }

    /// Remove a file or a directory tree.
    async fn delete(&self, path: &str, ctx: &dyn TaskCtx) -> DriveResult<()>;

    /// Negotiate how a client should upload `size` bytes to `path`.
    async fn upload(
        &self,
        path: &str,
        size: i64,
        override_allowed: bool,
        extra: &std::collections::HashMap<String, String>,
    ) -> DriveResult<UploadConfig> {
        let _ = (path, override_allowed, extra);
        Ok(UploadConfig::local(size))
    }
}

/// Non-owning handle from an entry back to the drive that produced it.
///
/// Holding one does not keep the drive alive; once the drive is dropped,
/// [`DriveRef::get`] reports it as gone.
#[derive(Clone)]
pub struct DriveRef {
    drive: Weak<dyn Drive>,
}

impl DriveRef {
    pub fn new(drive: Weak<dyn Drive>) -> Self {
        Self { drive }
    }

    pub fn from_arc(drive: &Arc<dyn Drive>) -> Self {
        Self {
            drive: Arc::downgrade(drive),
        }
    }

    /// Upgrade to a live drive.
    pub fn get(&self) -> DriveResult<Arc<dyn Drive>> {
        self.drive
            .upgrade()
            .ok_or_else(|| DriveError::other(t("drive.released", &[])))
    }

    /// Whether both handles point at the same drive instance.
    pub fn same_drive(&self, other: &DriveRef) -> bool {
        std::ptr::addr_eq(Weak::as_ptr(&self.drive), Weak::as_ptr(&other.drive))
    }
}

impl std::fmt::Debug for DriveRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveRef")
            .field("alive", &(self.drive.strong_count() > 0))
            .finish()
    }
}

/// Walk the decoration chain until `predicate` accepts an entry.
///
/// Returns `None` when the chain is exhausted without a match.
pub fn unwrap_entry<P>(entry: Arc<dyn Entry>, predicate: P) -> Option<Arc<dyn Entry>>
where
    P: Fn(&dyn Entry) -> bool,
{
    let mut current = entry;
    loop {
        if predicate(current.as_ref()) {
            return Some(current);
        }
        current = current.inner()?;
    }
}

/// The innermost entry of a decoration chain.
pub fn innermost_entry(entry: Arc<dyn Entry>) -> Arc<dyn Entry> {
    let mut current = entry;
    while let Some(inner) = current.inner() {
        current = inner;
    }
    current
}
