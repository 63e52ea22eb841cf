//! In-memory drive backend.
//!
//! Used for scratch space and as the reference drive in tests. All data is
//! ephemeral.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Weak};

use crate::copy::copy_with_ctx;
use crate::drive::error::{DriveError, DriveResult};
use crate::drive::ops::{Content, Drive, DriveRef, Entry, unwrap_entry};
use crate::drive::types::{
    ByteReader, ContentReader, ContentUrl, DriveMeta, EntryMeta, EntryType, UNKNOWN_SIZE,
};
use crate::i18n::t;
use crate::path::{clean_path, is_descendant, path_parent};
use crate::task::TaskCtx;

#[derive(Debug, Clone)]
enum Node {
    File { data: Bytes, mod_time: i64 },
    Dir { mod_time: i64 },
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self, Node::Dir { .. })
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory drive.
///
/// Thread-safe via an internal `RwLock`. All data is lost when dropped.
/// Parents are never created implicitly.
pub struct MemoryDrive {
    nodes: RwLock<HashMap<String, Node>>,
    read_only: bool,
    this: Weak<MemoryDrive>,
}

impl std::fmt::Debug for MemoryDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDrive")
            .field("nodes", &self.nodes.read().len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl MemoryDrive {
    /// Create an empty, writable drive.
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Create an empty drive that rejects every write.
    pub fn read_only() -> Arc<Self> {
        Self::build(true)
    }

    fn build(read_only: bool) -> Arc<Self> {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                mod_time: now_millis(),
            },
        );
        Arc::new_cyclic(|this| Self {
            nodes: RwLock::new(nodes),
            read_only,
            this: this.clone(),
        })
    }

    fn drive_ref(&self) -> DriveRef {
        DriveRef::new(self.this.clone())
    }

    fn entry(&self, path: &str, node: &Node) -> Arc<dyn Entry> {
        let (entry_type, size, mod_time, data) = match node {
            Node::File { data, mod_time } => {
                (EntryType::File, data.len() as i64, *mod_time, Some(data.clone()))
            }
            Node::Dir { mod_time } => (EntryType::Dir, UNKNOWN_SIZE, *mod_time, None),
        };
        Arc::new(MemoryEntry {
            path: path.to_string(),
            entry_type,
            size,
            mod_time,
            can_write: !self.read_only,
            data,
            drive: self.drive_ref(),
        })
    }

    fn check_writable(&self) -> DriveResult<()> {
        if self.read_only {
            return Err(DriveError::not_allowed(t("drive.read_only", &[])));
        }
        Ok(())
    }

    /// Validate that `path` may receive a file.
    fn check_file_target(
        nodes: &HashMap<String, Node>,
        path: &str,
        override_allowed: bool,
    ) -> DriveResult<()> {
        if path == "/" {
            return Err(DriveError::not_allowed_paths(t("drive.not_a_file", &[path]), [path]));
        }
        let parent = path_parent(path);
        match nodes.get(&parent) {
            Some(node) if node.is_dir() => {}
            Some(_) => {
                return Err(DriveError::not_allowed_paths(
                    t("drive.not_a_dir", &[parent.as_str()]),
                    [parent],
                ))
            }
            None => return Err(DriveError::not_found(t("drive.parent_not_found", &[path]))),
        }
        match nodes.get(path) {
            Some(Node::Dir { .. }) => Err(DriveError::not_allowed_paths(
                t("drive.not_a_file", &[path]),
                [path],
            )),
            Some(Node::File { .. }) if !override_allowed => Err(DriveError::not_allowed_paths(
                t("drive.file_exists", &[]),
                [path],
            )),
            _ => Ok(()),
        }
    }

    /// Resolve `from` to a file of this very drive, if it is one.
    fn own_file(&self, from: Arc<dyn Entry>) -> Option<Arc<dyn Entry>> {
        let me = self.drive_ref();
        unwrap_entry(from, |e| {
            e.as_any()
                .downcast_ref::<MemoryEntry>()
                .is_some_and(|m| m.drive.same_drive(&me) && m.entry_type.is_file())
        })
    }

    fn server_side_transfer(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        remove_source: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.check_writable()?;
        ctx.check_canceled()?;
        let Some(source) = self.own_file(from) else {
            return Err(DriveError::Unsupported);
        };
        let from_path = source.path().to_string();
        let to = clean_path(to);

        let mut nodes = self.nodes.write();
        Self::check_file_target(&nodes, &to, override_allowed)?;
        let data = match nodes.get(&from_path) {
            Some(Node::File { data, .. }) => data.clone(),
            _ => return Err(DriveError::not_found(from_path)),
        };
        let size = data.len() as i64;
        if remove_source && from_path != to {
            nodes.remove(&from_path);
        }
        let node = Node::File {
            data,
            mod_time: now_millis(),
        };
        let entry = self.entry(&to, &node);
        nodes.insert(to, node);
        drop(nodes);

        ctx.progress(size, false);
        Ok(entry)
    }
}

#[async_trait]
impl Drive for MemoryDrive {
    fn meta(&self) -> DriveMeta {
        DriveMeta {
            can_write: !self.read_only,
        }
    }

    async fn get(&self, path: &str) -> DriveResult<Arc<dyn Entry>> {
        let path = clean_path(path);
        let nodes = self.nodes.read();
        nodes
            .get(&path)
            .map(|node| self.entry(&path, node))
            .ok_or_else(|| DriveError::not_found(path))
    }

    async fn list(&self, path: &str) -> DriveResult<Vec<Arc<dyn Entry>>> {
        let path = clean_path(path);
        let nodes = self.nodes.read();
        match nodes.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(DriveError::not_allowed_paths(
                    t("drive.not_a_dir", &[path.as_str()]),
                    [&path],
                ));
            }
            None => return Err(DriveError::not_found(path)),
        }

        let mut children: Vec<(&String, &Node)> = nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && path_parent(p) == path)
            .collect();
        children.sort_by(|a, b| a.0.cmp(b.0));
        Ok(children
            .into_iter()
            .map(|(p, node)| self.entry(p, node))
            .collect())
    }

    async fn save(
        &self,
        path: &str,
        _size: i64,
        override_allowed: bool,
        mut reader: ByteReader,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.check_writable()?;
        let path = clean_path(path);
        Self::check_file_target(&self.nodes.read(), &path, override_allowed)?;

        let mut buf = Vec::new();
        copy_with_ctx(&mut buf, &mut reader, ctx).await?;

        // The tree may have changed while the body was read.
        let mut nodes = self.nodes.write();
        Self::check_file_target(&nodes, &path, override_allowed)?;
        let node = Node::File {
            data: Bytes::from(buf),
            mod_time: now_millis(),
        };
        let entry = self.entry(&path, &node);
        nodes.insert(path, node);
        Ok(entry)
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Arc<dyn Entry>> {
        self.check_writable()?;
        let path = clean_path(path);
        let mut nodes = self.nodes.write();
        match nodes.get(&path) {
            Some(node @ Node::Dir { .. }) => return Ok(self.entry(&path, node)),
            Some(Node::File { .. }) => {
                return Err(DriveError::not_allowed_paths(t("drive.file_exists", &[]), [&path]))
            }
            None => {}
        }
        match nodes.get(&path_parent(&path)) {
            Some(node) if node.is_dir() => {}
            _ => return Err(DriveError::not_found(t("drive.parent_not_found", &[path.as_str()]))),
        }
        let node = Node::Dir {
            mod_time: now_millis(),
        };
        let entry = self.entry(&path, &node);
        nodes.insert(path, node);
        Ok(entry)
    }

    async fn copy(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.server_side_transfer(from, to, override_allowed, false, ctx)
    }

    async fn move_entry(
        &self,
        from: Arc<dyn Entry>,
        to: &str,
        override_allowed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<Arc<dyn Entry>> {
        self.server_side_transfer(from, to, override_allowed, true, ctx)
    }

    async fn delete(&self, path: &str, ctx: &dyn TaskCtx) -> DriveResult<()> {
        self.check_writable()?;
        ctx.check_canceled()?;
        let path = clean_path(path);
        if path == "/" {
            return Err(DriveError::not_allowed_paths(t("drive.root_protected", &[]), [path]));
        }
        let mut nodes = self.nodes.write();
        if nodes.remove(&path).is_none() {
            return Err(DriveError::not_found(path));
        }
        nodes.retain(|p, _| !is_descendant(p, &path));
        Ok(())
    }
}

/// Entry handed out by [`MemoryDrive`].
///
/// File entries carry a snapshot of the content at lookup time.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    path: String,
    entry_type: EntryType,
    size: i64,
    mod_time: i64,
    can_write: bool,
    data: Option<Bytes>,
    drive: DriveRef,
}

impl Entry for MemoryEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn mod_time(&self) -> i64 {
        self.mod_time
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            can_read: true,
            can_write: self.can_write,
        }
    }

    fn drive(&self) -> DriveResult<Arc<dyn Drive>> {
        self.drive.get()
    }

    fn content(&self) -> Option<&dyn Content> {
        if self.entry_type.is_file() {
            Some(self)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Content for MemoryEntry {
    async fn get_url(&self) -> DriveResult<ContentUrl> {
        Err(DriveError::Unsupported)
    }

    async fn get_reader(&self) -> DriveResult<ContentReader> {
        match &self.data {
            Some(data) => Ok(ContentReader::Seekable(Box::new(Cursor::new(data.clone())))),
            None => Err(DriveError::not_allowed_paths(
                t("drive.not_a_file", &[self.path.as_str()]),
                [&self.path],
            )),
        }
    }
}
