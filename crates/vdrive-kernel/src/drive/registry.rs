//! Drive registry with name-prefix routing.
//!
//! Each drive is mounted under `/<name>`. A virtual path such as
//! `/photos/2024/a.jpg` resolves to the `photos` drive and the
//! drive-relative path `/2024/a.jpg`.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::{DriveError, DriveResult};
use super::ops::Drive;
use crate::path::clean_path;

/// Information about a mounted drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Mount name; the drive is reachable at `/<name>`.
    pub name: String,
    /// Whether the drive accepts writes.
    pub can_write: bool,
}

/// Routes virtual paths to mounted drives.
pub struct DriveRegistry {
    drives: RwLock<BTreeMap<String, Arc<dyn Drive>>>,
}

impl std::fmt::Debug for DriveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveRegistry")
            .field("drives", &"<locked>")
            .finish()
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self {
            drives: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mount a drive under `/<name>`, replacing any drive already there.
    ///
    /// Names must be a single non-empty path segment.
    pub async fn mount(&self, name: &str, drive: Arc<dyn Drive>) -> DriveResult<()> {
        let name = Self::normalize_name(name)?;
        tracing::info!(drive = %name, "mounted drive");
        self.drives.write().await.insert(name, drive);
        Ok(())
    }

    /// Unmount the drive at `/<name>`.
    ///
    /// Returns `true` if a drive was removed.
    pub async fn unmount(&self, name: &str) -> bool {
        let name = name.trim_matches('/');
        self.drives.write().await.remove(name).is_some()
    }

    /// All mounts, ordered by name.
    pub async fn list_mounts(&self) -> Vec<MountInfo> {
        self.drives
            .read()
            .await
            .iter()
            .map(|(name, drive)| MountInfo {
                name: name.clone(),
                can_write: drive.meta().can_write,
            })
            .collect()
    }

    /// The drive mounted as `name`, if any.
    pub async fn drive(&self, name: &str) -> Option<Arc<dyn Drive>> {
        self.drives.read().await.get(name.trim_matches('/')).cloned()
    }

    /// Split a virtual path into its drive and the path within that drive.
    ///
    /// The registry root itself is not inside any drive and resolves to
    /// `NotFound`, as does a path whose first segment names no mount.
    pub async fn resolve(&self, path: &str) -> DriveResult<(Arc<dyn Drive>, String)> {
        let cleaned = clean_path(path);
        let rest = &cleaned[1..];
        let (name, inner) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if name.is_empty() {
            return Err(DriveError::not_found(cleaned));
        }
        let drives = self.drives.read().await;
        match drives.get(name) {
            Some(drive) => Ok((Arc::clone(drive), inner.to_string())),
            None => Err(DriveError::not_found(cleaned)),
        }
    }

    fn normalize_name(name: &str) -> DriveResult<String> {
        let name = name.trim_matches('/');
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(DriveError::other(format!("invalid drive name '{name}'")));
        }
        Ok(name.to_string())
    }
}
