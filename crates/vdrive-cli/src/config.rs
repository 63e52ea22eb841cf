//! `drives.toml` loading.
//!
//! ```toml
//! temp_dir = "/var/tmp/vdrive"
//!
//! [drives.scratch]
//! type = "memory"
//!
//! [drives.nas]
//! type = "webdav"
//! url = "https://nas.local/dav/"
//! username = "alice"
//! password = "secret"
//! cache_ttl = "30s"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vdrive_kernel::drive::{Drive, DriveConfig, DriveRegistry, MemoryDrive};
use vdrive_webdav::WebDavDrive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveKind {
    Memory,
    Webdav,
}

/// One `[drives.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveSection {
    #[serde(rename = "type")]
    pub kind: DriveKind,
    /// Everything else is handed to the backend as flat parameters.
    #[serde(flatten)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Staging directory for cross-drive copies. Defaults to the OS temp dir.
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub drives: BTreeMap<String, DriveSection>,
}

impl CliConfig {
    /// `$XDG_CONFIG_HOME/vdrive/drives.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vdrive").join("drives.toml"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`. A missing file at the default location is an empty
    /// config; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid config {}", path.display())),
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, starting without drives");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Construct every configured drive and mount it under its name.
    pub async fn mount_all(&self, registry: &DriveRegistry) -> Result<()> {
        for (name, section) in &self.drives {
            let params: DriveConfig = section.params.clone().into_iter().collect();
            let drive: Arc<dyn Drive> = match section.kind {
                DriveKind::Memory => MemoryDrive::new(),
                DriveKind::Webdav => WebDavDrive::from_drive_config(&params)
                    .await
                    .with_context(|| format!("cannot connect drive '{name}'"))?,
            };
            registry.mount(name, drive).await?;
        }
        Ok(())
    }
}
