//! WebDAV drive configuration.

use std::time::Duration;
use url::Url;
use vdrive_kernel::drive::{DriveConfig, DriveError, DriveResult};

/// Connection settings for a [`WebDavDrive`](crate::WebDavDrive).
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Root URL of the share. Its path becomes the drive's `/`.
    pub url: Url,
    /// Basic-auth user. `None` disables authentication.
    pub username: Option<String>,
    pub password: String,
    /// Metadata cache lifetime. `None` disables caching.
    pub cache_ttl: Option<Duration>,
}

impl WebDavConfig {
    pub fn new(url: &str) -> DriveResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| DriveError::other(format!("invalid webdav url '{url}': {e}")))?;
        Ok(Self {
            url,
            username: None,
            password: String::new(),
            cache_ttl: None,
        })
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = password.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Read the flat drive parameters:
    ///
    /// - `url` (required): root URL
    /// - `username`: omit to disable authentication
    /// - `password`
    /// - `cache_ttl`: duration such as `30s`; absent or unparseable disables
    ///   caching
    pub fn from_drive_config(config: &DriveConfig) -> DriveResult<Self> {
        let mut parsed = Self::new(config.require("url")?)?;
        if let Some(username) = config.get("username") {
            parsed = parsed.with_auth(username, config.get("password").unwrap_or_default());
        }
        parsed.cache_ttl = config.duration("cache_ttl").filter(|ttl| !ttl.is_zero());
        Ok(parsed)
    }

    /// Path component of the root URL, e.g. `/remote.php/dav`.
    pub fn path_prefix(&self) -> &str {
        self.url.path()
    }
}
