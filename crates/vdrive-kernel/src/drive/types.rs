//! Core drive types.
//!
//! Plain data shared by every backend: entry kinds, capability flags,
//! content handles, upload negotiation and the cache record format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek};

use super::error::{DriveError, DriveResult};
use super::ops::Entry;

/// Entry type. Files and directories are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

impl EntryType {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryType::Dir)
    }
}

/// Size reported for directories.
pub const UNKNOWN_SIZE: i64 = -1;

/// Per-entry capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMeta {
    pub can_read: bool,
    pub can_write: bool,
}

impl EntryMeta {
    /// Both read and write allowed.
    pub fn read_write() -> Self {
        Self {
            can_read: true,
            can_write: true,
        }
    }
}

/// Per-drive capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveMeta {
    /// Whether the drive accepts writes at all.
    pub can_write: bool,
}

/// A resolved download location for a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentUrl {
    pub url: String,
    /// The URL must be fetched server-side and relayed, never handed out.
    pub proxy: bool,
    /// Extra headers to send upstream (typically credentials).
    pub headers: HashMap<String, String>,
}

impl ContentUrl {
    /// A public URL the requester may be redirected to.
    pub fn public(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: false,
            headers: HashMap::new(),
        }
    }

    /// A URL that must go through the proxy.
    pub fn proxied(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: true,
            headers: HashMap::new(),
        }
    }

    /// Add an upstream header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Whether serving this URL requires a server-side fetch.
    pub fn requires_proxy(&self) -> bool {
        self.proxy || !self.headers.is_empty()
    }
}

/// Plain forward-only byte stream.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A byte stream that can also seek.
pub trait SeekableReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableReader for T {}

/// Byte stream of a file's content.
pub enum ContentReader {
    /// Forward-only stream of unknown seekability.
    Stream(ByteReader),
    /// Seekable stream; eligible for range requests.
    Seekable(Box<dyn SeekableReader>),
}

impl ContentReader {
    /// Forget seekability.
    pub fn into_reader(self) -> ByteReader {
        match self {
            ContentReader::Stream(r) => r,
            ContentReader::Seekable(r) => Box::new(r),
        }
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, ContentReader::Seekable(_))
    }
}

impl std::fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentReader::Stream(_) => f.write_str("ContentReader::Stream"),
            ContentReader::Seekable(_) => f.write_str("ContentReader::Seekable"),
        }
    }
}

/// Chunk size (and single-shot threshold) for local uploads.
pub const LOCAL_CHUNK_SIZE: i64 = 5 * 1024 * 1024;

/// How a client should deliver an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum UploadProvider {
    /// Single request through this server.
    Local,
    /// Chunked upload through this server.
    LocalChunked { chunk_size: i64 },
    /// Backend-specific (e.g. a pre-signed URL).
    Custom {
        name: String,
        config: HashMap<String, String>,
    },
}

/// Result of upload negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(flatten)]
    pub provider: UploadProvider,
}

impl UploadConfig {
    /// Upload through this server, chunked above [`LOCAL_CHUNK_SIZE`].
    pub fn local(size: i64) -> Self {
        let provider = if size > LOCAL_CHUNK_SIZE {
            UploadProvider::LocalChunked {
                chunk_size: LOCAL_CHUNK_SIZE,
            }
        } else {
            UploadProvider::Local
        };
        Self { provider }
    }
}

/// Flat string configuration a drive is constructed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriveConfig(HashMap<String, String>);

impl DriveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`; empty strings count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Value for a mandatory key.
    pub fn require(&self, key: &str) -> DriveResult<&str> {
        self.get(key)
            .ok_or_else(|| DriveError::other(format!("missing required drive parameter '{key}'")))
    }

    /// Parse a duration such as `30s` or `1h 30m`. Absent or unparseable
    /// values yield `None`.
    pub fn duration(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| humantime::parse_duration(v).ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DriveConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Backend-agnostic metadata snapshot of an entry, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: i64,
    pub mod_time: i64,
}

impl EntryRecord {
    pub fn of(entry: &dyn Entry) -> Self {
        Self {
            path: entry.path().to_string(),
            entry_type: entry.entry_type(),
            size: entry.size(),
            mod_time: entry.mod_time(),
        }
    }
}
