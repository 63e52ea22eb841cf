//! Drive abstraction.
//!
//! Key components:
//!
//! - [`Drive`] - Core trait every storage backend implements
//! - [`Entry`] / [`Content`] - What a drive hands out, and how to read it
//! - [`DriveRegistry`] - Routes `/<name>/...` paths to mounted drives
//! - [`MemoryDrive`] - In-memory drive (scratch space, testing)
//!
//! ## Design Decisions
//!
//! - **Path-based**: every operation takes a `/`-rooted virtual path.
//! - **Weak back-references**: entries point at their drive through a
//!   [`DriveRef`], so a cached entry never keeps a retired drive alive.
//! - **Capabilities by probing**: `copy`/`move_entry`/`get_url` may answer
//!   [`DriveError::Unsupported`], which callers treat as "use the generic
//!   path" rather than a failure.

pub mod backends;
mod error;
mod ops;
mod registry;
mod types;

pub use backends::MemoryDrive;
pub use error::{DriveError, DriveResult};
pub use ops::{Content, Drive, DriveRef, Entry, innermost_entry, unwrap_entry};
pub use registry::{DriveRegistry, MountInfo};
pub use types::{
    ByteReader, ContentReader, ContentUrl, DriveConfig, DriveMeta, EntryMeta, EntryRecord,
    EntryType, LOCAL_CHUNK_SIZE, SeekableReader, UNKNOWN_SIZE, UploadConfig, UploadProvider,
};
