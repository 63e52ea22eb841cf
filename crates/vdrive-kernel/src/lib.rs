//! # vdrive-kernel
//!
//! Core crate of vdrive: the drive abstraction every backend implements and
//! the machinery built on top of it.
//!
//! A drive:
//! - Exposes a `/`-rooted tree of files and directories
//! - Hands out immutable [`Entry`] snapshots that point back at it weakly
//! - May offer server-side copy/move, falling back to the generic engine
//! - Is mounted by name in a [`DriveRegistry`]
//!
//! Long operations take a [`TaskCtx`] for cooperative cancellation and
//! progress reporting.

pub mod cache;
pub mod content;
pub mod copy;
pub mod drive;
pub mod i18n;
pub mod path;
pub mod task;

pub use cache::{DisabledCache, DriveCache, EntryFactory, TtlDriveCache, new_drive_cache};
pub use content::ContentDelivery;
pub use copy::{
    CopyHandler, EntryNode, TransferHandler, TransferMode, build_entries_tree, copy_all, copy_entry,
    flatten_entries_tree, transfer,
};
pub use drive::{
    Content, ContentReader, ContentUrl, Drive, DriveConfig, DriveError, DriveMeta, DriveRef,
    DriveRegistry, DriveResult, Entry, EntryMeta, EntryRecord, EntryType, UploadConfig,
    backends::MemoryDrive,
};
pub use task::{DummyContext, TaskContext, TaskCtx, TaskProgress, dummy_context};
