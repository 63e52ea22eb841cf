//! End-to-end tests for the copy/move engine over in-memory drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use vdrive_kernel::copy::{
    CopyHandler, EntryNode, TransferHandler, TransferMode, build_entries_tree, copy_all, transfer,
};
use vdrive_kernel::drive::{Drive, DriveResult, Entry, MemoryDrive};
use vdrive_kernel::task::{TaskContext, TaskCtx, dummy_context};

// ============================================================================
// Helpers
// ============================================================================

async fn put(drive: &MemoryDrive, path: &str, data: &'static [u8]) {
    drive
        .save(path, data.len() as i64, true, Box::new(data), dummy_context())
        .await
        .unwrap();
}

async fn read(drive: &MemoryDrive, path: &str) -> Vec<u8> {
    let entry = drive.get(path).await.unwrap();
    let mut reader = entry
        .content()
        .unwrap()
        .get_reader()
        .await
        .unwrap()
        .into_reader();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

/// `/a/f1` (10 bytes) and `/a/b/f2` (5 bytes).
async fn sample_source() -> Arc<MemoryDrive> {
    let drive = MemoryDrive::new();
    drive.make_dir("/a").await.unwrap();
    drive.make_dir("/a/b").await.unwrap();
    put(&drive, "/a/f1", b"0123456789").await;
    put(&drive, "/a/b/f2", b"abcde").await;
    drive
}

/// Wraps the standard handler and records every `after` call.
struct Recording {
    inner: TransferHandler,
    afters: Mutex<Vec<(String, bool)>>,
}

impl Recording {
    fn new(mode: TransferMode, temp_dir: &std::path::Path) -> Self {
        Self {
            inner: TransferHandler::new(mode, temp_dir),
            afters: Mutex::new(Vec::new()),
        }
    }

    fn afters(&self) -> Vec<(String, bool)> {
        self.afters.lock().clone()
    }
}

#[async_trait]
impl CopyHandler for Recording {
    async fn copy_file(
        &self,
        from: Arc<dyn Entry>,
        drive_to: &dyn Drive,
        to: &str,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        self.inner.copy_file(from, drive_to, to, ctx).await
    }

    async fn after(
        &self,
        node: &EntryNode,
        all_processed: bool,
        ctx: &dyn TaskCtx,
    ) -> DriveResult<()> {
        self.afters
            .lock()
            .push((node.entry.path().to_string(), all_processed));
        self.inner.after(node, all_processed, ctx).await
    }
}

/// Records every progress value and cancels once `limit` bytes are loaded.
struct Watched {
    token: CancellationToken,
    loaded: AtomicI64,
    total: AtomicI64,
    limit: i64,
    history: Mutex<Vec<i64>>,
}

impl Watched {
    fn new(limit: i64) -> Self {
        Self {
            token: CancellationToken::new(),
            loaded: AtomicI64::new(0),
            total: AtomicI64::new(0),
            limit,
            history: Mutex::new(Vec::new()),
        }
    }
}

impl TaskCtx for Watched {
    fn canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn progress(&self, n: i64, abs: bool) {
        let loaded = if abs {
            self.loaded.store(n, Ordering::SeqCst);
            n
        } else {
            self.loaded.fetch_add(n, Ordering::SeqCst) + n
        };
        self.history.lock().push(loaded);
        if loaded >= self.limit {
            self.token.cancel();
        }
    }

    fn total(&self, n: i64, abs: bool) {
        if abs {
            self.total.store(n, Ordering::SeqCst);
        } else {
            self.total.fetch_add(n, Ordering::SeqCst);
        }
    }

    fn cancellation_token(&self) -> Option<&CancellationToken> {
        Some(&self.token)
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_copy_tree_across_drives() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    let tmp = tempfile::tempdir().unwrap();
    let ctx = TaskContext::new();

    let tree = build_entries_tree(src.get("/a").await.unwrap(), &ctx, true)
        .await
        .unwrap();
    ctx.mark_total_final();
    let handler = Recording::new(TransferMode::Copy, tmp.path());
    copy_all(&tree, dst.as_ref(), "/dst", false, &ctx, &handler)
        .await
        .unwrap();

    assert_eq!(
        handler.afters(),
        vec![
            ("/a/b/f2".to_string(), true),
            ("/a/b".to_string(), true),
            ("/a/f1".to_string(), true),
            ("/a".to_string(), true),
        ]
    );
    let snap = ctx.snapshot();
    assert_eq!(snap.loaded, 15);
    assert_eq!(snap.total, 15);
    assert!(snap.total_final);

    assert_eq!(read(&dst, "/dst/f1").await, b"0123456789");
    assert_eq!(read(&dst, "/dst/b/f2").await, b"abcde");
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_copy_within_drive_uses_server_side_copy() {
    let drive = sample_source().await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = TaskContext::new();

    transfer(
        drive.get("/a").await.unwrap(),
        drive.as_ref(),
        "/dst",
        false,
        TransferMode::Copy,
        &ctx,
        tmp.path(),
    )
    .await
    .unwrap();

    assert_eq!(ctx.snapshot().loaded, 15);
    assert_eq!(read(&drive, "/dst/b/f2").await, b"abcde");
    assert_eq!(read(&drive, "/a/b/f2").await, b"abcde");
}

#[tokio::test]
async fn test_second_copy_without_override_skips_everything() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    let tmp = tempfile::tempdir().unwrap();

    let tree = build_entries_tree(src.get("/a").await.unwrap(), dummy_context(), true)
        .await
        .unwrap();
    let first = Recording::new(TransferMode::Copy, tmp.path());
    copy_all(&tree, dst.as_ref(), "/dst", false, dummy_context(), &first)
        .await
        .unwrap();

    // Change the destination so an accidental overwrite would show.
    put(&dst, "/dst/f1", b"local").await;

    let second = Recording::new(TransferMode::Copy, tmp.path());
    let ctx = TaskContext::new();
    copy_all(&tree, dst.as_ref(), "/dst", false, &ctx, &second)
        .await
        .unwrap();

    assert!(second.afters().iter().all(|(_, processed)| !processed));
    assert_eq!(second.afters().len(), 4);
    assert_eq!(ctx.snapshot().loaded, 0);
    assert_eq!(read(&dst, "/dst/f1").await, b"local");
}

#[tokio::test]
async fn test_file_onto_directory_is_rejected() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    dst.make_dir("/taken").await.unwrap();
    let tmp = tempfile::tempdir().unwrap();

    let err = transfer(
        src.get("/a/f1").await.unwrap(),
        dst.as_ref(),
        "/taken",
        true,
        TransferMode::Copy,
        dummy_context(),
        tmp.path(),
    )
    .await
    .unwrap_err();

    assert!(err.is_not_allowed());
    assert!(err.to_string().contains("/a/f1"));
    assert!(err.to_string().contains("/taken"));
    assert!(dst.get("/taken").await.unwrap().entry_type().is_dir());
    assert!(dst.list("/taken").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_directory_onto_file_is_rejected() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    put(&dst, "/taken", b"x").await;
    let tmp = tempfile::tempdir().unwrap();

    let err = transfer(
        src.get("/a").await.unwrap(),
        dst.as_ref(),
        "/taken",
        true,
        TransferMode::Copy,
        dummy_context(),
        tmp.path(),
    )
    .await
    .unwrap_err();

    assert!(err.is_not_allowed());
    assert_eq!(read(&dst, "/taken").await, b"x");
}

#[tokio::test]
async fn test_progress_is_monotone_and_bounded() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    let tmp = tempfile::tempdir().unwrap();
    let ctx = Watched::new(i64::MAX);

    transfer(
        src.get("/a").await.unwrap(),
        dst.as_ref(),
        "/dst",
        false,
        TransferMode::Copy,
        &ctx,
        tmp.path(),
    )
    .await
    .unwrap();

    let history = ctx.history.lock().clone();
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[0] <= w[1]));
    let total = ctx.total.load(Ordering::SeqCst);
    assert!(history.iter().all(|&loaded| loaded <= total));
}

#[tokio::test]
async fn test_cancellation_stops_after_in_flight_file() {
    let src = MemoryDrive::new();
    src.make_dir("/s").await.unwrap();
    put(&src, "/s/f1", b"1111").await;
    put(&src, "/s/f2", b"2222").await;
    put(&src, "/s/f3", b"3333").await;
    let dst = MemoryDrive::new();
    let tmp = tempfile::tempdir().unwrap();

    // Trips while the second file is being saved.
    let ctx = Watched::new(8);
    let err = transfer(
        src.get("/s").await.unwrap(),
        dst.as_ref(),
        "/d",
        false,
        TransferMode::Copy,
        &ctx,
        tmp.path(),
    )
    .await
    .unwrap_err();

    assert!(err.is_canceled());
    assert_eq!(read(&dst, "/d/f1").await, b"1111");
    assert!(dst.get("/d/f3").await.unwrap_err().is_not_found());
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_move_across_drives_removes_source() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    let tmp = tempfile::tempdir().unwrap();

    transfer(
        src.get("/a").await.unwrap(),
        dst.as_ref(),
        "/moved",
        false,
        TransferMode::Move,
        dummy_context(),
        tmp.path(),
    )
    .await
    .unwrap();

    assert!(src.get("/a").await.unwrap_err().is_not_found());
    assert_eq!(read(&dst, "/moved/f1").await, b"0123456789");
    assert_eq!(read(&dst, "/moved/b/f2").await, b"abcde");
}

#[tokio::test]
async fn test_move_keeps_sources_that_were_skipped() {
    let src = sample_source().await;
    let dst = MemoryDrive::new();
    dst.make_dir("/moved").await.unwrap();
    put(&dst, "/moved/f1", b"keep").await;
    let tmp = tempfile::tempdir().unwrap();

    transfer(
        src.get("/a").await.unwrap(),
        dst.as_ref(),
        "/moved",
        false,
        TransferMode::Move,
        dummy_context(),
        tmp.path(),
    )
    .await
    .unwrap();

    // f1 was skipped, so it and its parent stay; the b subtree moved.
    assert_eq!(read(&src, "/a/f1").await, b"0123456789");
    assert!(src.get("/a/b").await.unwrap_err().is_not_found());
    assert_eq!(read(&dst, "/moved/f1").await, b"keep");
    assert_eq!(read(&dst, "/moved/b/f2").await, b"abcde");
}

#[tokio::test]
async fn test_move_within_drive() {
    let drive = sample_source().await;
    let tmp = tempfile::tempdir().unwrap();

    transfer(
        drive.get("/a").await.unwrap(),
        drive.as_ref(),
        "/z",
        false,
        TransferMode::Move,
        dummy_context(),
        tmp.path(),
    )
    .await
    .unwrap();

    assert!(drive.get("/a").await.unwrap_err().is_not_found());
    assert_eq!(read(&drive, "/z/b/f2").await, b"abcde");
}
