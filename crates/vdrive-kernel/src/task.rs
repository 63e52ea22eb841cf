//! Cooperative cancellation and progress reporting.
//!
//! Every long-running drive operation receives a `&dyn TaskCtx`. Nothing is
//! interrupted from the outside: workers poll [`TaskCtx::canceled`] at loop
//! boundaries (each recursion frame, each I/O chunk) and bail out with
//! [`DriveError::Canceled`] the moment they see it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::drive::{DriveError, DriveResult};

/// Cancellation + progress handle threaded through long operations.
///
/// For both [`progress`](TaskCtx::progress) and [`total`](TaskCtx::total),
/// `abs == true` sets the counter and `abs == false` adds `n` to it. Lazy
/// producers (a directory walk discovering sizes one file at a time) use the
/// delta form.
pub trait TaskCtx: Send + Sync {
    /// Has the caller asked to stop?
    fn canceled(&self) -> bool;

    /// Report processed work.
    fn progress(&self, n: i64, abs: bool);

    /// Report the amount of work expected.
    fn total(&self, n: i64, abs: bool);

    /// Token that resolves on cancellation, for contexts that have one.
    ///
    /// Lets network calls race the request against cancellation instead of
    /// only polling between chunks.
    fn cancellation_token(&self) -> Option<&CancellationToken> {
        None
    }

    /// `Err(Canceled)` once cancellation has been requested.
    fn check_canceled(&self) -> DriveResult<()> {
        if self.canceled() {
            Err(DriveError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Point-in-time view of a [`TaskContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    pub loaded: i64,
    pub total: i64,
    pub total_final: bool,
    pub canceled: bool,
}

/// The standard task context.
#[derive(Debug, Default)]
pub struct TaskContext {
    token: CancellationToken,
    loaded: AtomicI64,
    total: AtomicI64,
    total_final: AtomicBool,
}

impl TaskContext {
    /// Create a fresh, uncanceled context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. One-way: there is no un-cancel.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A context with its own counters that is canceled whenever this one is.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..Self::default()
        }
    }

    /// Declare that no further `total` updates will follow.
    pub fn mark_total_final(&self) {
        self.total_final.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> TaskProgress {
        TaskProgress {
            loaded: self.loaded.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            total_final: self.total_final.load(Ordering::Acquire),
            canceled: self.token.is_cancelled(),
        }
    }
}

impl TaskCtx for TaskContext {
    fn canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn progress(&self, n: i64, abs: bool) {
        let loaded = if abs {
            self.loaded.store(n, Ordering::Release);
            n
        } else {
            self.loaded.fetch_add(n, Ordering::AcqRel) + n
        };
        tracing::trace!(loaded, "task progress");
    }

    fn total(&self, n: i64, abs: bool) {
        let total = if abs {
            self.total.store(n, Ordering::Release);
            n
        } else {
            self.total.fetch_add(n, Ordering::AcqRel) + n
        };
        tracing::trace!(total, "task total");
    }

    fn cancellation_token(&self) -> Option<&CancellationToken> {
        Some(&self.token)
    }
}

/// Context for internal calls nobody is watching. Never canceled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyContext;

impl TaskCtx for DummyContext {
    fn canceled(&self) -> bool {
        false
    }

    fn progress(&self, _n: i64, _abs: bool) {}

    fn total(&self, _n: i64, _abs: bool) {}
}

/// Shared no-op context.
pub fn dummy_context() -> &'static DummyContext {
    static DUMMY: DummyContext = DummyContext;
    &DUMMY
}

/// Run `fut`, abandoning it with `Canceled` if the context is canceled first.
///
/// Contexts without a token fall back to a poll before and after the call.
pub async fn cancelable<T, F>(ctx: &dyn TaskCtx, fut: F) -> DriveResult<T>
where
    F: Future<Output = DriveResult<T>>,
{
    ctx.check_canceled()?;
    match ctx.cancellation_token() {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(DriveError::Canceled),
            res = fut => res,
        },
        None => {
            let res = fut.await;
            ctx.check_canceled()?;
            res
        }
    }
}
