//! Progress state, the serialized progress counter and the cancellation context.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::spec::DuplicateError;

/// `(completed, total)` units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    pub completed: u64,
    pub total: u64,
}

impl ProgressState {
    /// Completion ratio in `[0, 1]`; an empty run counts as done.
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f32 / self.total as f32
    }
}

/// Consumer of progress updates.
pub type ProgressSink = Arc<dyn Fn(ProgressState) + Send + Sync>;

/// Why a stage stopped before finishing its units.
#[derive(Debug)]
pub(crate) enum StageStop {
    Cancelled,
    Failed(DuplicateError),
}

impl From<DuplicateError> for StageStop {
    fn from(error: DuplicateError) -> Self {
        Self::Failed(error)
    }
}

pub(crate) type StageResult<T> = Result<T, StageStop>;

/// Cooperative cancellation, polled between units.
#[derive(Debug, Clone, Default)]
pub struct SpecCancelContext {
    token: Option<CancellationToken>,
}

impl SpecCancelContext {
    pub fn new(token: Option<CancellationToken>) -> Self {
        Self { token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub(crate) fn check(&self) -> StageResult<()> {
        if self.is_cancelled() {
            return Err(StageStop::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    state: ProgressState,
    if_sink_muted: bool,
    warnings: Vec<String>,
}

/// Single mutable progress counter shared by the copy workers.
///
/// Commits, counter increments and sink calls all happen under one lock, so
/// the sink observes `completed` strictly increasing by one per call.
pub struct ProgressTracker {
    inner: Mutex<TrackerInner>,
    sink: Option<ProgressSink>,
}

impl ProgressTracker {
    pub fn new(sink: Option<ProgressSink>) -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state; safe to poll from any thread.
    pub fn snapshot(&self) -> ProgressState {
        self.lock().state
    }

    pub(crate) fn set_total(&self, total: u64) {
        let mut inner = self.lock();
        inner.state = ProgressState {
            completed: 0,
            total,
        };
    }

    /// Run `f_commit` and count one unit, unless cancellation was raised.
    ///
    /// The cancellation check and the commit are atomic with respect to other
    /// workers: after `Cancelled` is returned to anyone, no further unit becomes
    /// visible at destination.
    pub(crate) fn commit_unit<F>(&self, cancel: &SpecCancelContext, f_commit: F) -> StageResult<()>
    where
        F: FnOnce() -> Result<(), DuplicateError>,
    {
        let mut inner = self.lock();
        cancel.check()?;
        f_commit()?;
        inner.state.completed += 1;
        let state = inner.state;
        self.emit(&mut *inner, state);
        Ok(())
    }

    fn emit(&self, inner: &mut TrackerInner, state: ProgressState) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if inner.if_sink_muted {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| sink(state))).is_err() {
            log::warn!(
                "Progress sink panicked at {}/{}; further updates are muted",
                state.completed,
                state.total
            );
            inner.if_sink_muted = true;
            inner.warnings.push(format!(
                "Progress sink panicked at {}/{}; further updates muted",
                state.completed, state.total
            ));
        }
    }

    pub(crate) fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().warnings)
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.snapshot())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
