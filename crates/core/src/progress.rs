//! Upload progress reporting

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Receives byte counts while an upload runs.
pub trait ProgressObserver: Send + Sync {
    /// `transferred` never decreases between calls for the same upload.
    fn on_progress(&self, transferred: u64, total: u64);

    /// Called exactly once when the upload stops, successfully or not.
    fn on_finish(&self, _succeeded: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _transferred: u64, _total: u64) {}
}

/// Observer that logs progress at debug level
#[derive(Debug, Clone)]
pub struct TracingProgress {
    object: String,
}

impl TracingProgress {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
        }
    }
}

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, transferred: u64, total: u64) {
        debug!(object = %self.object, transferred, total, "upload progress");
    }

    fn on_finish(&self, succeeded: bool) {
        debug!(object = %self.object, succeeded, "upload finished");
    }
}

/// Subscription of an observer to one upload.
///
/// Drops out-of-order counts and always delivers `on_finish`, even when the
/// upload future is dropped half way.
pub(crate) struct ProgressGuard<'a> {
    observer: &'a dyn ProgressObserver,
    total: u64,
    reported: AtomicU64,
    succeeded: bool,
}

impl<'a> ProgressGuard<'a> {
    pub(crate) fn register(observer: &'a dyn ProgressObserver, total: u64) -> Self {
        observer.on_progress(0, total);
        Self {
            observer,
            total,
            reported: AtomicU64::new(0),
            succeeded: false,
        }
    }

    pub(crate) fn advance(&self, transferred: u64) {
        let previous = self.reported.fetch_max(transferred, Ordering::Relaxed);
        if transferred > previous {
            self.observer.on_progress(transferred, self.total);
        }
    }

    pub(crate) fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.observer.on_finish(self.succeeded);
    }
}
