//! Progress-callback trait for stage and unit events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the run moves through its stages. The CLI uses it to drive a
//! progress bar; a service could forward the same events to a channel.
//!
//! # Example
//!
//! ```rust
//! use edgequake_scan2md::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, stage: Stage, name: &str) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("[{stage}] {name} ({n} done)");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { done: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder("book")
//!     .progress_callback(cb as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{Stage, StageReport};
use std::sync::Arc;

/// Called by the pipeline as it processes each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run on blocking worker threads, so
/// implementations must be `Send + Sync`.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a stage starts.
    ///
    /// # Arguments
    /// * `stage`: the stage starting
    /// * `total`: files or units it will attempt
    fn on_stage_start(&self, stage: Stage, total: usize) {
        let _ = (stage, total);
    }

    /// Called when a file or unit produced its artifact.
    fn on_unit_complete(&self, stage: Stage, name: &str) {
        let _ = (stage, name);
    }

    /// Called when a file or unit was skipped because of an error.
    fn on_unit_error(&self, stage: Stage, name: &str, error: &str) {
        let _ = (stage, name, error);
    }

    /// Called when a stage finished (successfully or with per-unit failures).
    fn on_stage_complete(&self, report: &StageReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// Event sink handed to each stage; forwards to the callback if one is set.
///
/// `Reporter::default()` reports nothing, which is what stand-alone stage
/// calls usually want.
#[derive(Clone, Default)]
pub struct Reporter {
    cb: Option<ProgressCallback>,
}

impl Reporter {
    pub fn new(cb: Option<ProgressCallback>) -> Self {
        Self { cb }
    }

    pub(crate) fn stage_start(&self, stage: Stage, total: usize) {
        if let Some(ref cb) = self.cb {
            cb.on_stage_start(stage, total);
        }
    }

    pub(crate) fn unit_complete(&self, stage: Stage, name: &str) {
        if let Some(ref cb) = self.cb {
            cb.on_unit_complete(stage, name);
        }
    }

    pub(crate) fn unit_error(&self, stage: Stage, name: &str, error: &str) {
        if let Some(ref cb) = self.cb {
            cb.on_unit_error(stage, name, error);
        }
    }

    pub(crate) fn stage_complete(&self, report: &StageReport) {
        if let Some(ref cb) = self.cb {
            cb.on_stage_complete(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        finished: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage, total: usize) {
            self.starts.fetch_add(total, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _stage: Stage, _name: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _stage: Stage, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _report: &StageReport) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Deskew, 3);
        cb.on_unit_complete(Stage::Deskew, "p1.png");
        cb.on_unit_error(Stage::Deskew, "p2.png", "unreadable");
        cb.on_stage_complete(&StageReport::new(Stage::Deskew));
    }

    #[test]
    fn reporter_forwards_events() {
        let tracker = Arc::new(TrackingCallback::default());
        let reporter = Reporter::new(Some(tracker.clone() as ProgressCallback));

        reporter.stage_start(Stage::Recognize, 3);
        reporter.unit_complete(Stage::Recognize, "a");
        reporter.unit_complete(Stage::Recognize, "b");
        reporter.unit_error(Stage::Recognize, "c", "timeout");
        reporter.stage_complete(&StageReport::new(Stage::Recognize));

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reporter_without_callback_is_silent() {
        let reporter = Reporter::default();
        reporter.stage_start(Stage::Merge, 1);
        reporter.unit_error(Stage::Merge, "x", "y");
    }
}
