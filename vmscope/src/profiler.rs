//! Control surface exposed to the embedding host: open/close counter
//! files, select the active store, start and stop sampling sessions.

use crate::domain::ProfilerError;
use crate::host::HostEngine;
use crate::interrupt::{InterruptController, SessionShared};
use crate::store::{CounterFile, StoreSelector};
use log::info;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use vmscope_common::CounterStore;

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1);

/// One profiling context: a host-engine handle, an active-store
/// selector, and at most one running session per process at a time.
///
/// The selector is the only state shared with interrupt context;
/// everything else is mutated from normal context while stopped.
pub struct Profiler {
    host: Arc<dyn HostEngine>,
    selector: Arc<StoreSelector>,
    controller: InterruptController,
}

impl Profiler {
    /// A profiler bound to `host`, with no store selected and no
    /// session running.
    #[must_use]
    pub fn new(host: Arc<dyn HostEngine>) -> Self {
        Self {
            host,
            selector: Arc::new(StoreSelector::new()),
            controller: InterruptController::new(),
        }
    }

    /// Make `file` the active store, returning the previously active
    /// raw store pointer (null when none). Safe to call while a session
    /// is running; the swap is atomic from the handler's point of view.
    pub fn select(&self, file: &CounterFile) -> *mut CounterStore {
        info!("selecting counter store {}", file.path().display());
        self.selector.select(file.store_ptr())
    }

    /// Deselect the active store; subsequent samples are dropped.
    /// Required before closing the file a running session writes to.
    pub fn deselect(&self) -> *mut CounterStore {
        self.selector.select(ptr::null_mut())
    }

    /// Start a session at [`DEFAULT_INTERVAL`].
    pub fn start(&mut self) -> Result<(), ProfilerError> {
        self.start_with_interval(DEFAULT_INTERVAL)
    }

    /// Start a session sampling every `interval` of consumed CPU time
    /// (idle time is never sampled). The host-state accessors are bound
    /// at this point.
    ///
    /// Returns [`ProfilerError::AlreadyRunning`] if a session is
    /// already active: one profiling session per process at a time.
    pub fn start_with_interval(&mut self, interval: Duration) -> Result<(), ProfilerError> {
        if self.controller.is_running() {
            return Err(ProfilerError::AlreadyRunning);
        }
        let session = SessionShared {
            host: Arc::clone(&self.host),
            selector: Arc::clone(&self.selector),
        };
        self.controller.start(session, interval)?;
        info!("profiling started, interval {interval:?}");
        Ok(())
    }

    /// Stop the running session: disarm the timer and restore the
    /// previous signal handler. A sample in flight at the moment of the
    /// call may still land. No-op while stopped.
    pub fn stop(&mut self) {
        if self.controller.is_running() {
            self.controller.stop();
            info!("profiling stopped");
        }
    }

    /// Whether a session is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SyntheticEngine;

    #[test]
    fn test_select_returns_previous() {
        let profiler = Profiler::new(Arc::new(SyntheticEngine::new()));
        let dir = tempfile::tempdir().expect("tempdir");
        let first = CounterFile::open(dir.path().join("a.counters")).expect("open a");
        let second = CounterFile::open(dir.path().join("b.counters")).expect("open b");

        assert!(profiler.select(&first).is_null());
        assert_eq!(profiler.select(&second), first.store_ptr());
        assert_eq!(profiler.deselect(), second.store_ptr());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut profiler = Profiler::new(Arc::new(SyntheticEngine::new()));
        assert!(!profiler.is_running());
        profiler.stop();
        assert!(!profiler.is_running());
    }
}
