//! Structured error types for vmscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! All variants are setup failures reported synchronously to the caller.
//! Nothing here is ever raised from interrupt context: a sample that
//! cannot be classified there is dropped, never turned into an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("failed to create counter file {path:?}: {source}")]
    CounterFileCreate { path: PathBuf, source: std::io::Error },

    #[error("failed to size counter file {path:?} to {size} bytes: {source}")]
    CounterFileSize { path: PathBuf, size: usize, source: std::io::Error },

    #[error("failed to map counter file {path:?}: {source}")]
    CounterFileMap { path: PathBuf, source: std::io::Error },

    #[error("counter file path {0:?} contains an interior NUL byte")]
    CounterFilePath(PathBuf),

    #[error("failed to install the SIGPROF handler: {0}")]
    HandlerInstall(std::io::Error),

    #[error("failed to arm the profiling interval timer: {0}")]
    TimerArm(std::io::Error),

    #[error("a profiling session is already running")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_file_error_display() {
        let err = ProfilerError::CounterFileSize {
            path: PathBuf::from("/tmp/vm.counters"),
            size: 163_960,
            source: std::io::Error::from_raw_os_error(libc::ENOSPC),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/vm.counters"));
        assert!(msg.contains("163960"));
    }

    #[test]
    fn test_already_running_display() {
        let err = ProfilerError::AlreadyRunning;
        assert_eq!(err.to_string(), "a profiling session is already running");
    }
}
