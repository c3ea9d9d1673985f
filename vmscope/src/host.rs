//! Host engine interface consumed by the sampling interrupt handler.
//!
//! The embedding VM exposes a read-only snapshot of its execution state
//! through [`HostEngine`]. Every method is invoked asynchronously from
//! signal context, preempting the very execution context that mutates
//! the underlying state, so implementations are held to the same rules
//! as the handler itself.

use crate::domain::TraceId;
use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicUsize, Ordering};

/// Compiled-code bounds for one trace, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCode {
    /// Start of the machine-code region.
    pub base: usize,
    /// Length of the machine-code region in bytes.
    pub len: usize,
    /// Offset of the loop entry within the region, or `None` when the
    /// trace has no loop. `Some(0)` is legal and classifies the whole
    /// region as loop.
    pub loop_entry: Option<u32>,
}

/// Read-only view of the host VM's execution state.
///
/// # Safety
///
/// Every method is called from the profiling signal handler, at an
/// arbitrary instruction boundary of the interrupted execution context.
/// Implementations must be async-signal-safe: plain loads of host state
/// only. No allocation, no locks, no formatted output, no syscalls, and
/// no calls into code the interrupt may have preempted mid-operation.
#[allow(unsafe_code)] // implementors vouch for async-signal-safety
pub unsafe trait HostEngine: Send + Sync {
    /// Current execution-mode word: positive means "executing compiled
    /// trace N", negative encodes a non-JIT mode (see
    /// [`vmscope_common::decode_mode`]).
    fn mode(&self) -> i32;

    /// Id of the trace the interpreter most recently fell out of, or 0.
    fn last_exit_trace(&self) -> i32;

    /// Id of the trace the collector is running for, or 0 when the
    /// collector was not entered from JIT context.
    fn gc_trace(&self) -> i32;

    /// Compiled-code bounds for `trace`, or `None` if the trace has
    /// been discarded. A `None` while a sample is in flight simply
    /// drops that sample.
    fn trace_code(&self, trace: TraceId) -> Option<TraceCode>;
}

/// Atomics-backed host used by the test suite and demo hosts.
///
/// Models a VM with a single compiled-code region shared by every trace
/// id, which is all the classifier ever needs to see. All state is
/// plain atomic loads/stores, satisfying the [`HostEngine`] contract.
#[derive(Debug, Default)]
pub struct SyntheticEngine {
    mode: AtomicI32,
    last_exit_trace: AtomicI32,
    gc_trace: AtomicI32,
    code_base: AtomicUsize,
    code_len: AtomicUsize,
    // loop entry offset, or -1 when the trace has no loop
    loop_entry: AtomicIsize,
}

impl SyntheticEngine {
    /// A fresh engine idling in the interpreter.
    #[must_use]
    pub fn new() -> Self {
        let engine = Self::default();
        engine.loop_entry.store(-1, Ordering::Relaxed);
        engine.set_mode(vmscope_common::encode_non_jit(
            vmscope_common::VmBucket::Interpreter,
        ));
        engine
    }

    /// Set the raw execution-mode word.
    pub fn set_mode(&self, mode: i32) {
        self.mode.store(mode, Ordering::Release);
    }

    /// Record the trace the interpreter last exited from.
    pub fn set_last_exit_trace(&self, trace: i32) {
        self.last_exit_trace.store(trace, Ordering::Release);
    }

    /// Record the trace the collector is running for.
    pub fn set_gc_trace(&self, trace: i32) {
        self.gc_trace.store(trace, Ordering::Release);
    }

    /// Install the machine-code region reported for every trace id.
    pub fn set_code(&self, code: TraceCode) {
        self.code_base.store(code.base, Ordering::Release);
        self.code_len.store(code.len, Ordering::Release);
        let entry = match code.loop_entry {
            Some(offset) => offset as isize,
            None => -1,
        };
        self.loop_entry.store(entry, Ordering::Release);
    }

    /// Forget the machine-code region, as if every trace were discarded.
    pub fn clear_code(&self) {
        self.code_len.store(0, Ordering::Release);
    }
}

#[allow(unsafe_code)] // contract: all accessors are plain atomic loads
unsafe impl HostEngine for SyntheticEngine {
    fn mode(&self) -> i32 {
        self.mode.load(Ordering::Acquire)
    }

    fn last_exit_trace(&self) -> i32 {
        self.last_exit_trace.load(Ordering::Acquire)
    }

    fn gc_trace(&self) -> i32 {
        self.gc_trace.load(Ordering::Acquire)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn trace_code(&self, _trace: TraceId) -> Option<TraceCode> {
        let len = self.code_len.load(Ordering::Acquire);
        if len == 0 {
            return None;
        }
        let entry = self.loop_entry.load(Ordering::Acquire);
        let loop_entry = if entry >= 0 { Some(entry as u32) } else { None };
        Some(TraceCode { base: self.code_base.load(Ordering::Acquire), len, loop_entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmscope_common::{encode_non_jit, VmBucket};

    #[test]
    fn test_synthetic_engine_starts_in_interpreter() {
        let engine = SyntheticEngine::new();
        assert_eq!(engine.mode(), encode_non_jit(VmBucket::Interpreter));
        assert_eq!(engine.last_exit_trace(), 0);
        assert_eq!(engine.gc_trace(), 0);
        assert!(engine.trace_code(TraceId(1)).is_none());
    }

    #[test]
    fn test_synthetic_engine_code_round_trip() {
        let engine = SyntheticEngine::new();
        let code = TraceCode { base: 0x4000, len: 256, loop_entry: Some(64) };
        engine.set_code(code);
        assert_eq!(engine.trace_code(TraceId(3)), Some(code));

        engine.set_code(TraceCode { base: 0x4000, len: 256, loop_entry: None });
        let reported = engine.trace_code(TraceId(3)).unwrap();
        assert_eq!(reported.loop_entry, None);

        engine.clear_code();
        assert!(engine.trace_code(TraceId(3)).is_none());
    }
}
