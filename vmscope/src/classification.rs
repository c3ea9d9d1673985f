//! Sample classification: execution state → counter bucket.
//!
//! Pure decision logic with no side effects; the interrupt handler
//! feeds it the host's state snapshot and applies the returned verdict
//! to the active counter store. Keeping this free of any output or
//! allocation is what makes it legal to run in signal context.
//!
//! # Decision procedure
//!
//! 1. Resolve an attributed trace: active JIT machine code names its
//!    own trace; a collector entered from JIT context names the trace
//!    it is collecting for; the interpreter right after a trace exit
//!    names that trace. Otherwise no trace is attributed.
//! 2. No trace: the sample lands in the global bucket the mode word
//!    names. A mode index outside the host-encodable range drops the
//!    sample.
//! 3. Trace attributed: the sample lands in both a per-trace sub-bucket
//!    and its paired global bucket. For samples that interrupted the
//!    trace's own machine code, the instruction-pointer offset decides
//!    between foreign-call, loop, and head regions:
//!
//! ```text
//! ip < base            → ffi    (left the code region)
//! ip >= base + len     → ffi
//! offset >= loop entry → loop   (loop entry defined)
//! otherwise            → head   (entry/setup code)
//! ```
//!
//! The bounds are exact: inclusive at 0, exclusive at `len`, inclusive
//! at the loop entry. They are the only way to tell "inside compiled
//! code" from "called out to native code" from "looping" from
//! "warming up".

use crate::domain::TraceId;
use crate::host::TraceCode;
use vmscope_common::{TraceSlot, VmBucket, NON_JIT_MODES, TRACE_MAX};

/// Host state snapshot for one sample, read at interrupt time.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext {
    /// Raw execution-mode word.
    pub mode: i32,
    /// Trace the collector is running for, or 0.
    pub gc_trace: i32,
    /// Trace the interpreter last fell out of, or 0.
    pub last_exit_trace: i32,
    /// Interrupted instruction pointer, from signal delivery.
    pub ip: usize,
}

/// Where one sample is recorded.
///
/// A `PerTrace` verdict carries the sub-bucket; the paired global
/// bucket is always `sub.global_bucket()`, so the two increments can
/// never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The sample is lost: an unresolvable condition in interrupt
    /// context (unknown mode index, trace discarded mid-flight).
    Drop,
    /// Increment one global bucket only.
    Global(VmBucket),
    /// Increment per-trace sub-bucket `sub` in table slot `slot`, plus
    /// the paired global bucket.
    PerTrace {
        /// Per-trace table index, already folded for overflow.
        slot: usize,
        /// Sub-bucket within the slot.
        sub: TraceSlot,
    },
}

/// Resolve the trace a sample is attributed to, if any.
///
/// Order matters: active machine code wins, then the collector's JIT
/// context, then the interpreter's post-exit attribution.
#[must_use]
pub fn attributed_trace(mode: i32, gc_trace: i32, last_exit_trace: i32) -> Option<i32> {
    if mode > 0 {
        return Some(mode);
    }
    if mode == 0 {
        return None;
    }
    let index = !mode;
    if index == VmBucket::GarbageCollect as i32 && gc_trace > 0 {
        Some(gc_trace)
    } else if index == VmBucket::Interpreter as i32 && last_exit_trace > 0 {
        Some(last_exit_trace)
    } else {
        None
    }
}

/// Fold a trace id into its per-trace table slot.
///
/// Ids above [`TRACE_MAX`] share overflow slot 0; an id equal to the
/// bound keeps its own slot. Callers guarantee `trace > 0`.
#[must_use]
#[allow(clippy::cast_sign_loss)] // callers guarantee trace > 0
pub fn table_slot(trace: i32) -> usize {
    if trace > TRACE_MAX {
        0
    } else {
        trace as usize
    }
}

/// Classify one sample.
///
/// `code` resolves a trace id to its compiled-code bounds and is only
/// consulted when the sample interrupted the trace's own machine code;
/// the collector and post-exit-interpreter cases never need bounds.
#[must_use]
#[allow(clippy::cast_sign_loss)] // !mode is non-negative for mode < 0
pub fn classify<F>(ctx: &SampleContext, code: F) -> Verdict
where
    F: FnOnce(TraceId) -> Option<TraceCode>,
{
    let Some(trace) = attributed_trace(ctx.mode, ctx.gc_trace, ctx.last_exit_trace) else {
        // Mode word 0 would name trace id 0, which no host issues.
        if ctx.mode >= 0 {
            return Verdict::Drop;
        }
        return match mode_bucket((!ctx.mode) as u32) {
            Some(bucket) => Verdict::Global(bucket),
            None => Verdict::Drop,
        };
    };

    let slot = table_slot(trace);
    if ctx.mode < 0 {
        // Attribution without active machine code: either the collector
        // running for this trace, or the interpreter just after its exit.
        let sub = if (!ctx.mode) == VmBucket::GarbageCollect as i32 {
            TraceSlot::Gc
        } else {
            TraceSlot::Interp
        };
        return Verdict::PerTrace { slot, sub };
    }

    // The sample interrupted the trace's own machine code (or a call
    // out of it). Bounds lookup is the one fallible step.
    let Some(code) = code(TraceId(trace)) else {
        return Verdict::Drop;
    };
    // An ip below base wraps to a huge offset, folding the "negative
    // offset" case into the >= len comparison.
    let offset = ctx.ip.wrapping_sub(code.base);
    let sub = if offset >= code.len {
        TraceSlot::Ffi
    } else {
        match code.loop_entry {
            Some(entry) if offset >= entry as usize => TraceSlot::Loop,
            _ => TraceSlot::Head,
        }
    };
    Verdict::PerTrace { slot, sub }
}

/// Map a host-encoded mode index to its global bucket, rejecting
/// indices outside the pass-through range.
fn mode_bucket(index: u32) -> Option<VmBucket> {
    if index as usize >= NON_JIT_MODES {
        return None;
    }
    Some(match index {
        0 => VmBucket::Interpreter,
        1 => VmBucket::GarbageCollect,
        2 => VmBucket::Exit,
        3 => VmBucket::Record,
        _ => VmBucket::Exception,
    })
}
