//! # Counter File Wire Format (profiler ↔ reader)
//!
//! Defines the shared-memory counter layout written by the sampling
//! interrupt handler and read by external tooling, possibly from another
//! process while profiling is still running. All types use `#[repr(C)]`
//! so the byte layout is stable across the process boundary.
//!
//! This is a wire format, not an in-memory convenience structure. Field
//! offsets are fixed within a major version:
//!
//! ```text
//! offset   0  magic   u32                  0x1d50_f007
//! offset   4  major   u8                   3
//! offset   5  minor   u8                   0
//! offset   6  _pad    [u8; 2]
//! offset   8  vm      [u64; 9]             global buckets, see [`VmBucket`]
//! offset  80  trace   [TraceBuckets; 4097] per-trace table, slot 0 = overflow
//! total 163_960 bytes
//! ```
//!
//! Readers must check [`CounterStore::header_valid`] before trusting the
//! contents. Counters are monotonically increasing; a concurrent reader
//! may see a torn view of the sample currently being recorded, but never
//! of completed history.

#![cfg_attr(not(test), no_std)]

/// Sentinel identifying an initialized counter region.
///
/// A region without this value at offset 0 is uninitialized or not a
/// counter file at all.
pub const MAGIC: u32 = 0x1d50_f007;

/// Format major version. Readers must reject a mismatch.
pub const VERSION_MAJOR: u8 = 3;

/// Format minor version. Minor bumps are additive and safe to ignore.
pub const VERSION_MINOR: u8 = 0;

/// Number of global execution-mode buckets in [`CounterStore::vm`].
pub const VM_BUCKETS: usize = 9;

/// Number of non-JIT modes the host may encode in a negative mode word
/// (bucket indices `0..NON_JIT_MODES`). The JIT buckets above this range
/// are derived by the classifier, never encoded by the host.
pub const NON_JIT_MODES: usize = 5;

/// Highest trace id with its own slot in the per-trace table.
///
/// Ids strictly greater than this fold into overflow slot 0. An id equal
/// to the bound keeps its own slot. Hosts never issue trace id 0, so
/// slot 0 is exclusively the overflow bucket.
pub const TRACE_MAX: i32 = 4096;

/// Length of the per-trace table (`TRACE_MAX` real slots plus overflow).
pub const TRACE_SLOTS: usize = TRACE_MAX as usize + 1;

/// Global execution-mode buckets, in wire order.
///
/// `Interpreter..=Exception` are host-encodable modes: a negative mode
/// word `m` names bucket `!m`. `JitGc..=JitHead` exist only as classifier
/// verdicts for samples attributed to a compiled trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VmBucket {
    /// Plain interpretation, no trace attributed.
    Interpreter = 0,
    /// Garbage collection outside JIT context.
    GarbageCollect = 1,
    /// Trace-exit handling.
    Exit = 2,
    /// Trace recording.
    Record = 3,
    /// Exception/error unwinding.
    Exception = 4,
    /// Collector running on behalf of a compiled trace.
    JitGc = 5,
    /// Control left a trace's machine code (foreign/native call).
    JitFfi = 6,
    /// Inside a trace's machine code, at or past the loop entry.
    JitLoop = 7,
    /// Inside a trace's machine code, before the loop entry.
    JitHead = 8,
}

/// Decoded form of the host's execution-mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Executing the machine code of compiled trace `N` (always > 0).
    Trace(i32),
    /// One of the named non-JIT modes, as a bucket index.
    NonJit(u32),
}

/// Decode a raw mode word.
///
/// A positive word is the id of the trace currently executing; a
/// negative word `m` encodes bucket index `!m`. The word 0 never occurs
/// (trace ids start at 1) and decodes as `Trace(0)`, which the
/// classifier drops.
#[must_use]
#[allow(clippy::cast_sign_loss)] // !m is non-negative for m < 0
pub const fn decode_mode(mode: i32) -> ExecMode {
    if mode >= 0 {
        ExecMode::Trace(mode)
    } else {
        ExecMode::NonJit(!mode as u32)
    }
}

/// Encode a non-JIT bucket as a mode word, the inverse of [`decode_mode`].
///
/// Only meaningful for the host-encodable buckets
/// (`Interpreter..=Exception`).
#[must_use]
pub const fn encode_non_jit(bucket: VmBucket) -> i32 {
    !(bucket as i32)
}

/// Per-trace sub-bucket names.
///
/// Each sub-bucket is paired with exactly one global bucket; using
/// [`TraceSlot::global_bucket`] for the paired increment makes a
/// mismatched pair unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSlot {
    /// Interpreter entered right after this trace exited.
    Interp,
    /// Collector running for this trace.
    Gc,
    /// Instruction pointer outside the trace's code region.
    Ffi,
    /// At or past the loop entry offset.
    Loop,
    /// Before the loop entry offset.
    Head,
}

impl TraceSlot {
    /// The global bucket that accompanies this sub-bucket.
    ///
    /// Note `Interp` pairs with `Interpreter`, not a `Jit*` bucket: the
    /// VM is not executing machine code at that instant.
    #[must_use]
    pub const fn global_bucket(self) -> VmBucket {
        match self {
            TraceSlot::Interp => VmBucket::Interpreter,
            TraceSlot::Gc => VmBucket::JitGc,
            TraceSlot::Ffi => VmBucket::JitFfi,
            TraceSlot::Loop => VmBucket::JitLoop,
            TraceSlot::Head => VmBucket::JitHead,
        }
    }
}

/// Sample counts for one compiled trace. 40 bytes on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceBuckets {
    /// Interpreter samples attributed to this trace (post-exit).
    pub interp: u64,
    /// Collector samples while collecting for this trace.
    pub gc: u64,
    /// Samples with the instruction pointer outside the code region.
    pub ffi: u64,
    /// Samples at or past the loop entry.
    pub in_loop: u64,
    /// Samples in the pre-loop entry/setup code.
    pub head: u64,
}

impl TraceBuckets {
    /// Bump the named sub-bucket. Plain increment; the interrupt handler
    /// is the only writer while a store is active.
    pub fn bump(&mut self, slot: TraceSlot) {
        match slot {
            TraceSlot::Interp => self.interp += 1,
            TraceSlot::Gc => self.gc += 1,
            TraceSlot::Ffi => self.ffi += 1,
            TraceSlot::Loop => self.in_loop += 1,
            TraceSlot::Head => self.head += 1,
        }
    }

    /// Total samples attributed to this trace.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.interp + self.gc + self.ffi + self.in_loop + self.head
    }
}

/// The shared counter region.
///
/// Created zeroed and stamped before use, mutated exclusively by the
/// interrupt handler while active, readable by external tooling at any
/// time. The region's lifetime is independent of any one profiling
/// session: a store can accumulate across start/stop cycles and be
/// swapped out while profiling continues into another store.
#[repr(C)]
pub struct CounterStore {
    /// Must equal [`MAGIC`].
    pub magic: u32,
    /// Must equal [`VERSION_MAJOR`] for a reader to proceed.
    pub major: u8,
    /// Informational; additive changes only.
    pub minor: u8,
    /// Explicit padding so `vm` lands at offset 8.
    #[allow(clippy::pub_underscore_fields)]
    pub _pad: [u8; 2],
    /// Global buckets, indexed by [`VmBucket`].
    pub vm: [u64; VM_BUCKETS],
    /// Per-trace table; slot 0 is the overflow bucket for ids beyond
    /// [`TRACE_MAX`].
    pub trace: [TraceBuckets; TRACE_SLOTS],
}

impl CounterStore {
    /// Fixed size of the wire layout. The host sizes the backing region
    /// with this; it never changes within a major version.
    pub const SIZE: usize = core::mem::size_of::<CounterStore>();

    /// Zero a freshly mapped region and stamp the header.
    ///
    /// Must run before the region is made active.
    ///
    /// # Safety
    ///
    /// `region` must point to at least [`CounterStore::SIZE`] writable
    /// bytes that no handler is currently targeting.
    #[allow(unsafe_code)] // raw region initialization
    pub unsafe fn initialize(region: *mut CounterStore) {
        core::ptr::write_bytes(region.cast::<u8>(), 0, Self::SIZE);
        (*region).magic = MAGIC;
        (*region).major = VERSION_MAJOR;
        (*region).minor = VERSION_MINOR;
    }

    /// Reader-side validation: magic present and major version matches.
    #[must_use]
    pub fn header_valid(&self) -> bool {
        self.magic == MAGIC && self.major == VERSION_MAJOR
    }

    /// Sum of all global buckets (total samples recorded).
    #[must_use]
    pub fn vm_total(&self) -> u64 {
        self.vm.iter().sum()
    }
}

// Pin the wire layout. A failure here means an accidental format break.
const _: () = {
    assert!(core::mem::size_of::<TraceBuckets>() == 40);
    assert!(core::mem::offset_of!(CounterStore, magic) == 0);
    assert!(core::mem::offset_of!(CounterStore, major) == 4);
    assert!(core::mem::offset_of!(CounterStore, minor) == 5);
    assert!(core::mem::offset_of!(CounterStore, vm) == 8);
    assert!(core::mem::offset_of!(CounterStore, trace) == 80);
    assert!(CounterStore::SIZE == 80 + TRACE_SLOTS * 40);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_size_is_stable() {
        assert_eq!(CounterStore::SIZE, 163_960);
    }

    #[test]
    fn test_initialize_zeroes_and_stamps() {
        let mut store: Box<CounterStore> = unsafe {
            let layout = std::alloc::Layout::new::<CounterStore>();
            let raw = std::alloc::alloc(layout).cast::<CounterStore>();
            CounterStore::initialize(raw);
            Box::from_raw(raw)
        };
        assert!(store.header_valid());
        assert_eq!(store.minor, VERSION_MINOR);
        assert_eq!(store.vm_total(), 0);
        assert_eq!(store.trace[0].total(), 0);
        assert_eq!(store.trace[TRACE_SLOTS - 1].total(), 0);

        store.magic = 0;
        assert!(!store.header_valid());
    }

    #[test]
    fn test_major_mismatch_rejected() {
        let mut store = CounterStore {
            magic: MAGIC,
            major: VERSION_MAJOR + 1,
            minor: 0,
            _pad: [0; 2],
            vm: [0; VM_BUCKETS],
            trace: [TraceBuckets::default(); TRACE_SLOTS],
        };
        assert!(!store.header_valid());
        store.major = VERSION_MAJOR;
        assert!(store.header_valid());
    }

    #[test]
    fn test_mode_word_round_trip() {
        assert_eq!(decode_mode(7), ExecMode::Trace(7));
        assert_eq!(
            decode_mode(encode_non_jit(VmBucket::Interpreter)),
            ExecMode::NonJit(VmBucket::Interpreter as u32)
        );
        assert_eq!(
            decode_mode(encode_non_jit(VmBucket::Exception)),
            ExecMode::NonJit(VmBucket::Exception as u32)
        );
        // 0 decodes as a trace word; the classifier drops it because
        // trace ids start at 1.
        assert_eq!(decode_mode(0), ExecMode::Trace(0));
    }

    #[test]
    fn test_bump_and_total() {
        let mut buckets = TraceBuckets::default();
        buckets.bump(TraceSlot::Head);
        buckets.bump(TraceSlot::Loop);
        buckets.bump(TraceSlot::Loop);
        assert_eq!(buckets.head, 1);
        assert_eq!(buckets.in_loop, 2);
        assert_eq!(buckets.total(), 3);
    }

    #[test]
    fn test_sub_bucket_global_pairing() {
        assert_eq!(TraceSlot::Interp.global_bucket(), VmBucket::Interpreter);
        assert_eq!(TraceSlot::Gc.global_bucket(), VmBucket::JitGc);
        assert_eq!(TraceSlot::Ffi.global_bucket(), VmBucket::JitFfi);
        assert_eq!(TraceSlot::Loop.global_bucket(), VmBucket::JitLoop);
        assert_eq!(TraceSlot::Head.global_bucket(), VmBucket::JitHead);
    }
}
