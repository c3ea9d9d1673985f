//! # vmscope - Signal-Driven VM Execution-Mode Profiler
//!
//! vmscope is a low-overhead sampling profiler for embedding in a
//! managed-language VM with a tracing JIT. A periodic CPU-time
//! interrupt attributes each sample to what the VM was doing at that
//! instant - interpreting, collecting garbage, or executing a compiled
//! trace (split into head, loop, and foreign-call regions) - and bumps
//! counters in a file-backed shared store that external tooling can
//! read live.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Embedding Host VM                       │
//! │    (interpreter / GC / JIT-compiled traces)              │
//! └──────────────┬───────────────────────────────────────────┘
//!                │ Control Surface: open/select/start/stop
//!                ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                 vmscope (this crate)                     │
//! │                                                          │
//! │  SIGPROF ──▶ interrupt handler ──▶ classification        │
//! │                   │                     │                │
//! │                   │ host-state snapshot │ verdict        │
//! │                   ▼                     ▼                │
//! │            HostEngine trait      active CounterStore ────┼──▶ mmap'd
//! │                                  (atomic pointer swap)   │    counter file
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`classification`]: pure sample-classification logic; host state
//!   snapshot in, counter-bucket verdict out
//! - [`host`]: the read-only [`host::HostEngine`] interface the VM
//!   implements, plus a synthetic engine for tests and demos
//! - [`interrupt`]: SIGPROF timer arming and the sampling handler
//! - [`store`]: file-backed counter mappings and the active-store
//!   selector
//! - [`profiler`]: the control surface bridging the above to the host
//! - [`domain`]: core domain types and structured errors
//!
//! The counter-file wire format lives in the `vmscope-common` crate,
//! shared with any external reader of the counter file.
//!
//! ## Interrupt-Context Rules
//!
//! The handler preempts the profiled execution context itself; it is
//! not a thread. Everything it reaches - host accessors, classifier,
//! counter increments - must not block, allocate, lock, or produce
//! output. Conditions that cannot be resolved by a bucket fallback drop
//! the sample; host correctness always wins over profiling
//! completeness.
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmscope::{CounterFile, Profiler};
//! # use vmscope::host::SyntheticEngine;
//!
//! # fn main() -> Result<(), vmscope::ProfilerError> {
//! let engine = Arc::new(SyntheticEngine::new());
//! let mut profiler = Profiler::new(engine);
//!
//! let counters = CounterFile::open("/tmp/vm.counters")?;
//! profiler.select(&counters);
//! profiler.start()?;
//! // ... run the VM ...
//! profiler.stop();
//! profiler.deselect();
//! # Ok(())
//! # }
//! ```

pub mod classification;
pub mod domain;
pub mod host;
pub(crate) mod interrupt;
pub mod profiler;
pub mod store;

// Re-export the primary surface for convenience
pub use domain::{ProfilerError, TraceId};
pub use host::{HostEngine, TraceCode};
pub use profiler::{Profiler, DEFAULT_INTERVAL};
pub use store::{CounterFile, StoreSelector};
pub use vmscope_common as wire;
