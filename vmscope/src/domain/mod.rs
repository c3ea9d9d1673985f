//! Domain model for vmscope
//!
//! Core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use errors::ProfilerError;
pub use types::TraceId;
