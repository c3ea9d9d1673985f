//! Newtype wrappers for domain identifiers.

use std::fmt;

/// Identifier of a compiled trace.
///
/// Hosts issue trace ids starting at 1; id 0 never names a real trace
/// (the per-trace table reserves slot 0 for overflow). The raw mode word
/// reuses this value space, which is why the inner type is `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub i32);

impl TraceId {
    /// Whether this id can name a real compiled trace.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_display() {
        assert_eq!(TraceId(42).to_string(), "trace:42");
    }

    #[test]
    fn test_trace_id_validity() {
        assert!(TraceId(1).is_valid());
        assert!(!TraceId(0).is_valid());
        assert!(!TraceId(-3).is_valid());
    }
}
