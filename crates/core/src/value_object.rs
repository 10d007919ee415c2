//! Value object marker.

/// Marker for immutable values compared by their attributes (currency codes,
/// exchange rates, role names).
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Currency(String);
///
/// impl ValueObject for Currency {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
