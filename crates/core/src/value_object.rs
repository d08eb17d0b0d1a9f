//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attribute values, e.g. a
/// pack size of 12 pieces per carton or a staged quantity change. They are immutable:
/// to "modify" one, build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct PackSize(i64);
///
/// impl ValueObject for PackSize {}
///
/// assert_eq!(PackSize(12), PackSize(12));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
