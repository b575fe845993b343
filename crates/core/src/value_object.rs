//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two line inputs
/// with the same quantity, price and rate are interchangeable, while two
/// documents with the same totals are not.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Totals { subtotal: Decimal, tax: Decimal, total: Decimal }
///
/// impl ValueObject for Totals {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
