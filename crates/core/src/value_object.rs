//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// A value object is defined entirely by its attributes. Two instances with the
/// same attributes are interchangeable, and "changing" one means building a new
/// one. Staging rows copied from a purchase request are the typical example:
/// they carry no identity of their own and disappear once converted.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
