//! Value object trait: equality by value, not identity.
//!
//! Value objects carry no identity of their own. When one is owned by an
//! aggregate and stored as a child row, the row gets a surrogate key, but that
//! key never takes part in comparisons: two owned values holding the same
//! attributes are the same value.

/// Marker trait for value objects.
///
/// ## Owned collections
///
/// An aggregate that owns a collection of value objects treats it as a set:
/// no two members may be equal. Persistence code relies on that to match
/// in-memory members against stored rows purely by value, which is why
/// `Eq` and `Hash` are part of the contract here and not just `PartialEq`.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct Tag(String);
///
/// impl ValueObject for Tag {}
///
/// assert_eq!(Tag("a".into()), Tag("a".into()));
/// ```
pub trait ValueObject: Clone + Eq + core::hash::Hash + core::fmt::Debug {}
