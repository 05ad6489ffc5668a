//! Aggregate root trait for persisted domain models.

/// Aggregate root marker + minimal interface.
///
/// An aggregate root is the only unit a persistence layer addresses directly.
/// Anything it owns (child collections of value objects) is reached through
/// the root and has no identity of its own from the caller's point of view.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;
}
