//! User aggregate: identity, email and an owned set of roles.

use roster_core::{AggregateRoot, UserId};

use crate::reconcile::{reconcile, Reconciliation};
use crate::Role;

// ─────────────────────────────────────────────────────────────────────────────
// User Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// User aggregate root.
///
/// # Invariants
/// - `id` never changes after construction.
/// - `roles` never holds two equal roles.
/// - `roles` only changes through [`User::set_roles`]; callers get a read-only
///   slice, and persistence code only ever borrows the user immutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    email: String,
    roles: Vec<Role>,
}

impl User {
    /// A user holding no roles.
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            roles: Vec::new(),
        }
    }

    /// A user with an initial role set (deduplicated, absent entries dropped).
    pub fn with_roles<I>(id: UserId, email: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Option<Role>>,
    {
        let mut user = Self::new(id, email);
        user.set_roles(roles);
        user
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Read-only view of the owned roles, in the order they were set.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Replace the role set if the proposal differs from it as a set.
    ///
    /// Absent entries and duplicates in `roles` are dropped silently.
    /// Returns `true` when the collection changed.
    pub fn set_roles<I>(&mut self, roles: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Option<Role>>,
    {
        let outcome = reconcile(&mut self.roles, roles);
        if outcome == Reconciliation::Replaced {
            tracing::debug!(user_id = %self.id, roles = self.roles.len(), "user roles replaced");
        }
        outcome.changed()
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
