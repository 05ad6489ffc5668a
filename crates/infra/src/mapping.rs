//! Relational mapping of an aggregate and its owned collection.
//!
//! Storage shape: one parent row per aggregate, one child row per owned value.
//! Child rows carry a backend-generated surrogate key and a foreign key to the
//! parent; they are never exposed as entities of their own.

use uuid::Uuid;

use roster_core::{AggregateRoot, DomainError, DomainResult, RowId, UserId, ValueObject};
use roster_identity::{Role, User};

use crate::diff::TrackedRow;

/// Parent relation row: `(id PRIMARY KEY, email)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRow {
    pub id: Uuid,
    pub email: String,
}

/// Child relation row: `(row_id PRIMARY KEY, parent_id REFERENCES parent, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRow {
    pub row_id: RowId,
    pub parent_id: Uuid,
    pub value: String,
}

/// A parent row together with all of its child rows, as read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRecord {
    pub parent: ParentRow,
    pub children: Vec<ChildRow>,
}

/// Table and column names of a parent/child pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub schema: &'static str,
    pub parent_table: &'static str,
    pub parent_key: &'static str,
    pub parent_email: &'static str,
    pub child_table: &'static str,
    pub child_key: &'static str,
    pub child_parent_key: &'static str,
    pub child_value: &'static str,
}

impl TableMapping {
    pub fn parent(&self) -> String {
        quote_qualified(self.schema, self.parent_table)
    }

    pub fn child(&self) -> String {
        quote_qualified(self.schema, self.child_table)
    }
}

fn quote_qualified(schema: &str, table: &str) -> String {
    format!("\"{schema}\".\"{table}\"")
}

/// How one aggregate type and its owned collection map onto rows.
///
/// Child rows are only ever reached through the root: there is no way to load
/// or address one on its own.
pub trait OwnedCollectionMapping {
    type Root: AggregateRoot;
    type Owned: ValueObject;

    const TABLES: TableMapping;

    fn parent_row(root: &Self::Root) -> ParentRow;

    /// The owned values currently held in memory, in collection order.
    fn owned_values(root: &Self::Root) -> &[Self::Owned];

    /// Row for a newly owned value.
    fn child_row(owned: &Self::Owned, parent_id: Uuid, row_id: RowId) -> ChildRow;

    /// A stored child row as tracked state, keyed by its surrogate key.
    fn tracked_row(row: &ChildRow) -> TrackedRow<Self::Owned>;

    /// Build the aggregate from a stored record.
    fn materialize(record: &AggregateRecord) -> DomainResult<Self::Root>;
}

/// `User` ↔ `"user"."User"` / `"user"."UserRole"`.
#[derive(Debug, Copy, Clone, Default)]
pub struct UserMapping;

impl OwnedCollectionMapping for UserMapping {
    type Root = User;
    type Owned = Role;

    const TABLES: TableMapping = TableMapping {
        schema: "user",
        parent_table: "User",
        parent_key: "UserId",
        parent_email: "Email",
        child_table: "UserRole",
        child_key: "RoleAssignmentId",
        child_parent_key: "UserId",
        child_value: "Role",
    };

    fn parent_row(root: &User) -> ParentRow {
        ParentRow {
            id: root.id().into(),
            email: root.email().to_string(),
        }
    }

    fn owned_values(root: &User) -> &[Role] {
        root.roles()
    }

    fn child_row(owned: &Role, parent_id: Uuid, row_id: RowId) -> ChildRow {
        ChildRow {
            row_id,
            parent_id,
            value: owned.as_str().to_string(),
        }
    }

    fn tracked_row(row: &ChildRow) -> TrackedRow<Role> {
        TrackedRow {
            row_id: row.row_id,
            value: Role::new(row.value.clone()),
        }
    }

    fn materialize(record: &AggregateRecord) -> DomainResult<User> {
        if let Some(stray) = record
            .children
            .iter()
            .find(|c| c.parent_id != record.parent.id)
        {
            return Err(DomainError::invariant(format!(
                "child row {} belongs to {}, not {}",
                stray.row_id, stray.parent_id, record.parent.id
            )));
        }

        Ok(User::with_roles(
            UserId::from_uuid(record.parent.id),
            record.parent.email.clone(),
            record.children.iter().map(|c| Role::new(c.value.clone())),
        ))
    }
}
