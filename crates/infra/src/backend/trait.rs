use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use roster_core::{RowId, UserId};

use crate::mapping::{AggregateRecord, ChildRow, ParentRow};

/// Predicate selecting one aggregate to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    ById(UserId),
    /// First match ordered by primary key.
    ByEmail(String),
}

/// Write against the parent row of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentWrite {
    Insert(ParentRow),
    Update(ParentRow),
    Delete(Uuid),
}

/// All row writes of one save, applied atomically.
///
/// Application order: parent insert, child deletes, child inserts, parent
/// update, parent delete. Deletes go before inserts so that a backend
/// enforcing uniqueness on child values never sees both generations at once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteBatch {
    pub parent: Option<ParentWrite>,
    pub delete_children: Vec<RowId>,
    pub insert_children: Vec<ChildRow>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.parent.is_none() && self.delete_children.is_empty() && self.insert_children.is_empty()
    }
}

/// Backend operation error.
///
/// Backends report failures unmodified; nothing above them retries.
///
/// ## Error Categories
///
/// - **Unavailable**: storage could not be reached (pool, network, lock)
/// - **ConstraintViolation**: a key, foreign-key or row-count check failed;
///   the batch was not applied
/// - **Corrupt**: stored data could not be decoded into rows
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

/// Persistence engine the unit of work reads from and writes to.
///
/// `load` and `apply` are the only operations that may suspend.
///
/// Implementations must:
/// - return `Ok(None)` when the filter matches nothing
/// - apply a [`WriteBatch`] entirely or not at all
/// - generate surrogate keys that are unique across the child relation
#[async_trait]
pub trait Backend: Send + Sync {
    async fn load(&self, filter: &UserFilter) -> Result<Option<AggregateRecord>, BackendError>;

    async fn apply(&self, batch: WriteBatch) -> Result<(), BackendError>;

    fn generate_surrogate_key(&self) -> RowId;
}

#[async_trait]
impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    async fn load(&self, filter: &UserFilter) -> Result<Option<AggregateRecord>, BackendError> {
        (**self).load(filter).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), BackendError> {
        (**self).apply(batch).await
    }

    fn generate_surrogate_key(&self) -> RowId {
        (**self).generate_surrogate_key()
    }
}
