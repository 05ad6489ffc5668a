use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use roster_core::{RowId, UserId};

use super::r#trait::{Backend, BackendError, ParentWrite, UserFilter, WriteBatch};
use crate::mapping::{AggregateRecord, ChildRow, ParentRow};

#[derive(Debug, Clone, Default)]
struct Tables {
    parents: BTreeMap<Uuid, ParentRow>,
    /// Insertion order.
    children: Vec<ChildRow>,
}

impl Tables {
    fn record(&self, parent: &ParentRow) -> AggregateRecord {
        AggregateRecord {
            parent: parent.clone(),
            children: self
                .children
                .iter()
                .filter(|c| c.parent_id == parent.id)
                .cloned()
                .collect(),
        }
    }

    fn find(&self, filter: &UserFilter) -> Option<&ParentRow> {
        match filter {
            UserFilter::ById(id) => self.parents.get(id.as_uuid()),
            UserFilter::ByEmail(email) => self.parents.values().find(|p| &p.email == email),
        }
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), BackendError> {
        if let Some(ParentWrite::Insert(parent)) = &batch.parent {
            if self.parents.contains_key(&parent.id) {
                return Err(violation(format!("duplicate parent key {}", parent.id)));
            }
            self.parents.insert(parent.id, parent.clone());
        }

        let doomed: HashSet<RowId> = batch.delete_children.iter().copied().collect();
        if doomed.len() != batch.delete_children.len() {
            return Err(violation("batch deletes the same child row twice"));
        }
        let before = self.children.len();
        self.children.retain(|c| !doomed.contains(&c.row_id));
        if before - self.children.len() != doomed.len() {
            return Err(violation(
                "child row expected to be deleted no longer exists",
            ));
        }

        for row in batch.insert_children {
            if !self.parents.contains_key(&row.parent_id) {
                return Err(violation(format!(
                    "child row {} references missing parent {}",
                    row.row_id, row.parent_id
                )));
            }
            if self.children.iter().any(|c| c.row_id == row.row_id) {
                return Err(violation(format!("duplicate child key {}", row.row_id)));
            }
            self.children.push(row);
        }

        match batch.parent {
            Some(ParentWrite::Update(parent)) => match self.parents.get_mut(&parent.id) {
                Some(existing) => *existing = parent,
                None => {
                    return Err(violation(format!(
                        "parent {} expected to be updated no longer exists",
                        parent.id
                    )));
                }
            },
            Some(ParentWrite::Delete(id)) => {
                if self.children.iter().any(|c| c.parent_id == id) {
                    return Err(violation(format!("parent {id} still has child rows")));
                }
                if self.parents.remove(&id).is_none() {
                    return Err(violation(format!(
                        "parent {id} expected to be deleted no longer exists"
                    )));
                }
            }
            Some(ParentWrite::Insert(_)) | None => {}
        }

        Ok(())
    }
}

fn violation(msg: impl Into<String>) -> BackendError {
    BackendError::ConstraintViolation(msg.into())
}

fn poisoned() -> BackendError {
    BackendError::Unavailable("lock poisoned".to_string())
}

/// In-memory relational backend.
///
/// Intended for tests/dev. A batch is applied to a staging copy of the tables
/// and swapped in only if every write succeeded.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a complete aggregate record (parent first, then children).
    pub fn seed(&self, record: AggregateRecord) -> Result<(), BackendError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let mut staged = tables.clone();
        staged.apply(WriteBatch {
            parent: Some(ParentWrite::Insert(record.parent)),
            delete_children: Vec::new(),
            insert_children: record.children,
        })?;
        *tables = staged;
        Ok(())
    }

    /// Stored child rows of one parent, in insertion order.
    pub fn child_rows(&self, user_id: UserId) -> Result<Vec<ChildRow>, BackendError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .children
            .iter()
            .filter(|c| c.parent_id == *user_id.as_uuid())
            .cloned()
            .collect())
    }

    pub fn parent_count(&self) -> Result<usize, BackendError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.parents.len())
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    #[instrument(skip(self), err)]
    async fn load(&self, filter: &UserFilter) -> Result<Option<AggregateRecord>, BackendError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.find(filter).map(|parent| tables.record(parent)))
    }

    #[instrument(
        skip(self, batch),
        fields(
            deletes = batch.delete_children.len(),
            inserts = batch.insert_children.len()
        ),
        err
    )]
    async fn apply(&self, batch: WriteBatch) -> Result<(), BackendError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let mut staged = tables.clone();
        staged.apply(batch)?;
        *tables = staged;
        Ok(())
    }

    fn generate_surrogate_key(&self) -> RowId {
        RowId::new()
    }
}
