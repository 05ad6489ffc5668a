//! Unit of work over user aggregates.
//!
//! A [`Session`] is an explicit handle: it owns the tracked snapshots of every
//! aggregate loaded or added through it and is dropped at the end of the unit
//! of work. Nothing is cached process-wide.
//!
//! Per aggregate the lifecycle is `Unmodified → Modified → (save) →
//! Unmodified`, or `Detached` when the aggregate never went through the
//! session. `save` borrows the session mutably across its only suspension
//! point, so no other call can observe an entry mid-save.
//!
//! Saving never writes to the aggregate: the caller's role collection after a
//! successful save is exactly what it was before the call. Only the session's
//! snapshot moves forward, by carrying the surrogate keys of matched rows over
//! to the in-memory values and adding the keys of freshly inserted rows.

use std::collections::HashMap;

use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use roster_core::{DomainError, RowId, UserId};
use roster_identity::{Role, User};

use crate::backend::{Backend, BackendError, ParentWrite, UserFilter, WriteBatch};
use crate::diff::{diff_owned, TrackedRow};
use crate::mapping::{AggregateRecord, ChildRow, OwnedCollectionMapping, ParentRow, UserMapping};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("user {0} is not tracked by this session")]
    Detached(UserId),

    #[error("user {0} is already tracked by this session")]
    AlreadyTracked(UserId),

    #[error("stored record could not be mapped: {0}")]
    Mapping(#[from] DomainError),
}

/// Tracking state of one aggregate, as seen by a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Not loaded or added through this session.
    Detached,
    /// Added; the next save inserts it.
    Added,
    /// Matches the last committed snapshot.
    Unmodified,
    /// Differs from the last committed snapshot.
    Modified,
    /// Removed; the next save deletes it.
    Deleted,
}

/// Writes issued by one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub user_id: UserId,
    pub deleted: Vec<RowId>,
    pub inserted: Vec<RowId>,
    pub parent_written: bool,
}

impl SaveReport {
    fn from_batch(user_id: UserId, batch: &WriteBatch) -> Self {
        Self {
            user_id,
            deleted: batch.delete_children.clone(),
            inserted: batch.insert_children.iter().map(|c| c.row_id).collect(),
            parent_written: batch.parent.is_some(),
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.parent_written && self.deleted.is_empty() && self.inserted.is_empty()
    }
}

/// Last committed state of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot<V> {
    parent: ParentRow,
    rows: Vec<TrackedRow<V>>,
}

impl<V> Snapshot<V> {
    fn from_record<M>(record: &AggregateRecord) -> Self
    where
        M: OwnedCollectionMapping<Owned = V>,
    {
        Self {
            parent: record.parent.clone(),
            rows: record.children.iter().map(M::tracked_row).collect(),
        }
    }

    fn to_record<M>(&self) -> AggregateRecord
    where
        M: OwnedCollectionMapping<Owned = V>,
    {
        AggregateRecord {
            parent: self.parent.clone(),
            children: self
                .rows
                .iter()
                .map(|r| M::child_row(&r.value, self.parent.id, r.row_id))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum TrackedEntry<V> {
    Added,
    Persisted(Snapshot<V>),
    Deleted(Snapshot<V>),
}

/// A batch to issue and the snapshot to install once it is committed.
/// `next == None` means the entry stops being tracked.
#[derive(Debug)]
struct SavePlan<V> {
    batch: WriteBatch,
    next: Option<Snapshot<V>>,
}

/// Child rows to write so that storage holds exactly `current`, plus the
/// tracked rows describing storage afterwards (in `current` order).
fn sync_owned<M: OwnedCollectionMapping>(
    tracked: &[TrackedRow<M::Owned>],
    current: &[M::Owned],
    parent_id: Uuid,
    next_key: &mut impl FnMut() -> RowId,
) -> (Vec<RowId>, Vec<ChildRow>, Vec<TrackedRow<M::Owned>>) {
    let diff = diff_owned(tracked, current);

    let mut kept: HashMap<&M::Owned, RowId> =
        diff.retained.iter().map(|r| (&r.value, r.row_id)).collect();
    let mut inserts = Vec::with_capacity(diff.inserts.len());
    let mut rows = Vec::with_capacity(current.len());

    for value in current {
        let row_id = match kept.remove(value) {
            Some(row_id) => row_id,
            None => {
                let row_id = next_key();
                inserts.push(M::child_row(value, parent_id, row_id));
                row_id
            }
        };
        rows.push(TrackedRow {
            row_id,
            value: value.clone(),
        });
    }

    (diff.deletes, inserts, rows)
}

fn plan_save<M: OwnedCollectionMapping>(
    entry: &TrackedEntry<M::Owned>,
    root: &M::Root,
    mut next_key: impl FnMut() -> RowId,
) -> SavePlan<M::Owned> {
    let parent = M::parent_row(root);
    let current = M::owned_values(root);

    match entry {
        TrackedEntry::Deleted(snapshot) => SavePlan {
            batch: WriteBatch {
                parent: Some(ParentWrite::Delete(snapshot.parent.id)),
                delete_children: snapshot.rows.iter().map(|r| r.row_id).collect(),
                insert_children: Vec::new(),
            },
            next: None,
        },
        TrackedEntry::Added => {
            let (_, inserts, rows) = sync_owned::<M>(&[], current, parent.id, &mut next_key);
            SavePlan {
                batch: WriteBatch {
                    parent: Some(ParentWrite::Insert(parent.clone())),
                    delete_children: Vec::new(),
                    insert_children: inserts,
                },
                next: Some(Snapshot { parent, rows }),
            }
        }
        TrackedEntry::Persisted(snapshot) => {
            let (deletes, inserts, rows) =
                sync_owned::<M>(&snapshot.rows, current, snapshot.parent.id, &mut next_key);
            let parent_write = (parent != snapshot.parent).then(|| ParentWrite::Update(parent.clone()));
            SavePlan {
                batch: WriteBatch {
                    parent: parent_write,
                    delete_children: deletes,
                    insert_children: inserts,
                },
                next: Some(Snapshot { parent, rows }),
            }
        }
    }
}

fn has_changes<M: OwnedCollectionMapping>(entry: &TrackedEntry<M::Owned>, root: &M::Root) -> bool {
    match entry {
        TrackedEntry::Added | TrackedEntry::Deleted(_) => true,
        TrackedEntry::Persisted(snapshot) => {
            M::parent_row(root) != snapshot.parent
                || !diff_owned(&snapshot.rows, M::owned_values(root)).is_empty()
        }
    }
}

/// Unit-of-work session over a [`Backend`].
#[derive(Debug)]
pub struct Session<B> {
    backend: B,
    entries: HashMap<UserId, TrackedEntry<Role>>,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            entries: HashMap::new(),
        }
    }

    /// Number of aggregates this session currently tracks.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Load a user and start tracking it.
    ///
    /// A user this session already tracks as persisted is rebuilt from its
    /// tracked snapshot (the last committed state) instead of being re-read;
    /// a `ById` lookup of such a user does not reach the backend at all.
    /// Users pending insert or delete are reported absent.
    #[instrument(skip(self), err)]
    pub async fn load(&mut self, filter: &UserFilter) -> Result<Option<User>, SessionError> {
        if let UserFilter::ById(id) = filter {
            if let Some(entry) = self.entries.get(id) {
                return Self::from_entry(entry);
            }
        }

        let Some(record) = self.backend.load(filter).await? else {
            tracing::debug!("no user matched");
            return Ok(None);
        };

        let id = UserId::from_uuid(record.parent.id);
        if let Some(entry) = self.entries.get(&id) {
            return Self::from_entry(entry);
        }

        let user = UserMapping::materialize(&record)?;
        self.entries.insert(
            id,
            TrackedEntry::Persisted(Snapshot::from_record::<UserMapping>(&record)),
        );
        tracing::debug!(user_id = %id, roles = user.roles().len(), "user loaded and tracked");
        Ok(Some(user))
    }

    pub async fn find(&mut self, id: UserId) -> Result<Option<User>, SessionError> {
        self.load(&UserFilter::ById(id)).await
    }

    pub async fn find_by_email(&mut self, email: &str) -> Result<Option<User>, SessionError> {
        self.load(&UserFilter::ByEmail(email.to_string())).await
    }

    fn from_entry(entry: &TrackedEntry<Role>) -> Result<Option<User>, SessionError> {
        match entry {
            TrackedEntry::Persisted(snapshot) => Ok(Some(UserMapping::materialize(
                &snapshot.to_record::<UserMapping>(),
            )?)),
            TrackedEntry::Added | TrackedEntry::Deleted(_) => Ok(None),
        }
    }

    /// Track a new user; the next save inserts it with all of its roles.
    pub fn add(&mut self, user: &User) -> Result<(), SessionError> {
        let id = user.id();
        if self.entries.contains_key(&id) {
            return Err(SessionError::AlreadyTracked(id));
        }
        self.entries.insert(id, TrackedEntry::Added);
        Ok(())
    }

    /// Mark a tracked user for deletion; the next save deletes its role rows
    /// and then the user row. Removing a user that was only added just stops
    /// tracking it.
    pub fn remove(&mut self, user: &User) -> Result<(), SessionError> {
        let id = user.id();
        match self.entries.remove(&id) {
            None => Err(SessionError::Detached(id)),
            Some(TrackedEntry::Added) => Ok(()),
            Some(TrackedEntry::Persisted(snapshot) | TrackedEntry::Deleted(snapshot)) => {
                self.entries.insert(id, TrackedEntry::Deleted(snapshot));
                Ok(())
            }
        }
    }

    /// Stop tracking a user. Returns whether it was tracked.
    pub fn detach(&mut self, id: UserId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn entry_state(&self, user: &User) -> EntryState {
        match self.entries.get(&user.id()) {
            None => EntryState::Detached,
            Some(TrackedEntry::Added) => EntryState::Added,
            Some(TrackedEntry::Deleted(_)) => EntryState::Deleted,
            Some(entry) if has_changes::<UserMapping>(entry, user) => EntryState::Modified,
            Some(_) => EntryState::Unmodified,
        }
    }

    /// Flush the user's pending changes to the backend.
    ///
    /// Deletes role rows whose value is gone, inserts rows for new values under
    /// fresh surrogate keys, and leaves rows of unchanged values alone. The
    /// user is only borrowed: its roles read back exactly as before the call,
    /// whether the save succeeds, fails or is cancelled. On failure or
    /// cancellation the tracked snapshot is also left as it was, so a retry
    /// computes the same diff.
    ///
    /// A save dropped after the backend committed its batch leaves the
    /// snapshot stale: a retry then fails with a constraint violation. Call
    /// [`Session::detach`] and load the user again to resynchronise.
    #[instrument(skip(self, user), fields(user_id = %user.id()), err)]
    pub async fn save(&mut self, user: &User) -> Result<SaveReport, SessionError> {
        let id = user.id();
        let backend = &self.backend;
        let entry = self.entries.get(&id).ok_or(SessionError::Detached(id))?;

        let plan = plan_save::<UserMapping>(entry, user, || backend.generate_surrogate_key());
        let report = SaveReport::from_batch(id, &plan.batch);
        if plan.batch.is_empty() {
            tracing::debug!("nothing to save");
            return Ok(report);
        }

        self.backend.apply(plan.batch).await?;

        // Committed: no suspension point from here on.
        match plan.next {
            Some(snapshot) => {
                self.entries.insert(id, TrackedEntry::Persisted(snapshot));
            }
            None => {
                self.entries.remove(&id);
            }
        }

        tracing::info!(
            deleted = report.deleted.len(),
            inserted = report.inserted.len(),
            parent_written = report.parent_written,
            "user saved"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(user: &User) -> TrackedEntry<Role> {
        let record = AggregateRecord {
            parent: UserMapping::parent_row(user),
            children: user
                .roles()
                .iter()
                .map(|r| UserMapping::child_row(r, *user.id().as_uuid(), RowId::new()))
                .collect(),
        };
        TrackedEntry::Persisted(Snapshot::from_record::<UserMapping>(&record))
    }

    fn user_with(roles: &[&'static str]) -> User {
        User::with_roles(UserId::new(), "hapica@gmail.com", roles.iter().map(|r| Role::new(*r)))
    }

    #[test]
    fn plan_keeps_matched_keys_and_orders_snapshot_like_memory() {
        let mut user = user_with(&["A", "B", "C"]);
        let entry = persisted(&user);
        let TrackedEntry::Persisted(before) = &entry else {
            unreachable!()
        };
        let key_a = before.rows[0].row_id;

        user.set_roles([Role::new("D"), Role::new("A")]);
        let new_key = RowId::new();
        let plan = plan_save::<UserMapping>(&entry, &user, || new_key);

        assert_eq!(
            plan.batch.delete_children,
            vec![before.rows[1].row_id, before.rows[2].row_id]
        );
        assert_eq!(plan.batch.insert_children.len(), 1);
        assert_eq!(plan.batch.insert_children[0].row_id, new_key);
        assert_eq!(plan.batch.insert_children[0].value, "D");
        assert!(plan.batch.parent.is_none());

        let next = plan.next.unwrap();
        assert_eq!(
            next.rows,
            vec![
                TrackedRow { row_id: new_key, value: Role::new("D") },
                TrackedRow { row_id: key_a, value: Role::new("A") },
            ]
        );
    }

    #[test]
    fn plan_for_added_user_inserts_everything() {
        let user = user_with(&["A", "B"]);
        let plan = plan_save::<UserMapping>(&TrackedEntry::Added, &user, RowId::new);

        assert!(matches!(plan.batch.parent, Some(ParentWrite::Insert(_))));
        assert_eq!(plan.batch.insert_children.len(), 2);
        assert!(plan.batch.delete_children.is_empty());
        assert_eq!(plan.next.unwrap().rows.len(), 2);
    }

    #[test]
    fn plan_for_deleted_user_drops_children_then_parent() {
        let user = user_with(&["A", "B"]);
        let TrackedEntry::Persisted(snapshot) = persisted(&user) else {
            unreachable!()
        };
        let plan = plan_save::<UserMapping>(&TrackedEntry::Deleted(snapshot), &user, RowId::new);

        assert_eq!(plan.batch.delete_children.len(), 2);
        assert_eq!(
            plan.batch.parent,
            Some(ParentWrite::Delete(*user.id().as_uuid()))
        );
        assert!(plan.next.is_none());
    }

    #[test]
    fn email_change_updates_parent_only() {
        let mut user = user_with(&["A"]);
        let entry = persisted(&user);
        user.set_email("new@example.com");

        assert!(has_changes::<UserMapping>(&entry, &user));
        let plan = plan_save::<UserMapping>(&entry, &user, RowId::new);
        assert!(matches!(plan.batch.parent, Some(ParentWrite::Update(ref p)) if p.email == "new@example.com"));
        assert!(plan.batch.delete_children.is_empty());
        assert!(plan.batch.insert_children.is_empty());
    }

    #[test]
    fn reordered_roles_are_not_a_change() {
        let mut user = user_with(&["A", "B"]);
        let entry = persisted(&user);
        user.set_roles([Role::new("B"), Role::new("A")]);

        assert!(!has_changes::<UserMapping>(&entry, &user));
        assert!(plan_save::<UserMapping>(&entry, &user, RowId::new).batch.is_empty());
    }
}
