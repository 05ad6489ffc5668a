//! Diff of an owned value collection against its tracked rows.
//!
//! Owned values have no caller-visible key, so tracked rows are matched to
//! in-memory values purely by value equality. The surrogate key of a matched
//! row carries over; unmatched rows are deleted and unmatched values inserted.
//! Owned value rows are immutable, so there are no updates.

use std::collections::{HashMap, HashSet, VecDeque};

use roster_core::{RowId, ValueObject};

/// A stored owned value together with the surrogate key of its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRow<V> {
    pub row_id: RowId,
    pub value: V,
}

/// Row-level changes needed to bring storage in line with memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedDiff<V> {
    /// Tracked rows with no matching in-memory value (tracked order).
    pub deletes: Vec<RowId>,
    /// In-memory values with no matching tracked row (collection order).
    pub inserts: Vec<V>,
    /// Matched pairs; these need no write (collection order).
    pub retained: Vec<TrackedRow<V>>,
}

impl<V> OwnedDiff<V> {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }
}

/// Compare tracked rows with the current in-memory values.
///
/// Each tracked row is claimed by at most one value, so a store that somehow
/// holds the same value twice has the extra row deleted.
pub fn diff_owned<V: ValueObject>(tracked: &[TrackedRow<V>], current: &[V]) -> OwnedDiff<V> {
    let mut by_value: HashMap<&V, VecDeque<RowId>> = HashMap::with_capacity(tracked.len());
    for row in tracked {
        by_value.entry(&row.value).or_default().push_back(row.row_id);
    }

    let mut claimed = HashSet::with_capacity(current.len());
    let mut inserts = Vec::new();
    let mut retained = Vec::new();

    for value in current {
        match by_value.get_mut(value).and_then(VecDeque::pop_front) {
            Some(row_id) => {
                claimed.insert(row_id);
                retained.push(TrackedRow {
                    row_id,
                    value: value.clone(),
                });
            }
            None => inserts.push(value.clone()),
        }
    }

    let deletes = tracked
        .iter()
        .filter(|row| !claimed.contains(&row.row_id))
        .map(|row| row.row_id)
        .collect();

    OwnedDiff {
        deletes,
        inserts,
        retained,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_identity::Role;

    fn tracked(names: &[&'static str]) -> Vec<TrackedRow<Role>> {
        names
            .iter()
            .map(|n| TrackedRow {
                row_id: RowId::new(),
                value: Role::new(*n),
            })
            .collect()
    }

    #[test]
    fn deletes_missing_and_inserts_new_values() {
        let rows = tracked(&["A", "B", "C"]);
        let diff = diff_owned(&rows, &[Role::new("A"), Role::new("D")]);

        assert_eq!(diff.deletes, vec![rows[1].row_id, rows[2].row_id]);
        assert_eq!(diff.inserts, vec![Role::new("D")]);
        assert_eq!(diff.retained, vec![rows[0].clone()]);
    }

    #[test]
    fn unchanged_collection_is_empty_diff() {
        let rows = tracked(&["A", "B"]);
        let diff = diff_owned(&rows, &[Role::new("B"), Role::new("A")]);
        assert!(diff.is_empty());
        assert_eq!(diff.retained.len(), 2);
    }

    #[test]
    fn duplicate_stored_values_lose_extra_row() {
        let rows = tracked(&["A", "A"]);
        let diff = diff_owned(&rows, &[Role::new("A")]);
        assert_eq!(diff.retained[0].row_id, rows[0].row_id);
        assert_eq!(diff.deletes, vec![rows[1].row_id]);
        assert!(diff.inserts.is_empty());
    }

    #[test]
    fn scenario_replaces_three_roles_with_one() {
        let rows = tracked(&["Admin", "Editor", "Viewer"]);
        let diff = diff_owned(&rows, &[Role::new("Basic")]);
        assert_eq!(diff.deletes.len(), 3);
        assert_eq!(diff.inserts, vec![Role::new("Basic")]);
        assert!(diff.retained.is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use roster_identity::dedup_present;

        fn names() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec("[a-f]", 0..8)
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: every tracked row is either deleted or retained, exactly once.
            #[test]
            fn tracked_rows_are_partitioned(stored in names(), next in names()) {
                let rows: Vec<TrackedRow<Role>> = dedup_present(stored.into_iter().map(|n| Some(Role::new(n))))
                    .into_iter()
                    .map(|value| TrackedRow { row_id: RowId::new(), value })
                    .collect();
                let current: Vec<Role> = dedup_present(next.into_iter().map(|n| Some(Role::new(n))));

                let diff = diff_owned(&rows, &current);

                let mut seen: Vec<RowId> = diff.deletes.clone();
                seen.extend(diff.retained.iter().map(|r| r.row_id));
                seen.sort();
                let mut all: Vec<RowId> = rows.iter().map(|r| r.row_id).collect();
                all.sort();
                prop_assert_eq!(seen, all);

                prop_assert_eq!(diff.inserts.len() + diff.retained.len(), current.len());
                for value in &diff.inserts {
                    prop_assert!(!rows.iter().any(|r| &r.value == value));
                }
            }
        }
    }
}
