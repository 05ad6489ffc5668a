//! Set-reconciliation of owned value collections.
//!
//! An owned collection is replaced only when the proposed content differs
//! from the current one under set equality. Replacing it with set-equal
//! content would make every stored row look changed to the persistence layer
//! for no reason.

use std::collections::HashSet;

use roster_core::ValueObject;

/// Outcome of a reconciliation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The proposal was set-equal to the current content; nothing was touched.
    Unchanged,
    /// The current content was cleared and refilled with the proposal.
    Replaced,
}

impl Reconciliation {
    pub fn changed(self) -> bool {
        matches!(self, Reconciliation::Replaced)
    }
}

/// Drop absent entries and duplicates, keeping first-seen order.
///
/// Items are `Option<V>` so that `V` is fixed by the input; wrap plain
/// values with `.map(Some)`.
pub fn dedup_present<V, I>(proposed: I) -> Vec<V>
where
    V: ValueObject,
    I: IntoIterator<Item = Option<V>>,
{
    let mut seen = HashSet::new();
    proposed
        .into_iter()
        .flatten()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

/// Same size and an empty symmetric difference.
pub fn set_equal<V: ValueObject>(left: &[V], right: &[V]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let left: HashSet<&V> = left.iter().collect();
    let right: HashSet<&V> = right.iter().collect();
    left == right
}

/// Reconcile `current` against a proposed replacement.
///
/// `current` is mutated in place only when the deduplicated proposal is not
/// set-equal to it. The vector itself is reused, so any borrower holding the
/// owner sees the new content through the same collection.
///
/// `V` is fixed by `current`, so `proposed` may yield either `V` or
/// `Option<V>`.
pub fn reconcile<V, I>(current: &mut Vec<V>, proposed: I) -> Reconciliation
where
    V: ValueObject,
    I: IntoIterator,
    I::Item: Into<Option<V>>,
{
    let next = dedup_present(proposed.into_iter().map(|item| -> Option<V> { item.into() }));
    if set_equal(current, &next) {
        return Reconciliation::Unchanged;
    }

    current.clear();
    current.extend(next);
    Reconciliation::Replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn roles(names: &[&'static str]) -> Vec<Role> {
        names.iter().map(|n| Role::new(*n)).collect()
    }

    #[test]
    fn element_type_is_inferred_from_optional_items() {
        let out = dedup_present(vec![Some(Role::new("x")), None]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_str(), "x");
    }

    #[test]
    fn reconcile_accepts_plain_and_optional_items() {
        let mut current = roles(&["a"]);
        assert!(reconcile(&mut current, roles(&["b"])).changed());
        assert!(reconcile(&mut current, vec![Some(Role::new("c")), None]).changed());
        assert_eq!(current, roles(&["c"]));
    }

    #[test]
    fn drops_absent_entries_and_duplicates() {
        let out: Vec<Role> = dedup_present(vec![
            Some(Role::new("x")),
            None,
            Some(Role::new("y")),
            Some(Role::new("x")),
        ]);
        assert_eq!(out, roles(&["x", "y"]));
    }

    #[test]
    fn set_equal_ignores_order_but_not_size() {
        assert!(set_equal(&roles(&["a", "b"]), &roles(&["b", "a"])));
        assert!(!set_equal(&roles(&["a", "b"]), &roles(&["a"])));
        assert!(!set_equal(&roles(&["a", "b"]), &roles(&["a", "c"])));
        assert!(set_equal::<Role>(&[], &[]));
    }

    #[test]
    fn reordered_proposal_is_a_no_op() {
        let mut current = roles(&["Admin", "Editor"]);
        let outcome = reconcile(&mut current, roles(&["Editor", "Admin", "Admin"]));
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(current, roles(&["Admin", "Editor"]));
    }

    #[test]
    fn differing_proposal_replaces_in_place() {
        let mut current = Vec::with_capacity(8);
        current.extend(roles(&["Admin", "Editor", "Viewer"]));
        let ptr = current.as_ptr();

        let outcome = reconcile(&mut current, vec![Some(Role::new("Basic")), None]);

        assert!(outcome.changed());
        assert_eq!(current, roles(&["Basic"]));
        assert_eq!(current.as_ptr(), ptr);
    }

    #[test]
    fn empty_proposal_clears() {
        let mut current = roles(&["Admin"]);
        let outcome = reconcile(&mut current, Vec::<Option<Role>>::new());
        assert_eq!(outcome, Reconciliation::Replaced);
        assert!(current.is_empty());
    }

    mod proptest_tests {
        use super::*;
        use std::collections::HashSet;
        use proptest::prelude::*;

        fn proposal() -> impl Strategy<Value = Vec<Option<Role>>> {
            prop::collection::vec(prop::option::of("[a-e]{1,2}".prop_map(Role::new)), 0..12)
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: reconciled content never holds duplicates and keeps first-seen order.
            #[test]
            fn result_is_deduplicated(seed in proposal(), next in proposal()) {
                let mut current = dedup_present(seed);
                reconcile(&mut current, next.clone());

                let unique: HashSet<&Role> = current.iter().collect();
                prop_assert_eq!(unique.len(), current.len());
                prop_assert!(set_equal(&current, &dedup_present(next)));
            }

            /// Property: reconciling with set-equal content leaves both pointer and contents alone.
            #[test]
            fn set_equal_proposal_is_idempotent(seed in proposal(), extra_none in 0usize..3) {
                let mut current = dedup_present(seed);
                let before = current.clone();
                let ptr = current.as_ptr();

                let mut again: Vec<Option<Role>> = current.iter().rev().cloned().map(Some).collect();
                again.extend(current.iter().cloned().map(Some));
                again.extend(std::iter::repeat(None).take(extra_none));

                prop_assert_eq!(reconcile(&mut current, again), Reconciliation::Unchanged);
                prop_assert_eq!(&current, &before);
                prop_assert_eq!(current.as_ptr(), ptr);
            }
        }
    }
}
