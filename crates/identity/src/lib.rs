//! `roster-identity` — the user aggregate and its owned role collection.
//!
//! Pure domain code: no storage, no async. Persistence lives in `roster-infra`.

pub mod reconcile;
pub mod role;
pub mod user;

pub use reconcile::{dedup_present, reconcile, set_equal, Reconciliation};
pub use role::Role;
pub use user::User;
