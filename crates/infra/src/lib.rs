//! Infrastructure layer: relational mapping, unit of work, storage backends.
//!
//! The flow on save is: [`mapping`] flattens an aggregate into rows,
//! [`diff`] compares the owned rows against the tracked snapshot, and
//! [`session`] hands the resulting batch to a [`backend`].

pub mod backend;
pub mod config;
pub mod diff;
pub mod mapping;
pub mod session;

pub use backend::{
    Backend, BackendError, InMemoryBackend, ParentWrite, PostgresBackend, UserFilter, WriteBatch,
};
pub use config::{BackendConfig, ConfigError};
pub use diff::{diff_owned, OwnedDiff, TrackedRow};
pub use mapping::{AggregateRecord, ChildRow, OwnedCollectionMapping, ParentRow, TableMapping, UserMapping};
pub use session::{EntryState, SaveReport, Session, SessionError};
