//! Storage backend boundary.
//!
//! The unit of work never talks to storage directly: it loads whole aggregate
//! records and hands over one atomic [`WriteBatch`] per save.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryBackend;
pub use postgres::PostgresBackend;
pub use r#trait::{Backend, BackendError, ParentWrite, UserFilter, WriteBatch};
