//! Postgres-backed relational backend.
//!
//! Table and column names come from [`UserMapping::TABLES`]; the schema itself
//! is managed outside this crate.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | BackendError |
//! |------------|----------------------|--------------|
//! | Database (integrity constraint) | `23xxx` | `ConstraintViolation` |
//! | Database (other) | Any other | `Unavailable` |
//! | RowNotFound / ColumnNotFound / decode errors | N/A | `Corrupt` |
//! | PoolTimedOut / PoolClosed / Io / Tls / other | N/A | `Unavailable` |
//!
//! A write that affects no row where one was expected (a row deleted behind
//! the session's back) is reported as `ConstraintViolation` and rolls back
//! the whole batch.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use roster_core::RowId;

use super::r#trait::{Backend, BackendError, ParentWrite, UserFilter, WriteBatch};
use crate::mapping::{AggregateRecord, ChildRow, OwnedCollectionMapping, ParentRow, TableMapping, UserMapping};

/// Postgres backend over a shared connection pool.
///
/// `PgPool` is internally reference counted, so clones share connections.
/// Every [`WriteBatch`] runs inside one transaction.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    tables: TableMapping,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: UserMapping::TABLES,
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn load_children(
        &self,
        conn: &mut PgConnection,
        parent_id: Uuid,
    ) -> Result<Vec<ChildRow>, BackendError> {
        let rows = sqlx::query(&select_children_sql(&self.tables))
            .bind(parent_id)
            .fetch_all(conn)
            .await
            .map_err(|e| map_sqlx_error("load_children", e))?;

        rows.iter().map(child_from_row).collect()
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    #[instrument(skip(self), fields(children = tracing::field::Empty), err)]
    async fn load(&self, filter: &UserFilter) -> Result<Option<AggregateRecord>, BackendError> {
        // Parent and children must come from one snapshot, or a batch committed
        // between the two reads would yield a torn record.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        sqlx::query(READ_SNAPSHOT_SQL)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let sql = select_parent_sql(&self.tables, filter);
        let query = match filter {
            UserFilter::ById(id) => sqlx::query(&sql).bind(*id.as_uuid()),
            UserFilter::ByEmail(email) => sqlx::query(&sql).bind(email.as_str()),
        };

        let Some(row) = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_parent", e))?
        else {
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            return Ok(None);
        };

        let parent = ParentRow {
            id: row.try_get(0).map_err(|e| map_sqlx_error("decode_parent", e))?,
            email: row.try_get(1).map_err(|e| map_sqlx_error("decode_parent", e))?,
        };
        let children = self.load_children(&mut *tx, parent.id).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Span::current().record("children", children.len());
        Ok(Some(AggregateRecord { parent, children }))
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        if let Some(ParentWrite::Insert(parent)) = &batch.parent {
            sqlx::query(&insert_parent_sql(&self.tables))
                .bind(parent.id)
                .bind(parent.email.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_parent", e))?;
        }

        for row_id in &batch.delete_children {
            let sql = delete_child_sql(&self.tables);
            execute_one(&mut tx, sqlx::query(&sql).bind(*row_id.as_uuid()), "delete_child").await?;
        }

        for child in &batch.insert_children {
            sqlx::query(&insert_child_sql(&self.tables))
                .bind(*child.row_id.as_uuid())
                .bind(child.parent_id)
                .bind(child.value.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_child", e))?;
        }

        match &batch.parent {
            Some(ParentWrite::Update(parent)) => {
                let sql = update_parent_sql(&self.tables);
                let query = sqlx::query(&sql).bind(parent.email.as_str()).bind(parent.id);
                execute_one(&mut tx, query, "update_parent").await?;
            }
            Some(ParentWrite::Delete(id)) => {
                let sql = delete_parent_sql(&self.tables);
                execute_one(&mut tx, sqlx::query(&sql).bind(*id), "delete_parent").await?;
            }
            Some(ParentWrite::Insert(_)) | None => {}
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    fn generate_surrogate_key(&self) -> RowId {
        RowId::new()
    }
}

async fn execute_one(
    tx: &mut Transaction<'_, Postgres>,
    query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    operation: &str,
) -> Result<(), BackendError> {
    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    if result.rows_affected() != 1 {
        return Err(BackendError::ConstraintViolation(format!(
            "{operation}: expected to affect 1 row, affected {}",
            result.rows_affected()
        )));
    }
    Ok(())
}

fn child_from_row(row: &PgRow) -> Result<ChildRow, BackendError> {
    let decode = |e| map_sqlx_error("decode_child", e);
    Ok(ChildRow {
        row_id: RowId::from_uuid(row.try_get(0).map_err(decode)?),
        parent_id: row.try_get(1).map_err(decode)?,
        value: row.try_get(2).map_err(decode)?,
    })
}

/// First statement of a load transaction.
const READ_SNAPSHOT_SQL: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

fn select_parent_sql(t: &TableMapping, filter: &UserFilter) -> String {
    let column = match filter {
        UserFilter::ById(_) => t.parent_key,
        UserFilter::ByEmail(_) => t.parent_email,
    };
    format!(
        "SELECT \"{key}\", \"{email}\" FROM {table} WHERE \"{column}\" = $1 ORDER BY \"{key}\" LIMIT 1",
        key = t.parent_key,
        email = t.parent_email,
        table = t.parent(),
    )
}

fn select_children_sql(t: &TableMapping) -> String {
    format!(
        "SELECT \"{key}\", \"{fk}\", \"{value}\" FROM {table} WHERE \"{fk}\" = $1 ORDER BY \"{key}\"",
        key = t.child_key,
        fk = t.child_parent_key,
        value = t.child_value,
        table = t.child(),
    )
}

fn insert_parent_sql(t: &TableMapping) -> String {
    format!(
        "INSERT INTO {table} (\"{key}\", \"{email}\") VALUES ($1, $2)",
        table = t.parent(),
        key = t.parent_key,
        email = t.parent_email,
    )
}

fn update_parent_sql(t: &TableMapping) -> String {
    format!(
        "UPDATE {table} SET \"{email}\" = $1 WHERE \"{key}\" = $2",
        table = t.parent(),
        key = t.parent_key,
        email = t.parent_email,
    )
}

fn delete_parent_sql(t: &TableMapping) -> String {
    format!(
        "DELETE FROM {table} WHERE \"{key}\" = $1",
        table = t.parent(),
        key = t.parent_key,
    )
}

fn insert_child_sql(t: &TableMapping) -> String {
    format!(
        "INSERT INTO {table} (\"{key}\", \"{fk}\", \"{value}\") VALUES ($1, $2, $3)",
        table = t.child(),
        key = t.child_key,
        fk = t.child_parent_key,
        value = t.child_value,
    )
}

fn delete_child_sql(t: &TableMapping) -> String {
    format!(
        "DELETE FROM {table} WHERE \"{key}\" = $1",
        table = t.child(),
        key = t.child_key,
    )
}

/// Map SQLx errors to `BackendError`.
fn map_sqlx_error(operation: &str, e: sqlx::Error) -> BackendError {
    match &e {
        sqlx::Error::Database(db) => {
            let integrity = db.code().is_some_and(|code| code.starts_with("23"));
            if integrity {
                BackendError::ConstraintViolation(format!("{operation}: {e}"))
            } else {
                BackendError::Unavailable(format!("{operation}: {e}"))
            }
        }
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => BackendError::Corrupt(format!("{operation}: {e}")),
        _ => BackendError::Unavailable(format!("{operation}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::UserId;

    #[test]
    fn parent_lookup_filters_on_mapped_column() {
        let t = UserMapping::TABLES;
        assert_eq!(
            select_parent_sql(&t, &UserFilter::ByEmail("a@example.com".to_string())),
            "SELECT \"UserId\", \"Email\" FROM \"user\".\"User\" WHERE \"Email\" = $1 ORDER BY \"UserId\" LIMIT 1"
        );
        assert!(select_parent_sql(&t, &UserFilter::ById(UserId::new())).contains("WHERE \"UserId\" = $1"));
    }

    #[test]
    fn loads_read_from_a_single_snapshot() {
        assert!(READ_SNAPSHOT_SQL.starts_with("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"));
        assert!(READ_SNAPSHOT_SQL.ends_with("READ ONLY"));
    }

    #[test]
    fn child_statements_use_surrogate_and_foreign_keys() {
        let t = UserMapping::TABLES;
        assert_eq!(
            insert_child_sql(&t),
            "INSERT INTO \"user\".\"UserRole\" (\"RoleAssignmentId\", \"UserId\", \"Role\") VALUES ($1, $2, $3)"
        );
        assert_eq!(
            delete_child_sql(&t),
            "DELETE FROM \"user\".\"UserRole\" WHERE \"RoleAssignmentId\" = $1"
        );
        assert!(select_children_sql(&t).ends_with("ORDER BY \"RoleAssignmentId\""));
    }

    #[test]
    fn pool_failures_are_unavailable() {
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::PoolTimedOut),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::PoolClosed),
            BackendError::Unavailable(_)
        ));
    }

    #[test]
    fn decode_failures_are_corrupt() {
        assert!(matches!(
            map_sqlx_error("decode", sqlx::Error::ColumnNotFound("Role".to_string())),
            BackendError::Corrupt(_)
        ));
        assert!(matches!(
            map_sqlx_error("decode", sqlx::Error::RowNotFound),
            BackendError::Corrupt(_)
        ));
    }
}
