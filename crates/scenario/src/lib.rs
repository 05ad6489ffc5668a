//! The role-replacement scenario: load a user, replace its roles with a single
//! `Basic` role, save, and check that the roles still read back as `[Basic]`
//! both from the same instance and from a fresh session.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};

use roster_core::{RowId, UserId};
use roster_identity::Role;
use roster_infra::{
    AggregateRecord, Backend, BackendConfig, ChildRow, InMemoryBackend, ParentRow, PostgresBackend,
    Session,
};

pub const SCENARIO_EMAIL: &str = "hapica@gmail.com";
pub const SEEDED_ROLES: [&str; 3] = ["Admin", "Editor", "Viewer"];

/// Build the backend named by `config`; the in-memory one comes pre-seeded
/// with the scenario user.
pub async fn open_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::InMemory => {
            let backend = InMemoryBackend::new();
            seed_scenario_user(&backend)?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Postgres {
            url,
            max_connections,
        } => {
            let backend = PostgresBackend::connect(url, *max_connections)
                .await
                .context("connecting to postgres")?;
            Ok(Arc::new(backend))
        }
    }
}

pub fn seed_scenario_user(backend: &InMemoryBackend) -> Result<UserId> {
    let id = UserId::new();
    let parent_id = *id.as_uuid();
    backend.seed(AggregateRecord {
        parent: ParentRow {
            id: parent_id,
            email: SCENARIO_EMAIL.to_string(),
        },
        children: SEEDED_ROLES
            .iter()
            .map(|role| ChildRow {
                row_id: RowId::new(),
                parent_id,
                value: role.to_string(),
            })
            .collect(),
    })?;
    Ok(id)
}

fn names(roles: &[Role]) -> Vec<&str> {
    roles.iter().map(Role::as_str).collect()
}

/// Run the scenario; returns the roles read back after the save.
pub async fn run(backend: Arc<dyn Backend>) -> Result<Vec<Role>> {
    let mut session = Session::new(backend.clone());

    let mut user = session
        .find_by_email(SCENARIO_EMAIL)
        .await?
        .with_context(|| format!("no user with email {SCENARIO_EMAIL}"))?;
    tracing::info!(user_id = %user.id(), roles = ?names(user.roles()), "user loaded");

    let expected = vec![Role::new("Basic")];
    user.set_roles(expected.iter().cloned());
    ensure!(
        user.roles() == expected.as_slice(),
        "roles after set_roles: {:?}",
        names(user.roles())
    );

    let report = session.save(&user).await?;
    tracing::info!(
        deleted = report.deleted.len(),
        inserted = report.inserted.len(),
        roles = ?names(user.roles()),
        "user saved"
    );
    ensure!(
        user.roles() == expected.as_slice(),
        "roles after save: {:?}",
        names(user.roles())
    );
    drop(session);

    let mut verify = Session::new(backend);
    let stored = verify
        .find(user.id())
        .await?
        .context("user missing after save")?;
    ensure!(
        stored.roles() == expected.as_slice(),
        "stored roles: {:?}",
        names(stored.roles())
    );

    Ok(user.roles().to_vec())
}
