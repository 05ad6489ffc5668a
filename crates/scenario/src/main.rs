use roster_infra::BackendConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    roster_observability::init();

    let config = BackendConfig::from_env()?;
    tracing::info!(backend = config.describe(), "starting role scenario");

    let backend = roster_scenario::open_backend(&config).await?;
    let roles = roster_scenario::run(backend).await?;

    tracing::info!(roles = roles.len(), "roles still populated after save");
    Ok(())
}
