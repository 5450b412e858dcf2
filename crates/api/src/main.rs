use anyhow::Context;

use forgecrm_infra::BulkEmailConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgecrm_observability::init();

    let config = BulkEmailConfig::from_env();
    let app = forgecrm_api::app::build_app_from_config(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
