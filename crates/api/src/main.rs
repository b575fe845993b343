use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;

use tally_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tally_observability::init();

    let config = AppConfig::from_env()?;

    let jwt_secret = match &config.jwt_secret {
        Some(secret) => secret.expose_secret().clone(),
        None => {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        }
    };

    let services = Arc::new(tally_api::app::build_services(&config).await?);
    let app = tally_api::app::build_app(&jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
