use migration::{Migrator, MigratorTrait};
use oidc_provider::api::start_webserver;
use oidc_provider::config::load_config_or_panic;
use oidc_provider::oauth2::{KeyManager, OAuth2State};
use sea_orm::Database;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "oidc_provider=info,sea_orm=info,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection
    let db = Arc::new(Database::connect(&config.database_url).await?);
    if config.run_migrations {
        Migrator::up(db.as_ref(), None).await?;
        tracing::info!("Database migrations applied");
    }

    let keys = Arc::new(KeyManager::from_config(&config.oauth2.signing_key)?);
    let state = OAuth2State::new(db, keys, &config.oauth2);

    // Periodically drop expired codes and refresh tokens
    {
        let grants = state.grants.clone();
        let period = Duration::from_secs(config.oauth2.purge_interval_secs);
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                grants.purge_expired().await;
            }
        });
    }

    start_webserver(state, &config.listen_addr).await
}
