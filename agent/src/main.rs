//! Habit Sync Agent - background sync host.

use habit_sync_agent::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "habit_sync_agent=debug,habit_sync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting habit sync agent against {} (state: {})",
        config.backend_url,
        config.state_path.display()
    );

    habit_sync_agent::run(config, tokio::signal::ctrl_c()).await?;

    Ok(())
}
