mod bot;
mod config;
mod db;
mod domain;
mod error;
mod flows;
mod router;
mod services;
mod state;

#[cfg(test)]
mod testing;

use crate::bot::transport::TelegramMessenger;
use crate::config::Config;
use crate::flows::FlowDeps;
use crate::router::MessageRouter;
use crate::services::{LocalObjectStorage, OpenAiVision};
use crate::state::{spawn_expiry_sweep, CleanupService, FlowStateRegistry};
use anyhow::{Context, Result};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::adaptors::throttle::Limits;
use teloxide::requests::RequesterExt;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    let log_level = config.log_level();
    let log_dir = &config.logging.dir;

    std::fs::create_dir_all(log_dir)?;

    // Setup file appender (daily rotation)
    let file_appender = tracing_appender::rolling::daily(log_dir, "polizabot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Use local time for log timestamps
    let local_timer = ChronoLocal::rfc_3339();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_timer(local_timer.clone());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_timer(local_timer)
        .with_writer(non_blocking);

    let filter_layer = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("sqlx=warn".parse()?)
        .add_directive("sea_orm=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("Starting PolizaBot...");
    info!("Logs are written to: {}", log_dir);

    // Connect to database
    let db = db::establish_connection(&config.database.url).await?;
    info!("Database connection established");

    migration::Migrator::up(&db, None).await?;
    info!("✅ Database migrations completed");

    let repo = Arc::new(db::repo::Repo::new(db.clone()));
    repo.ping().await?;
    info!("✅ Database ping successful");

    // Vision is optional; without a key the OCR flows fall back to manual entry
    let vision = Arc::new(OpenAiVision::from_config(&config.vision)?);
    if config.vision.is_configured() {
        info!("✅ Vision client initialized ({})", config.vision.model);
    } else {
        warn!("Vision API key not set, OCR flows will use manual entry");
    }

    std::fs::create_dir_all(&config.storage.root_dir)?;
    if config.storage.signing_secret.is_empty() {
        warn!("storage.signing_secret is empty, file URLs are signed with an empty secret");
    }
    let storage = Arc::new(LocalObjectStorage::new(
        config.storage.root_dir.clone(),
        config.storage.public_base_url.clone(),
        config.storage.signing_secret.clone(),
    ));
    info!("✅ Object storage at {}", config.storage.root_dir);

    // Conversational state and its expiry
    let settings = config.flows.clone();
    let registry = Arc::new(FlowStateRegistry::new(settings.photo_batch_window()));
    let cleanup = CleanupService::new(registry.clone());
    let sweeper_handle = spawn_expiry_sweep(
        registry.clone(),
        settings.state_ttl(),
        settings.sweep_interval(),
    );
    info!(
        "✅ State expiry every {:?}, idle TTL {:?}",
        settings.sweep_interval(),
        settings.state_ttl()
    );

    // Initialize Telegram Bot
    let mut bot = teloxide::Bot::new(config.telegram.bot_token.clone());
    if let Some(api_url) = config.telegram.api_url.as_deref() {
        let parsed = url::Url::parse(api_url)
            .with_context(|| format!("Invalid telegram.api_url: {}", api_url))?;
        bot = bot.set_api_url(parsed);
        info!("Using Bot API server at {}", api_url);
    }
    let messenger = Arc::new(TelegramMessenger::new(
        bot.clone().throttle(Limits::default()),
        bot.clone(),
    ));

    let deps = FlowDeps {
        messenger,
        policies: repo.clone(),
        vehicles: repo,
        vision,
        storage,
        registry,
        cleanup,
        settings,
        link_ttl: Duration::from_secs(config.storage.signed_url_ttl_sec),
    };
    let router = Arc::new(MessageRouter::new(deps));

    info!("PolizaBot initialization complete");

    // The dispatcher returns once Ctrl+C is received
    if let Err(e) = bot::run(bot, router).await {
        error!("Bot error: {:?}", e);
    }

    info!("Shutting down gracefully...");
    sweeper_handle.abort();

    info!("✅ Shutdown complete");
    Ok(())
}
