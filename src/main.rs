use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lead_funnel::channels::{TelegramTransport, Transport};
use lead_funnel::config::{self, FunnelConfig};
use lead_funnel::funnel::{Dispatcher, Funnel, FunnelSettings};
use lead_funnel::health;
use lead_funnel::store::{LibSqlBackend, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; the guard must outlive the event loop
    let _log_guard = init_tracing(config::log_dir_from_env());

    let config = match FunnelConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export BOT_TOKEN=123456:ABC...");
            std::process::exit(1);
        }
    };

    eprintln!("🧠 Lead Funnel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Guide: {}", config.guide_path.display());
    eprintln!("   Health: http://0.0.0.0:{}/health", config.health_port);
    match config.operator_id.as_deref() {
        Some(id) => eprintln!("   Operator: {id}"),
        None => eprintln!("   Operator: none (notifications disabled)"),
    }

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?
            .with_timeout(config.store_timeout),
    );

    // ── Liveness endpoint ────────────────────────────────────────────────
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            tracing::error!(port = health_port, "Health server stopped: {e}");
        }
    });

    // ── Transport + funnel ───────────────────────────────────────────────
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(config.bot_token.clone()));
    let funnel = Arc::new(Funnel::new(
        FunnelSettings::from(&config),
        store,
        Arc::clone(&transport),
    ));

    funnel.assets().report_missing();

    let mut events = transport
        .start()
        .await
        .context("failed to start the Telegram transport")?;

    funnel.announce_startup().await;
    eprintln!("   Listening for updates...\n");

    // One worker per active user keeps each user's events in order
    let dispatcher = Dispatcher::new(Arc::clone(&funnel));
    while let Some(event) = events.next().await {
        dispatcher.dispatch(event);
    }

    tracing::info!("Event stream ended; shutting down");
    Ok(())
}

/// Console logging, plus a daily-rolling file when `FUNNEL_LOG_DIR` is set.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lead-funnel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
