use clap::Parser;
use std::net::SocketAddr;
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stablesend_core::cli::{Cli, Commands, ConfigCommands, DbCommands};
use stablesend_core::config::Config;
use stablesend_core::services::run_confirmation_poller;
use stablesend_core::{cli, create_app, db, secrets, startup};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing();

    match cli.command {
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config(ConfigCommands::Validate)) => cli::handle_config_validate(&config),
        Some(Commands::Reconcile) => {
            secrets::load_exchange_secrets(&mut config.exchange).await?;
            cli::handle_reconcile(&config).await
        }
        Some(Commands::Serve) | None => {
            secrets::load_exchange_secrets(&mut config.exchange).await?;
            serve(config).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let app = startup::build(&config, pool).await?;

    let poller = tokio::spawn(run_confirmation_poller(
        app.poller.clone(),
        Duration::from_secs(config.poll_interval_secs),
    ));

    let router = create_app(app.state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    poller.abort();
    let _ = poller.await;
    drop(app.poller);
    let written = app.audit_worker.await?;
    tracing::info!(written, "Audit queue drained");
    Ok(())
}
