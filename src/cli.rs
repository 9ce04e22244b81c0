use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "stablesend")]
#[command(about = "Stablesend - local currency to stablecoin send service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and confirmation poller (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run a single confirmation pass over unsettled withdrawals
    Reconcile,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and check the configuration without starting the service
    Validate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    let exchange = &config.exchange;
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!(
        "  Redis URL: {}",
        config.redis_url.as_deref().map(mask_password).unwrap_or_else(|| "(in-process cache)".to_string())
    );
    println!("  Exchange: {} ({})", exchange.base_url, exchange.pair);
    println!(
        "  Exchange credentials: {}",
        if exchange.api_key.is_some() && exchange.api_secret.is_some() {
            "set"
        } else {
            "missing"
        }
    );
    println!(
        "  Webhook secret: {}",
        if exchange.webhook_secret.is_empty() { "missing" } else { "set" }
    );
    println!("  Fee: {} bps, VAT inclusive: {}", config.fees.fee_bps, config.fees.vat_inclusive);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}

pub async fn handle_reconcile(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let app = crate::startup::build(config, pool).await?;

    let summary = app.poller.poll_once().await?;
    println!(
        "✓ Checked {} withdrawal(s): {} confirmed, {} failed, {} pending, {} error(s)",
        summary.checked, summary.confirmed, summary.failed, summary.pending, summary.errors
    );

    drop(app.poller);
    drop(app.state);
    app.audit_worker.await?;
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
