use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dealflow::config::Config;
use dealflow::crm::{LeadService, audit};
use dealflow::settings::Settings;
use dealflow::web::{GatewayState, start_server};

#[derive(Parser)]
#[command(name = "dealflow", version, about = "Lead CRM backend")]
struct Cli {
    /// TOML settings file. Environment variables override its values.
    #[arg(long, global = true, env = "DEALFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines. Also enabled by `LOG_FORMAT=json`.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and start the HTTP gateway (default).
    Serve,
    /// Run migrations and exit.
    Migrate,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dealflow=info,tower_http=info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let log_json = cli.log_json
        || std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(log_json);

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let config = Config::resolve(&settings).context("resolving configuration")?;

    let db = dealflow::db::connect_from_config(&config.database)
        .await
        .context("connecting to database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve => serve(config, db).await,
    }
}

async fn serve(config: Config, db: Arc<dyn dealflow::db::Database>) -> anyhow::Result<()> {
    audit::init(&config.audit);
    if config.gateway.api_tokens.is_empty() {
        tracing::warn!("No API tokens configured; every protected request will be rejected");
    }

    let state = Arc::new(GatewayState::new(
        LeadService::new(db),
        config.gateway.api_tokens.clone(),
    ));
    let addr = start_server(config.gateway.socket_addr(), state.clone()).await?;
    tracing::info!("Serving lead API on http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    state.shutdown().await;
    Ok(())
}
