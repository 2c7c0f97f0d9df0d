mod cli;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tallyclock::billing::{EventJournal, InvoiceService, TimerService};
use tallyclock::config::Config;
use tallyclock::db;
use tallyclock::settings::Settings;

use crate::cli::{App, Cli, Command};

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tallyclock=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings_path = cli.settings.clone().unwrap_or_else(Settings::default_path);
    if let Command::Init { force } = cli.command {
        return cli::init_settings(&settings_path, force);
    }
    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    let config = Config::resolve(&settings).context("resolving configuration")?;

    let database = db::connect_from_config(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let mut timers = TimerService::new(Arc::clone(&database));
    let mut invoices = InvoiceService::new(Arc::clone(&database));
    if let Some(journal) = EventJournal::from_config(&config.journal) {
        let journal = Arc::new(journal);
        timers = timers.with_journal(Arc::clone(&journal));
        invoices = invoices.with_journal(journal);
    }

    let app = App {
        db: database,
        timers,
        invoices,
        config,
    };
    app.timers.recover().await?;
    cli::dispatch(&app, cli.command).await
}
