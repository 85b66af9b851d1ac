use clap::Parser;
use cron::Schedule;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fairshare_core::cli::{BankCommands, Cli, Commands, DbCommands, ScanCommands, SweepCommands};
use fairshare_core::services::scheduler;
use fairshare_core::{build_state, cli, config, create_app, db, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Scan(ScanCommands::Run) => {
            let pool = db::create_pool(&config).await?;
            let state = build_state(&config, pool);
            cli::handle_scan_run(&state).await
        }
        Commands::Sweep(SweepCommands::Run) => {
            let pool = db::create_pool(&config).await?;
            let state = build_state(&config, pool);
            cli::handle_sweep_run(&state).await
        }
        Commands::Bank(BankCommands::Pull { account_id }) => {
            let pool = db::create_pool(&config).await?;
            let state = build_state(&config, pool);
            cli::handle_bank_pull(&config, &state, account_id).await
        }
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: config::Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("startup validation failed");
    }

    let state = build_state(&config, pool);

    let scan_schedule = Schedule::from_str(&config.recurring_scan_schedule)
        .map_err(|e| anyhow::anyhow!("invalid RECURRING_SCAN_SCHEDULE: {}", e))?;
    let sweep_schedule = Schedule::from_str(&config.reconciliation_schedule)
        .map_err(|e| anyhow::anyhow!("invalid RECONCILIATION_SCHEDULE: {}", e))?;

    tokio::spawn(scheduler::run_recurring_scan(
        scan_schedule,
        Arc::clone(&state.trigger_detector),
        Arc::clone(&state.orchestrator),
    ));
    tokio::spawn(scheduler::run_reconciliation(
        sweep_schedule,
        Arc::clone(&state.reconciliation),
    ));

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
