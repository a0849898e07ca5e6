use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use keeper_core::config::KeeperConfig;
use keeper_jobs::DispatchOutcome;
use keeper_scheduler::{schedule::next_fire_after, Trigger};
use keeper_store::JobFilter;
use tracing::info;

mod app;

#[derive(Parser)]
#[command(name = "keeperd")]
#[command(about = "Keeps recurring crawl jobs scheduled and dispatches them to the agent")]
struct Cli {
    /// Config file path (falls back to KEEPER_CONFIG, then ~/.keeper/keeper.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C (default)
    Run,
    /// Print the entry each periodic job would get, with its next fire time
    Entries,
    /// Start one job definition now and exit
    Dispatch {
        /// Job definition id
        job_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "keeper_daemon=info,keeper_jobs=info,keeper_scheduler=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > KEEPER_CONFIG env > ~/.keeper/keeper.toml
    let config_path = cli.config.or_else(|| std::env::var("KEEPER_CONFIG").ok());
    let config = KeeperConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        KeeperConfig::default()
    });

    let app = app::App::build(config)?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(app).await,
        Command::Entries => entries(&app),
        Command::Dispatch { job_id } => dispatch(&app, job_id).await,
    }
}

async fn run(app: app::App) -> anyhow::Result<()> {
    app.install()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = Arc::clone(&app.engine);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });
    info!(path = %app.ctx.path().display(), "keeper daemon running");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

fn entries(app: &app::App) -> anyhow::Result<()> {
    let store = app.ctx.scope()?;
    let now = Utc::now();
    for job in store.list_job_definitions(&JobFilter::reconcilable())? {
        let entry_id = job.entry_id();
        match Trigger::cron(&job.cron) {
            Ok(trigger) => {
                // Cron triggers ignore the interval anchor.
                let next = next_fire_after(&trigger, now, now)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("{entry_id}\t{}\t{}\tnext {next}", job.unit_name, job.cron);
            }
            Err(e) => println!("{entry_id}\t{}\t{}\tinvalid: {e}", job.unit_name, job.cron),
        }
    }
    Ok(())
}

async fn dispatch(app: &app::App, job_id: i64) -> anyhow::Result<()> {
    let store = app.ctx.scope()?;
    match app.dispatcher.dispatch(&store, job_id).await {
        DispatchOutcome::Started {
            execution_id,
            remote_id,
        } => {
            println!("started job {job_id}: remote id {remote_id}, execution {execution_id}");
            Ok(())
        }
        DispatchOutcome::Failed(reason) => anyhow::bail!("dispatch of job {job_id} failed: {reason}"),
    }
}
