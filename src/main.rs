use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use hockey_ensemble::config::Config;
use hockey_ensemble::db::models::{Matchup, SeasonSchedule, SituationalContext};
use hockey_ensemble::engine::Engine;
use hockey_ensemble::feed::{inbox, DatabaseFeed, GameFeed, InboxFeed};
use hockey_ensemble::scheduler;

#[derive(Parser, Debug)]
#[command(name = "hockey-ensemble", version, about = "Ensemble game-outcome prediction engine")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the training scan and recalibration workers until interrupted
    Serve,
    /// Predict one game
    Predict {
        home: String,
        away: String,
        /// Game date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        neutral_site: bool,
        #[arg(long)]
        playoff: bool,
        #[arg(long)]
        home_rest: Option<u32>,
        #[arg(long)]
        away_rest: Option<u32>,
    },
    /// Simulate the rest of the season for one team
    Simulate {
        team: String,
        /// Number of seasons; 0 uses the configured default
        #[arg(long, default_value = "0")]
        simulations: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Queue completed games from JSON files and train on them
    Ingest { files: Vec<PathBuf> },
    /// Recompute model weights and ensemble calibration now
    Recalibrate,
    /// Print accuracy metrics per model
    Metrics,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_season_file(engine: &Engine, path: &Path) -> Result<()> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading season file {}", path.display()))?;
    let schedule: SeasonSchedule = serde_json::from_str(&body).context("parsing season file")?;
    engine.load_season(schedule).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.config.validate()?;
    let config = cli.config;
    let season_file = config.season_file.clone();

    let engine = Engine::open(config)?;
    info!("Database opened: {}", engine.config().database_path);
    if let Some(path) = season_file {
        load_season_file(&engine, Path::new(&path)).await?;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(engine).await?,
        Command::Predict {
            home,
            away,
            date,
            neutral_site,
            playoff,
            home_rest,
            away_rest,
        } => {
            let matchup = Matchup {
                home_team: home,
                away_team: away,
                game_date: date.unwrap_or_else(|| Utc::now().date_naive()),
                context: SituationalContext {
                    home_rest_days: home_rest,
                    away_rest_days: away_rest,
                    neutral_site,
                    playoff,
                },
            };
            print_json(&engine.predict(matchup).await?)?;
        }
        Command::Simulate { team, simulations, seed } => {
            print_json(&engine.simulate_season_seeded(&team, simulations, seed).await?)?;
        }
        Command::Ingest { files } => {
            let db = engine.database().clone();
            for path in &files {
                let body = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                for game in inbox::parse_games(&body).with_context(|| format!("parsing {}", path.display()))? {
                    db.enqueue_completed_game(&game)?;
                }
            }
            let feeds: Vec<Arc<dyn GameFeed>> = vec![Arc::new(DatabaseFeed::new(db, i64::MAX))];
            let summary = scheduler::run_training_scan(&engine, &feeds, Duration::from_secs(30)).await;
            print_json(&summary)?;
        }
        Command::Recalibrate => print_json(&engine.recalibrate().await?)?,
        Command::Metrics => print_json(&engine.get_model_metrics().await)?,
    }
    Ok(())
}

async fn serve(engine: Engine) -> Result<()> {
    let config = engine.config().clone();
    let mut feeds: Vec<Arc<dyn GameFeed>> = vec![Arc::new(DatabaseFeed::new(engine.database().clone(), 500))];
    if let Some(dir) = &config.inbox_dir {
        feeds.push(Arc::new(InboxFeed::new(dir)));
    }
    info!("Configured {} game feed(s)", feeds.len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let training = scheduler::start_training_worker(
        engine.clone(),
        feeds,
        Duration::from_secs(config.training_scan_secs),
        shutdown_rx.clone(),
    );
    let mut workers = vec![("training", training)];
    if config.recalibration_secs > 0 {
        let recalibration = scheduler::start_recalibration_worker(
            engine,
            Duration::from_secs(config.recalibration_secs),
            shutdown_rx,
        );
        workers.push(("recalibration", recalibration));
    } else {
        info!("Periodic recalibration disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown_tx.send(true)?;
    for (name, handle) in workers {
        if let Err(e) = handle.await {
            error!("{} worker panicked: {}", name, e);
        }
    }
    Ok(())
}
