//! tubeqa CLI entry point.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tubeqa::cli::{commands, Cli, Commands};
use tubeqa::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tubeqa={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    std::fs::create_dir_all(settings.data_dir())?;

    match &cli.command {
        Commands::Ingest { files } => {
            commands::run_ingest(files, settings).await?;
        }

        Commands::Ask {
            question,
            video,
            strategy,
            method,
            json,
        } => {
            commands::run_ask(question, video.as_deref(), *strategy, *method, *json, settings).await?;
        }

        Commands::Search {
            query,
            video,
            limit,
            strategy,
            method,
        } => {
            commands::run_search(query, video.as_deref(), *limit, *strategy, *method, settings).await?;
        }

        Commands::List => {
            commands::run_list(settings)?;
        }

        Commands::GroundTruth { videos, all } => {
            commands::run_ground_truth(videos, *all, settings).await?;
        }

        Commands::Evaluate { target } => {
            commands::run_evaluate(target, settings).await?;
        }

        Commands::Sweep {
            video,
            k,
            strategies,
            methods,
        } => {
            commands::run_sweep(video.as_deref(), k, strategies, methods, settings).await?;
        }

        Commands::Stats { days, json } => {
            commands::run_stats(*days, *json, settings)?;
        }

        Commands::Feedback {
            query,
            response,
            label,
            video,
            chat_id,
        } => {
            commands::run_feedback(query, response, label, video.clone(), *chat_id, settings)?;
        }

        Commands::Export {
            target,
            output,
            format,
            video,
        } => {
            commands::run_export(*target, format, output.clone(), video.as_deref(), settings)?;
        }

        Commands::Check { video, repair } => {
            commands::run_check(video.as_deref(), *repair, settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings)?;
        }
    }

    Ok(())
}
