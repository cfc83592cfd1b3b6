use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use baedal::config::Config;
use baedal::dispatcher::Dispatcher;
use baedal::fetcher::HttpFetcher;
use baedal::models::TaskResult;
use baedal::progress::ProgressView;

#[derive(Parser)]
#[command(
    name = "baedal",
    version,
    about = "Adaptive crawl dispatcher with memory-aware admission control",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a set of URLs through the engine
    Dispatch {
        /// File with one target URL per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Target URL; repeatable
        #[arg(short, long)]
        url: Vec<String>,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print results as they complete instead of at the end
        #[arg(long, default_value = "false")]
        streaming: bool,

        /// Override the concurrency ceiling
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Override the memory threshold (0-1)
        #[arg(long)]
        memory_threshold: Option<f64>,

        /// Override the retry budget
        #[arg(long)]
        max_retries: Option<u32>,

        /// Disable memory-adaptive admission
        #[arg(long, default_value = "false")]
        no_memory_guard: bool,

        /// Print the per-task detailed view after the run
        #[arg(long, default_value = "false")]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    tracing::info!("baedal dispatcher starting");

    match cli.command {
        Commands::Dispatch {
            input,
            url,
            config,
            streaming,
            max_concurrency,
            memory_threshold,
            max_retries,
            no_memory_guard,
            detailed,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::from_env()?,
            };
            if let Some(v) = max_concurrency {
                config.dispatcher.max_concurrency = v;
            }
            if let Some(v) = memory_threshold {
                config.dispatcher.memory_threshold = v;
            }
            if let Some(v) = max_retries {
                config.dispatcher.max_retries = v;
            }
            config.validate()?;

            let targets = load_targets(input, url).await?;
            if targets.is_empty() {
                anyhow::bail!("No targets given; use --input or --url");
            }

            tracing::info!(
                targets = targets.len(),
                streaming = streaming,
                "Starting dispatch command"
            );
            dispatch(config, targets, streaming, no_memory_guard, detailed).await?;
        }
    }

    tracing::info!("baedal completed");
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("baedal=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("baedal=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Collect targets from the input file and the repeated --url flags
async fn load_targets(input: Option<PathBuf>, urls: Vec<String>) -> Result<Vec<String>> {
    let mut targets = Vec::new();

    if let Some(path) = input {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read target list: {}", path.display()))?;
        targets.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    targets.extend(urls);
    Ok(targets)
}

async fn dispatch(
    config: Config,
    targets: Vec<String>,
    streaming: bool,
    no_memory_guard: bool,
    detailed: bool,
) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);

    let engine = if no_memory_guard {
        Dispatcher::semaphore_only(config.dispatcher, fetcher)?
    } else {
        Dispatcher::new(config.dispatcher, fetcher)?
    };

    // Ctrl-C stops admission; in-flight tasks drain within the grace
    // period.
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling dispatch");
            cancel.cancel();
        }
    });

    let progress = engine.progress();

    if streaming {
        let mut stream = engine.run_streaming(targets);
        while let Some(result) = stream.next().await {
            print_result(&result);
        }
    } else {
        let results = engine.run(targets).await;
        for result in &results {
            print_result(result);
        }
    }

    if detailed {
        print!("{}", progress.report(ProgressView::Detailed));
    }
    println!("{}", progress.report(ProgressView::Aggregated));

    Ok(())
}

fn print_result(result: &TaskResult) {
    match result.failure() {
        None => println!("ok   {} (attempts: {})", result.target, result.attempts),
        Some(kind) => println!(
            "FAIL {} ({}, attempts: {})",
            result.target, kind, result.attempts
        ),
    }
}
