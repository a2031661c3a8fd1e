use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use breathscan::events::LabelMap;
use breathscan::{AnalysisConfig, AnalysisService, AnalyzeOptions, TaskType};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "breathscan",
    about = "Classify breathing and speech recordings into acoustic events"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one recording and print the outcome as JSON
    Analyze {
        /// Audio file to analyze
        #[arg(long)]
        input: PathBuf,

        /// Recording kind: breath or speech
        #[arg(long, default_value = "breath", value_parser = parse_task)]
        task: TaskType,

        /// Model JSON (overrides the configured path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Label map JSON (overrides the configured path)
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Analysis configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append stage trace lines to this JSONL file
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Minimum clip duration in seconds for this run
        #[arg(long)]
        min_duration: Option<f64>,

        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Print the resolved label map
    Labels {
        #[arg(long)]
        labels: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_task(value: &str) -> Result<TaskType, String> {
    TaskType::from_string(value).ok_or_else(|| format!("unknown task type: {value}"))
}

fn load_config(path: Option<&PathBuf>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Analyze {
            input,
            task,
            model,
            labels,
            config,
            trace,
            min_duration,
            timeout_secs,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(model) = model {
                config.models.model = model;
            }
            if let Some(labels) = labels {
                config.models.labels = labels;
            }
            if trace.is_some() {
                config.trace_path = trace;
            }

            let options = AnalyzeOptions { min_duration };
            let service = Arc::new(AnalysisService::from_config(config));
            let result = service
                .analyze_with_timeout(input, task, options, Duration::from_secs(timeout_secs))
                .await;

            match result {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.to_report())?);
                    Ok(ExitCode::from(1))
                }
            }
        }
        Commands::Labels { labels, config } => {
            let config = load_config(config.as_ref())?;
            let path = labels.unwrap_or(config.models.labels);
            let map = LabelMap::from_file(&path)
                .with_context(|| format!("failed to load label map {}", path.display()))?;

            println!("{}", serde_json::to_string_pretty(&map.to_label_indices())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
