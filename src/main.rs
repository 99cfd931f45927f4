use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use speech_emotion::{AudioFormat, Config, InferencePipeline, Prediction, Trend};

/// Headless CLI for offline speech emotion classification
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Audio clips to classify (.wav, .flac, .ogg)
    clips: Vec<PathBuf>,

    /// Path to the ONNX emotion model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Container format of the clips, overriding extension and sniffing
    #[arg(short, long)]
    format: Option<AudioFormat>,

    /// Session log (CSV) to append to
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Config file (defaults to ~/.speech-emotion/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of threads for ONNX inference
    #[arg(long)]
    threads: Option<usize>,

    /// Print the session trend after classifying
    #[arg(short, long)]
    trend: bool,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(model) = &args.model {
        config.model_path = Some(model.clone());
    }
    if let Some(log_file) = &args.log_file {
        config.trend_log_path = Some(log_file.clone());
    }
    if let Some(threads) = args.threads {
        config.n_threads = threads;
    }

    info!("Speech emotion CLI starting...");
    info!("Model: {:?}", config.get_model_path()?);

    let pipeline = match InferencePipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Startup failed: {}", e);
            eprintln!("\n{}", e.user_message());
            eprintln!("{}", e);
            eprintln!("\nPlace the model at {:?}", config.get_model_path()?);
            eprintln!("Or specify a custom path with: --model /path/to/model.onnx");
            return Err(e.into());
        }
    };

    let mut failures = 0usize;
    for path in &args.clips {
        let outcome = match args.format {
            Some(format) => std::fs::read(path)
                .with_context(|| format!("Failed to read {:?}", path))
                .and_then(|bytes| Ok(pipeline.classify(&bytes, Some(format))?)),
            None => pipeline.classify_file(path).map_err(Into::into),
        };

        match outcome {
            Ok(prediction) => print_prediction(path, &prediction, args.json)?,
            Err(e) => {
                failures += 1;
                error!("{:?}: {:#}", path, e);
                match e.downcast_ref::<speech_emotion::PipelineError>() {
                    Some(pipeline_error) => {
                        eprintln!("{}: {}", path.display(), pipeline_error.user_message())
                    }
                    None => eprintln!("{}: {:#}", path.display(), e),
                }
            }
        }
    }

    if args.trend {
        print_trend(&pipeline.trend(), args.json)?;
    }

    if failures > 0 {
        anyhow::bail!("{} of {} clips could not be classified", failures, args.clips.len());
    }

    Ok(())
}

fn print_prediction(path: &std::path::Path, prediction: &Prediction, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "file": path,
            "prediction": prediction,
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    let result = &prediction.result;
    println!(
        "{}: {} ({:.1}%)",
        path.display(),
        result.label.as_str().to_uppercase(),
        result.top_confidence() * 100.0
    );
    for (emotion, confidence) in result.iter() {
        let bar = "#".repeat((confidence * 40.0).round() as usize);
        println!("  {:<10} {:>6.2}% {}", emotion.as_str(), confidence * 100.0, bar);
    }
    if !prediction.logged {
        println!("  (not saved to the session log)");
    }
    Ok(())
}

fn print_trend(trend: &Trend, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(trend)?);
        return Ok(());
    }

    println!("\n--- Session Trend ---");
    if trend.is_empty() {
        println!("No classifications recorded yet.");
        return Ok(());
    }
    for entry in &trend.entries {
        println!(
            "{}  {}",
            entry.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            entry.label
        );
    }
    if let Some(dominant) = trend.dominant() {
        println!("\nMost frequent: {} ({} entries total)", dominant, trend.len());
    }
    Ok(())
}
