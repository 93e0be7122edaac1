//! # Vista
//!
//! Command-line front end for the `vista` classification service: classify
//! images from disk, list the loaded models, and report their health.

mod args;
mod file;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use vista::{
    codec,
    config::AppConfig,
    pipeline::{ClassificationService, ImageRequest, ProgressCallback, RequestContext},
    store::PredictionResult,
};

/// The main entry point for the `vista` application.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::from_env().context("Invalid configuration in environment")?,
    };
    vista::init_tracing(&config.logging);

    let service = tokio::task::spawn_blocking(move || ClassificationService::from_config(config))
        .await?
        .context("Failed to start classification service")?;
    let service = Arc::new(service);

    match args.command {
        Commands::Classify {
            path,
            model,
            batch,
            json,
            timeout_ms,
        } => {
            let sweeper = service.spawn_sweeper();
            let ctx = match timeout_ms {
                Some(ms) => RequestContext::new().with_timeout(Duration::from_millis(ms)),
                None => RequestContext::new(),
            };
            let outcome = if batch {
                run_batch(service.clone(), path, model, ctx, json).await
            } else {
                run_classify(service.clone(), path, model, ctx, json).await
            };
            sweeper.shutdown().await;
            outcome?;
        }
        Commands::Models => {
            let models = service.list_models();
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
        Commands::Health => {
            let health = service.model_health_snapshot();
            let stats = service.stats();
            println!("{}", serde_json::to_string_pretty(&health)?);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Runs each image through the upload and prediction path.
async fn run_classify(
    service: Arc<ClassificationService>,
    path: PathBuf,
    model: Option<String>,
    ctx: RequestContext,
    json: bool,
) -> Result<()> {
    let files = file::image_files(&path)?;
    if files.is_empty() {
        println!("No images found in {}", path.display());
        return Ok(());
    }

    let mut failed = 0;
    for image_path in files {
        let data = tokio::fs::read(&image_path)
            .await
            .with_context(|| format!("Failed to read {}", image_path.display()))?;
        let filename = file::file_name(&image_path);

        let service = service.clone();
        let model = model.clone();
        let ctx = ctx.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let content_type = codec::sniff_mime(&data);
            let upload = service.process_upload(
                &data,
                &filename,
                content_type,
                data.len() as u64,
                &ctx,
            )?;
            service.predict(&upload.bytes, upload.metadata, model.as_deref(), &ctx)
        })
        .await?;

        match outcome {
            Ok(result) => print_result(&result, json)?,
            Err(e) => {
                failed += 1;
                let response = e.to_response();
                eprintln!(
                    "{}: {} ({})",
                    image_path.display(),
                    response.message,
                    response.code
                );
            }
        }
    }

    if failed > 0 {
        eprintln!("{} image(s) failed", failed);
    }
    Ok(())
}

/// Sends all images as one batch and prints the combined response.
async fn run_batch(
    service: Arc<ClassificationService>,
    path: PathBuf,
    model: Option<String>,
    ctx: RequestContext,
    json: bool,
) -> Result<()> {
    let mut requests = Vec::new();
    for image_path in file::image_files(&path)? {
        let data = tokio::fs::read(&image_path)
            .await
            .with_context(|| format!("Failed to read {}", image_path.display()))?;
        requests.push(ImageRequest {
            id: image_path.display().to_string(),
            filename: file::file_name(&image_path),
            data,
        });
    }

    let progress_callback: ProgressCallback = Box::new(move |progress: f32, message: String| {
        if !json {
            println!("Progress: {:.2}% {}", progress * 100.0, message);
        }
    });

    let response = tokio::task::spawn_blocking(move || {
        service.predict_batch(requests, model.as_deref(), &ctx, Some(progress_callback))
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    for result in response.results.values() {
        print_result(result, false)?;
    }
    for (id, error) in &response.errors {
        eprintln!("{}: {} ({})", id, error.details, error.code);
    }
    println!(
        "Batch finished in {:.1} ms: {} succeeded, {} failed",
        response.process_time_ms,
        response.results.len(),
        response.errors.len()
    );
    Ok(())
}

fn print_result(result: &PredictionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!(
        "{} [{}] via {} in {:.1} ms",
        result.metadata.filename, result.id, result.model_info.id, result.process_time_ms
    );
    for prediction in &result.predictions {
        println!(
            "  {:<20} {:>6.2}%  (confidence {:.3})",
            prediction.label,
            prediction.probability * 100.0,
            prediction.confidence
        );
    }
    Ok(())
}
