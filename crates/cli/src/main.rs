//! `comfydl` -- run a ComfyUI workflow and download its images or video.
//!
//! See [`comfydl_cli::cli::Cli`] for flags and their environment
//! variables. `RUST_LOG` controls log output.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfydl_cli::cli::Cli;
use comfydl_cli::config::DownloadConfig;
use comfydl_cli::pipeline::{self, DownloadReport};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfydl=info,comfydl_cli=info,comfydl_comfyui=info,comfydl_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Download failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DownloadConfig::from_cli(&cli).context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let trigger = tokio::spawn(cancel_on_signal(cancel.clone(), config.timeout));

    let result = pipeline::run(&config, &cancel).await;
    trigger.abort();

    match result.context("Download pipeline failed")? {
        DownloadReport::Images(paths) => {
            tracing::info!(
                count = paths.len(),
                dir = %config.media_path.display(),
                "Images downloaded",
            );
        }
        DownloadReport::Video(summary) => {
            tracing::info!(
                path = %summary.path.display(),
                frames = summary.frame_count,
                width = summary.width,
                height = summary.height,
                "Video downloaded",
            );
        }
    }
    Ok(())
}

/// Trip `cancel` on Ctrl-C, SIGTERM, or once `deadline` has elapsed.
async fn cancel_on_signal(cancel: CancellationToken, deadline: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let timeout = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), cancelling job"),
        () = terminate => tracing::info!("Received SIGTERM, cancelling job"),
        () = timeout => tracing::warn!(?deadline, "Deadline elapsed, cancelling job"),
        () = cancel.cancelled() => return,
    }
    cancel.cancel();
}
