//! The download pipeline: load the workflow, run it, persist the results.
//!
//! [`run`] is everything the binary does after argument parsing. It is a
//! library function so the integration tests can drive it against a fake
//! server.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use comfydl_comfyui::api::ComfyUIApi;
use comfydl_comfyui::client::ComfyUIClient;
use comfydl_comfyui::job::{run_job, JobError};
use comfydl_core::ffmpeg::{
    assemble_video, probe_video, EncodeRequest, FfmpegError, VideoSummary, DEFAULT_FFPROBE_BIN,
    VIDEO_FILENAME,
};
use comfydl_core::outputs::{artifact_count, OutputMap};
use comfydl_core::persist::{remove_dir_if_exists, reset_dir, save_images, PersistError};

use crate::cli::MediaType;
use crate::config::DownloadConfig;

/// Errors from a download run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read workflow {}: {source}", path.display())]
    ReadWorkflow {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow {} is not valid JSON: {source}", path.display())]
    ParseWorkflow {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("workflow {} must be a JSON object keyed by node id", path.display())]
    InvalidWorkflow { path: PathBuf },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("video assembly failed: {0}")]
    Video(#[from] FfmpegError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The token was tripped after the job finished, while writing results.
    #[error("cancelled while writing results")]
    Cancelled,
}

/// What a successful run left on disk.
#[derive(Debug)]
pub enum DownloadReport {
    /// Image mode: the written PNG files, in index order.
    Images(Vec<PathBuf>),
    /// Video mode: the encoded video.
    Video(VideoSummary),
}

/// Read a workflow file in ComfyUI API format.
///
/// The contents are passed through untouched; the only check is that the
/// top level is a JSON object.
pub fn load_workflow(path: &Path) -> Result<serde_json::Value, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PipelineError::ReadWorkflow {
        path: path.to_path_buf(),
        source,
    })?;
    let workflow: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| PipelineError::ParseWorkflow {
            path: path.to_path_buf(),
            source,
        })?;
    if !workflow.is_object() {
        return Err(PipelineError::InvalidWorkflow {
            path: path.to_path_buf(),
        });
    }
    Ok(workflow)
}

/// Run one download end to end.
///
/// Tripping `cancel` aborts the run at whatever stage it is in: job
/// stages fail with [`PipelineError::Job`], writing and encoding with
/// [`PipelineError::Cancelled`]. In video mode the staging directory is
/// removed either way.
pub async fn run(
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<DownloadReport, PipelineError> {
    let workflow = load_workflow(&config.workflow_path)?;

    let client = ComfyUIClient::from_address(&config.server_address);
    let api = ComfyUIApi::new(client.api_url().to_string());

    tracing::info!(
        server = %config.server_address,
        workflow = %config.workflow_path.display(),
        media_type = ?config.media_type,
        "Starting download",
    );

    let job = run_job(&client, &api, &workflow, cancel).await?;
    if artifact_count(&job.outputs) == 0 {
        tracing::warn!(prompt_id = %job.prompt_id, "Job produced no images");
    }

    match config.media_type {
        MediaType::Image => {
            let save = save_blocking(job.outputs, config.media_path.clone(), config);
            let paths = until_cancelled(cancel, save).await?;
            Ok(DownloadReport::Images(paths))
        }
        MediaType::Video => {
            let summary = make_video(job.outputs, config, cancel).await?;
            Ok(DownloadReport::Video(summary))
        }
    }
}

/// Stage the images, encode them, and remove the staging directory again
/// whether or not encoding succeeded.
async fn make_video(
    outputs: OutputMap,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<VideoSummary, PipelineError> {
    let staging = config.staging_dir.clone();
    {
        let staging = staging.clone();
        tokio::task::spawn_blocking(move || reset_dir(&staging)).await??;
    }

    let result = until_cancelled(cancel, encode_staged(outputs, config)).await;

    let cleanup = {
        let staging = staging.clone();
        tokio::task::spawn_blocking(move || remove_dir_if_exists(&staging)).await
    };
    match cleanup {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to remove staging directory"),
        Err(e) => tracing::warn!(error = %e, "Staging cleanup task failed"),
    }

    let summary = result?;
    log_probe(&summary.path).await;
    Ok(summary)
}

async fn encode_staged(
    outputs: OutputMap,
    config: &DownloadConfig,
) -> Result<VideoSummary, PipelineError> {
    save_blocking(outputs, config.staging_dir.clone(), config).await?;

    let output_path = config.media_path.join(VIDEO_FILENAME);
    let request = EncodeRequest {
        ffmpeg_bin: &config.ffmpeg_bin,
        frames_dir: &config.staging_dir,
        prefix: &config.filename_prefix,
        frame_rate: config.frame_rate,
        output_path: &output_path,
    };
    let summary = assemble_video(&request).await?;

    tracing::info!(
        path = %summary.path.display(),
        frames = summary.frame_count,
        frame_rate = summary.frame_rate,
        "Video written",
    );
    Ok(summary)
}

/// Drive `work` unless `cancel` trips first. Dropping an in-flight encode
/// kills the ffmpeg child; a blocking save already handed to the pool
/// runs to completion in the background.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = work => result,
    }
}

async fn save_blocking(
    outputs: OutputMap,
    dir: PathBuf,
    config: &DownloadConfig,
) -> Result<Vec<PathBuf>, PipelineError> {
    let prefix = config.filename_prefix.clone();
    let paths =
        tokio::task::spawn_blocking(move || save_images(&outputs, &dir, &prefix)).await??;
    Ok(paths)
}

/// Log what ffprobe reads back from the finished video. ffprobe is
/// optional, so failures only show up at debug level.
async fn log_probe(path: &Path) {
    match probe_video(DEFAULT_FFPROBE_BIN, path).await {
        Ok(probe) => tracing::info!(
            path = %path.display(),
            duration_secs = ?probe.duration_secs(),
            frame_rate = ?probe.frame_rate(),
            frames = ?probe.frame_count(),
            resolution = ?probe.resolution(),
            "Video probed",
        ),
        Err(e) => tracing::debug!(error = %e, "Skipping video probe"),
    }
}
