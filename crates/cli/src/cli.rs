//! Command-line surface.
//!
//! Every flag can also be set through an environment variable (or a
//! `.env` file, loaded at startup). The snake_case spellings
//! (`--server_address`, `--media_path`, ...) are accepted as aliases.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use comfydl_core::ffmpeg::DEFAULT_FFMPEG_BIN;

/// What to produce from the job's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaType {
    /// Save every image as `{prefix}_{index}.png`.
    #[value(name = "IMAGE")]
    Image,
    /// Encode all images, in order, into `output.mp4`.
    #[value(name = "VIDEO")]
    Video,
}

/// Run a ComfyUI workflow and download what it generates.
#[derive(Parser, Debug, Clone)]
#[command(name = "comfydl", version)]
pub struct Cli {
    /// Address of the ComfyUI server (`host:port`).
    #[arg(
        long,
        alias = "server_address",
        env = "COMFYUI_SERVER",
        default_value = "127.0.0.1:8188"
    )]
    pub server_address: String,

    /// Directory the images or video are written to.
    #[arg(long, alias = "media_path", env = "COMFYDL_MEDIA_PATH", default_value = ".")]
    pub media_path: PathBuf,

    /// Type of media to download.
    #[arg(
        long = "type",
        env = "COMFYDL_MEDIA_TYPE",
        value_enum,
        ignore_case = true,
        default_value_t = MediaType::Image
    )]
    pub media_type: MediaType,

    /// Path to the workflow file, in ComfyUI API format.
    #[arg(
        long,
        alias = "workflow_path",
        env = "COMFYDL_WORKFLOW",
        default_value = "workflows/video_workflows_api.json"
    )]
    pub workflow_path: PathBuf,

    /// Frame rate of the video.
    #[arg(
        long,
        alias = "frame_rate",
        env = "COMFYDL_FRAME_RATE",
        default_value_t = 24,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub frame_rate: u32,

    /// Prefix for the filenames of the saved images.
    #[arg(
        long,
        alias = "filename_prefix",
        env = "COMFYDL_PREFIX",
        default_value = "output"
    )]
    pub filename_prefix: String,

    /// Scratch directory for video frames; wiped before and after use.
    #[arg(
        long,
        env = "COMFYDL_STAGING_DIR",
        default_value = "temporary_images_for_video"
    )]
    pub staging_dir: PathBuf,

    /// Give up waiting for the job after this many seconds.
    #[arg(long, env = "COMFYDL_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// ffmpeg binary used for video assembly.
    #[arg(long, env = "FFMPEG_BIN", default_value = DEFAULT_FFMPEG_BIN)]
    pub ffmpeg_bin: String,
}
