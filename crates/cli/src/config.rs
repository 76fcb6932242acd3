//! Run configuration: the parsed command line checked for the things
//! clap cannot express (address shape, filename prefix, staging path,
//! timeout).

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use comfydl_core::naming::validate_prefix;
use comfydl_core::CoreError;

use crate::cli::{Cli, MediaType};

/// Validated settings for one download run.
///
/// Built from the parsed command line with [`DownloadConfig::from_cli`];
/// everything clap cannot check on its own is checked here.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// ComfyUI `host:port`, without a scheme.
    pub server_address: String,
    pub media_path: PathBuf,
    pub media_type: MediaType,
    pub workflow_path: PathBuf,
    /// Frames per second for video assembly (at least 1).
    pub frame_rate: u32,
    pub filename_prefix: String,
    /// Wiped before and after video assembly.
    pub staging_dir: PathBuf,
    /// Overall deadline for waiting on the job. `None` waits forever.
    pub timeout: Option<Duration>,
    pub ffmpeg_bin: String,
}

impl DownloadConfig {
    /// Validate `cli` and turn it into a run configuration.
    ///
    /// | Check             | Rule                                           |
    /// |-------------------|------------------------------------------------|
    /// | `server_address`  | non-empty, no scheme, no whitespace            |
    /// | `filename_prefix` | see [`validate_prefix`]                        |
    /// | `staging_dir`     | not empty, not `.`/`..`, not the media path    |
    /// | `timeout_secs`    | greater than zero when set                     |
    pub fn from_cli(cli: &Cli) -> Result<Self, CoreError> {
        let server_address = cli.server_address.trim().to_string();
        validate_server_address(&server_address)?;
        validate_prefix(&cli.filename_prefix)?;
        validate_staging_dir(&cli.staging_dir, &cli.media_path)?;

        let timeout = match cli.timeout_secs {
            Some(0) => {
                return Err(CoreError::Validation(
                    "timeout must be greater than zero seconds".into(),
                ))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(Self {
            server_address,
            media_path: cli.media_path.clone(),
            media_type: cli.media_type,
            workflow_path: cli.workflow_path.clone(),
            frame_rate: cli.frame_rate,
            filename_prefix: cli.filename_prefix.clone(),
            staging_dir: cli.staging_dir.clone(),
            timeout,
            ffmpeg_bin: cli.ffmpeg_bin.clone(),
        })
    }
}

fn validate_server_address(address: &str) -> Result<(), CoreError> {
    if address.is_empty() {
        return Err(CoreError::Validation(
            "server address must not be empty".into(),
        ));
    }
    if address.contains("://") {
        return Err(CoreError::Validation(format!(
            "server address must be host:port without a scheme, got {address:?}"
        )));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(format!(
            "server address must not contain whitespace, got {address:?}"
        )));
    }
    Ok(())
}

// The staging directory is deleted recursively, so it must never be the
// working directory or the directory the results go into.
fn validate_staging_dir(staging: &Path, media_path: &Path) -> Result<(), CoreError> {
    let has_normal_component = staging
        .components()
        .any(|c| matches!(c, Component::Normal(_)));
    if !has_normal_component {
        return Err(CoreError::Validation(format!(
            "staging directory {} must name a dedicated subdirectory",
            staging.display()
        )));
    }
    if normalize(staging) == normalize(media_path) {
        return Err(CoreError::Validation(format!(
            "staging directory {} must differ from the media path",
            staging.display()
        )));
    }
    Ok(())
}

/// Lexical normalization: drops `.` components and trailing separators.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
