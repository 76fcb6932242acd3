//! FFmpeg/FFprobe video assembly.
//!
//! Turns a directory of `{prefix}_{index}.png` frames into an MP4 by
//! shelling out to `ffmpeg`, and reads back stream facts with `ffprobe`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::naming::{artifact_filename, artifact_pattern, parse_artifact_index};

/// Default ffmpeg binary, resolved through `PATH`.
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

/// Default ffprobe binary, resolved through `PATH`.
pub const DEFAULT_FFPROBE_BIN: &str = "ffprobe";

/// Filename of the assembled video inside the output directory.
pub const VIDEO_FILENAME: &str = "output.mp4";

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("no frames matching '{pattern}' in {}", dir.display())]
    NoFrames { dir: PathBuf, pattern: String },

    #[error("frame sequence has a gap: expected index {expected}, found {found}")]
    NonContiguousFrames { expected: usize, found: usize },

    #[error("frame {} is {width}x{height}, expected {expected_width}x{expected_height}", path.display())]
    FrameSizeMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("failed to read frame header: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One numbered frame on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

/// What [`assemble_video`] produced.
#[derive(Debug, Clone)]
pub struct VideoSummary {
    pub path: PathBuf,
    pub frame_count: usize,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
}

/// Request for [`assemble_video`].
#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    /// ffmpeg binary name or path.
    pub ffmpeg_bin: &'a str,
    /// Directory holding the `{prefix}_{index}.png` frames.
    pub frames_dir: &'a Path,
    pub prefix: &'a str,
    /// Frames per second, at least 1.
    pub frame_rate: u32,
    pub output_path: &'a Path,
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Frame discovery
// ---------------------------------------------------------------------------

/// List the `{prefix}_{index}.png` frames in `dir`, sorted by index.
///
/// Sorting is numeric, so `_10` follows `_9`. Files with other names
/// are skipped.
pub fn collect_frames(dir: &Path, prefix: &str) -> Result<Vec<Frame>, FfmpegError> {
    let mut frames = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        // "out_a_1.png" and "out_01.png" are not frames of prefix "out".
        let Some(index) = parse_artifact_index(name) else {
            continue;
        };
        if name != artifact_filename(prefix, index) {
            continue;
        }
        frames.push(Frame {
            index,
            path: entry.path(),
        });
    }

    frames.sort_by_key(|f| f.index);
    Ok(frames)
}

/// Check that frames exist, start at zero with no gaps, and share one
/// size. Returns that size as `(width, height)`.
pub fn validate_frames(
    frames: &[Frame],
    dir: &Path,
    prefix: &str,
) -> Result<(u32, u32), FfmpegError> {
    let Some(first) = frames.first() else {
        return Err(FfmpegError::NoFrames {
            dir: dir.to_path_buf(),
            pattern: artifact_pattern(prefix),
        });
    };

    for (expected, frame) in frames.iter().enumerate() {
        if frame.index != expected {
            return Err(FfmpegError::NonContiguousFrames {
                expected,
                found: frame.index,
            });
        }
    }

    let (expected_width, expected_height) = image::image_dimensions(&first.path)?;
    for frame in &frames[1..] {
        let (width, height) = image::image_dimensions(&frame.path)?;
        if (width, height) != (expected_width, expected_height) {
            return Err(FfmpegError::FrameSizeMismatch {
                path: frame.path.clone(),
                width,
                height,
                expected_width,
                expected_height,
            });
        }
    }

    Ok((expected_width, expected_height))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Build the ffmpeg argument list for encoding an image sequence.
///
/// Uses the MPEG-4 Part 2 encoder in an MP4 container, the same codec
/// family as the `mp4v` fourcc.
pub fn build_encode_args(req: &EncodeRequest<'_>) -> Vec<OsString> {
    let input = req.frames_dir.join(artifact_pattern(req.prefix));
    let mut args: Vec<OsString> = [
        "-y",
        "-loglevel",
        "error",
        "-framerate",
        req.frame_rate.to_string().as_str(),
        "-start_number",
        "0",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(input.into_os_string());
    args.extend(
        ["-c:v", "mpeg4", "-q:v", "2", "-pix_fmt", "yuv420p"]
            .into_iter()
            .map(OsString::from),
    );
    args.push(req.output_path.as_os_str().to_os_string());
    args
}

/// Encode the frames in `req.frames_dir` into `req.output_path`.
///
/// Frames are validated first, so a missing, gapped, or mixed-size
/// sequence fails before ffmpeg runs.
pub async fn assemble_video(req: &EncodeRequest<'_>) -> Result<VideoSummary, FfmpegError> {
    let frames = collect_frames(req.frames_dir, req.prefix)?;
    let (width, height) = validate_frames(&frames, req.frames_dir, req.prefix)?;

    if let Some(parent) = req.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tracing::info!(
        frames = frames.len(),
        frame_rate = req.frame_rate,
        width,
        height,
        output = %req.output_path.display(),
        "Encoding video",
    );

    let output = tokio::process::Command::new(req.ffmpeg_bin)
        .args(build_encode_args(req))
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(VideoSummary {
        path: req.output_path.to_path_buf(),
        frame_count: frames.len(),
        frame_rate: req.frame_rate,
        width,
        height,
    })
}

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(ffprobe_bin: &str, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    let output = tokio::process::Command::new(ffprobe_bin)
        .kill_on_drop(true)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

// ---------------------------------------------------------------------------
// Reading ffprobe results
// ---------------------------------------------------------------------------

impl FfprobeOutput {
    fn video_stream(&self) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Duration in seconds: the container's, else the video stream's.
    pub fn duration_secs(&self) -> Option<f64> {
        let container = self.format.duration.as_deref().and_then(parse_positive);
        container.or_else(|| self.video_stream()?.duration.as_deref().and_then(parse_positive))
    }

    /// Frames per second from `r_frame_rate` (`"30/1"`, `"24000/1001"`).
    pub fn frame_rate(&self) -> Option<f64> {
        self.video_stream()?.r_frame_rate.as_deref().and_then(parse_rate)
    }

    /// `nb_frames` when the container records it, else duration × rate.
    pub fn frame_count(&self) -> Option<u64> {
        let recorded = self
            .video_stream()
            .and_then(|s| s.nb_frames.as_deref())
            .and_then(|n| n.parse().ok());
        recorded.or_else(|| {
            let estimate = self.duration_secs()? * self.frame_rate()?;
            Some(estimate.round() as u64)
        })
    }

    /// `(width, height)` of the video stream.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        let stream = self.video_stream()?;
        Some((stream.width?, stream.height?))
    }
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num = parse_positive(num)?;
            let den = parse_positive(den)?;
            Some(num / den)
        }
        None => parse_positive(raw),
    }
}
