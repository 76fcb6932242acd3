//! Artifact file naming convention.
//!
//! Saved artifacts are named `{prefix}_{index}.png`, where `index` runs
//! across every artifact of an output mapping (nodes in order, then
//! artifacts in order), starting at zero.

use crate::error::CoreError;

/// File extension used for every saved artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Build the filename for the artifact at `index`.
///
/// # Examples
///
/// ```
/// use comfydl_core::naming::artifact_filename;
///
/// assert_eq!(artifact_filename("output", 0), "output_0.png");
/// assert_eq!(artifact_filename("frame", 12), "frame_12.png");
/// ```
pub fn artifact_filename(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index}.{ARTIFACT_EXTENSION}")
}

/// The ffmpeg `image2` input pattern matching [`artifact_filename`].
pub fn artifact_pattern(prefix: &str) -> String {
    format!("{prefix}_%d.{ARTIFACT_EXTENSION}")
}

/// Extract the numeric index from an artifact filename.
///
/// Only the digits after the last `_` of the stem count, so prefixes
/// containing underscores are fine. Returns `None` for anything that is
/// not a `.png` with a numeric suffix.
pub fn parse_artifact_index(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_suffix(&format!(".{ARTIFACT_EXTENSION}"))?;
    let (_, digits) = stem.rsplit_once('_')?;
    digits.parse().ok()
}

/// Reject prefixes that would escape the output directory or produce
/// an unparseable filename.
pub fn validate_prefix(prefix: &str) -> Result<(), CoreError> {
    if prefix.is_empty() {
        return Err(CoreError::Validation(
            "Filename prefix must not be empty".to_string(),
        ));
    }
    if prefix.contains(['/', '\\']) || prefix == "." || prefix == ".." {
        return Err(CoreError::Validation(format!(
            "Filename prefix '{prefix}' must not contain path components"
        )));
    }
    if prefix.contains('%') {
        return Err(CoreError::Validation(format!(
            "Filename prefix '{prefix}' must not contain '%'"
        )));
    }
    Ok(())
}
