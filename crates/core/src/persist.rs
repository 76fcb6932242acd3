//! Writing collected artifacts to disk.
//!
//! Every artifact is decoded and re-encoded as PNG, so the saved files
//! are valid images regardless of what encoding the server streamed.
//! All functions here are blocking; async callers should run them on
//! `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::naming::artifact_filename;
use crate::outputs::OutputMap;

/// Errors from artifact persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Artifact bytes are not a decodable image.
    #[error("artifact {index} from node {node} is not a decodable image: {source}")]
    Decode {
        node: String,
        index: usize,
        #[source]
        source: image::ImageError,
    },

    /// Re-encoding to PNG or writing the file failed.
    #[error("failed to write image to {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Directory creation or removal failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Save every artifact in `outputs` into `dir` as `{prefix}_{index}.png`.
///
/// The index runs over nodes in mapping order, then over each node's
/// artifacts in order. `dir` is created if missing. Returns the written
/// paths in index order.
pub fn save_images(
    outputs: &OutputMap,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, PersistError> {
    fs::create_dir_all(dir).map_err(|source| PersistError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::new();
    for (node, artifacts) in outputs {
        for bytes in artifacts {
            let index = written.len();
            let image = image::load_from_memory(bytes).map_err(|source| PersistError::Decode {
                node: node.clone(),
                index,
                source,
            })?;

            let path = dir.join(artifact_filename(prefix, index));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|source| PersistError::Encode {
                    path: path.clone(),
                    source,
                })?;

            tracing::debug!(node = %node, path = %path.display(), bytes = bytes.len(), "Saved artifact");
            written.push(path);
        }
    }

    tracing::info!(count = written.len(), dir = %dir.display(), "Saved images");
    Ok(written)
}

/// Remove `dir` if it exists, then create it empty.
pub fn reset_dir(dir: &Path) -> Result<(), PersistError> {
    remove_dir_if_exists(dir)?;
    fs::create_dir_all(dir).map_err(|source| PersistError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Remove `dir` and its contents. A missing directory is not an error.
pub fn remove_dir_if_exists(dir: &Path) -> Result<(), PersistError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
