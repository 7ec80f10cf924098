//! Error types for procbox operations.

use std::path::PathBuf;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a procbox operation.
pub type ProcboxResult<T> = Result<T, ProcboxError>;

/// An error that occurred while provisioning or controlling a container.
#[derive(Debug, Error)]
pub enum ProcboxError {
    /// The process descriptor is missing a field or holds an unusable value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A network download failed. No partial artifact is left in place.
    #[error("failed to download {url}: {source}")]
    Download {
        /// The URL that could not be fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// A downloaded artifact did not match its expected digest, even after
    /// the single re-download attempt.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// The file whose content hash was checked.
        path: PathBuf,
        /// The digest the descriptor declared.
        expected: String,
        /// The digest the file actually hashed to.
        actual: String,
    },

    /// An archive could not be extracted. The destination is untouched.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// The extraction destination already exists and overwriting is disabled.
    #[error("cannot extract {} because {} already exists and overwrite is disabled", archive.display(), dest.display())]
    Conflict {
        /// The archive that was being extracted.
        archive: PathBuf,
        /// The directory that was already in place.
        dest: PathBuf,
    },

    /// The engine version could not be detected or parsed.
    #[error("unable to determine engine version: {0}")]
    EngineVersion(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML serialization or deserialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An OS-level error reported by a system call.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),
}
