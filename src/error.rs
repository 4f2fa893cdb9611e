use std::fmt;
use std::path::PathBuf;

/// The error taxonomy for the squash engine and its orchestrator.
///
/// Variants are "kinds, not types": callers that need to special-case
/// "squashing was unnecessary" should match on [`SquashError::SquashUnnecessary`]
/// rather than treat every error the same.
#[derive(Debug)]
pub enum SquashError {
    /// Low-level I/O failure without enough context to classify further.
    IoError(std::io::Error),
    /// A JSON document failed to parse or serialize.
    JsonError(serde_json::Error),
    /// Talking to the container runtime (`docker` CLI / daemon) failed.
    DockerError(String),
    /// The user passed something we can't act on: bad selector, missing
    /// manifest, image name that doesn't resolve, etc.
    InvalidInput(String),
    /// `--from-layer` / layer id selector didn't match anything.
    LayerNotFound(String),
    /// Malformed tar header.
    ArchiveCorrupt(String),
    /// Tar stream ended before all headers/data were read.
    ArchiveTruncated(String),
    /// A hard-link member's target is missing from its own source tar.
    BrokenHardLink(String),
    /// The caller-provided `--tmp-dir` already exists.
    WorkspaceExists(PathBuf),
    /// Could not reach or authenticate to the container runtime.
    DaemonUnavailable(String),
    /// Only one layer was selected; squashing would be a no-op.
    SquashUnnecessary(String),
    /// An invariant the engine assumes was violated; this is a bug.
    Internal(String),
}

impl fmt::Display for SquashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquashError::IoError(err) => write!(f, "IO error: {}", err),
            SquashError::JsonError(err) => write!(f, "JSON error: {}", err),
            SquashError::DockerError(msg) => write!(f, "Docker error: {}", msg),
            SquashError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            SquashError::LayerNotFound(id) => write!(f, "Layer not found: {}", id),
            SquashError::ArchiveCorrupt(msg) => write!(f, "Archive corrupt: {}", msg),
            SquashError::ArchiveTruncated(msg) => write!(f, "Archive truncated: {}", msg),
            SquashError::BrokenHardLink(path) => {
                write!(f, "Hard link target missing from source tar: {}", path)
            }
            SquashError::WorkspaceExists(path) => write!(
                f,
                "The '{}' directory already exists, please remove it before you proceed",
                path.display()
            ),
            SquashError::DaemonUnavailable(msg) => write!(f, "Docker daemon unavailable: {}", msg),
            SquashError::SquashUnnecessary(msg) => write!(f, "Squash unnecessary: {}", msg),
            SquashError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for SquashError {}

impl From<std::io::Error> for SquashError {
    fn from(err: std::io::Error) -> Self {
        SquashError::IoError(err)
    }
}

impl From<serde_json::Error> for SquashError {
    fn from(err: serde_json::Error) -> Self {
        SquashError::JsonError(err)
    }
}

impl SquashError {
    /// The process exit code this error should map to.
    ///
    /// Explicit squash-unnecessary is distinct from a generic failure so
    /// callers can tell "nothing to do" apart from "something broke".
    pub fn exit_code(&self) -> i32 {
        match self {
            SquashError::SquashUnnecessary(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SquashError>;
