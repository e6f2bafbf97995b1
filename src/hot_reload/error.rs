//! Hot reload error handling
//!
//! Every failure of a compile/load cycle is a `ReloadError`. From the outside
//! they all collapse into a failed `CompilationFinished` notification; only a
//! failed first cycle is surfaced on its own as `InitialLoadFailed`.

use std::path::{Path, PathBuf};

use super::module::Generation;

/// Type alias for hot reload results
pub type HotReloadResult<T> = Result<T, ReloadError>;

/// Shorter alias used throughout the crate
pub type ReloadResult<T> = HotReloadResult<T>;

/// Hot reload error types
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("toolchain `{program}` is not available: {reason}")]
    ToolchainUnavailable { program: String, reason: String },

    #[error("compilation of {} failed ({status}): {stderr}", .file.display())]
    CompileFailed {
        file: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("failed to load module {}: {reason}", .path.display())]
    LoadFailed { path: PathBuf, reason: String },

    #[error("module {} does not export `{symbol}`: {reason}", .path.display())]
    SymbolResolutionFailed {
        path: PathBuf,
        symbol: String,
        reason: String,
    },

    #[error("module generation {generation} could not create an object of type `{type_name}`")]
    InstantiationFailed {
        type_name: String,
        generation: Generation,
    },

    #[error("object of generation {object} cannot be destroyed by module generation {module}")]
    GenerationMismatch {
        object: Generation,
        module: Generation,
    },

    #[error("a compilation job is already in flight")]
    JobInFlight,

    #[error("no main file is registered")]
    NoMainFile,

    #[error("compiler thread panicked while building {}", .file.display())]
    WorkerPanicked { file: PathBuf },

    #[error("initial load failed, no live object is available: {0}")]
    InitialLoadFailed(#[source] Box<ReloadError>),

    #[error("I/O error on {}: {error}", .path.display())]
    Io { path: PathBuf, error: String },

    #[error("invalid configuration {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("file watcher error: {0}")]
    Watch(String),
}

impl ReloadError {
    /// Whether the host can keep running its previous live object
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReloadError::InitialLoadFailed(_))
    }
}

/// Helper trait for attaching a path to I/O failures
pub trait HotReloadErrorContext<T> {
    fn hot_reload_context(self, path: &Path) -> HotReloadResult<T>
    where
        Self: Sized;
}

impl<T> HotReloadErrorContext<T> for Result<T, std::io::Error> {
    fn hot_reload_context(self, path: &Path) -> HotReloadResult<T> {
        self.map_err(|e| io_error(path, e))
    }
}

/// Create an I/O error for a path
pub fn io_error(path: &Path, error: impl std::fmt::Display) -> ReloadError {
    ReloadError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

/// Create a module load error
pub fn load_error(path: &Path, error: impl std::fmt::Display) -> ReloadError {
    ReloadError::LoadFailed {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}
