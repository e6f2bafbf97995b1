//! Hot-Reload System
//!
//! Enables live updates of code without restarting the host. A main source
//! file (plus any dependencies) is watched, rebuilt into a dynamic module on a
//! background thread and swapped into the running process between two ticks.
//!
//! Key features:
//! - Change detection by metadata polling, sped up by filesystem events
//! - Single-flight background compilation with coalesced follow-up builds
//! - Generation-tagged module exports so objects are always destroyed by the
//!   module that created them
//! - Ordered lifecycle notifications around every swap

pub mod abi;
pub mod error;
pub mod events;
pub mod module;
pub mod registry;
pub mod reloader;
pub mod toolchain;
#[cfg(feature = "native")]
pub mod watcher;
pub mod worker;

pub use abi::{CreateObjectFn, DestroyObjectFn, ModuleExports, ObjectVTable, RawObject};
pub use error::{
    io_error, load_error, HotReloadErrorContext, HotReloadResult, ReloadError, ReloadResult,
};
pub use events::{EventBus, ReloadEvent, ReloadListener};
pub use module::{Generation, LiveObject, LoadedModule};
pub use registry::{FileRole, FileSignature, WatchRegistry, WatchedFile};
pub use reloader::{HotReloader, ReloadState};
pub use toolchain::{module_name, DynamicLibrary, LibraryHandle, NativeToolchain, Toolchain};
#[cfg(feature = "native")]
pub use watcher::{FileWatcher, WatchEvent, WatchEventType};
pub use worker::{CompilationJob, CompilationWorker, CompletedJob};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Compiler invocation.
///
/// `args` may use the placeholders `{source}`, `{output}` and `{name}` (the
/// module name derived from the source file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable
    pub program: String,

    /// Argument template
    pub args: Vec<String>,

    /// Working directory of the compiler
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "rustc".to_string(),
            args: [
                "--crate-type=cdylib",
                "--edition=2021",
                "--crate-name",
                "{name}",
                "-C",
                "opt-level=0",
                "-o",
                "{output}",
                "{source}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

/// Hot-reload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Directory the compiled modules are written to
    pub build_dir: PathBuf,

    /// Type name passed to the module factory
    pub object_type: String,

    /// Minimum time between two metadata polls of the watched files
    pub poll_interval_ms: u64,

    /// Poll immediately when the filesystem reports a change
    pub use_fs_events: bool,

    /// Debounce time for filesystem events in milliseconds
    pub debounce_ms: u64,

    /// Delete module files once they are unloaded or failed to load
    pub remove_stale_builds: bool,

    /// Compiler invocation
    pub toolchain: ToolchainConfig,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            build_dir: std::env::temp_dir().join("earth_reload"),
            object_type: "Main".to_string(),
            poll_interval_ms: 500,
            use_fs_events: true,
            debounce_ms: 100,
            remove_stale_builds: true,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl HotReloadConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ReloadResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).hot_reload_context(path)?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ReloadError::Config { reason, .. } => ReloadError::Config {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(raw: &str) -> ReloadResult<Self> {
        toml::from_str(raw).map_err(|e| ReloadError::Config {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
