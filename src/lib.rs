//! Earth Reload
//!
//! Live code hot-reload for native hosts. A source file is watched, rebuilt
//! into a dynamic module in the background and the object it exports is
//! swapped into the running host without a restart.

pub mod hot_reload;

pub use hot_reload::{
    FileRole, Generation, HotReloadConfig, HotReloader, LiveObject, ReloadError, ReloadEvent,
    ReloadListener, ReloadResult, ReloadState, Toolchain, ToolchainConfig,
};
