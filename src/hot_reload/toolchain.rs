//! Platform toolchain adapter
//!
//! `Toolchain` is the capability set the reloader drives: build a module from
//! a source file and open a built module. `NativeToolchain` is the only
//! implementation; the platform differences (library naming, loader) are
//! settled at build time by `std::env::consts` and libloading.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use libloading::Library;

use super::abi::{
    symbol_name, CreateObjectFn, DestroyObjectFn, CREATE_OBJECT_SYMBOL, DESTROY_OBJECT_SYMBOL,
};
use super::{io_error, load_error, HotReloadErrorContext, ReloadError, ReloadResult, ToolchainConfig};

/// Opened module
pub trait LibraryHandle {
    /// Locate the exported factory
    fn resolve_create_function(&self) -> ReloadResult<CreateObjectFn>;

    /// Locate the exported destructor
    fn resolve_destroy_function(&self) -> ReloadResult<DestroyObjectFn>;

    /// Release the module
    fn close(self: Box<Self>) -> ReloadResult<()>;
}

/// Compiler and loader for hot-reloadable modules.
///
/// `compile` runs on the compiler thread, everything else on the thread that
/// owns the live object.
pub trait Toolchain: Send + Sync {
    /// Build `source` into a dynamic module at `output`. A failed build leaves
    /// no file at `output`.
    fn compile(&self, source: &Path, output: &Path) -> ReloadResult<()>;

    /// Open a built module
    fn load_library(&self, path: &Path) -> ReloadResult<Box<dyn LibraryHandle>>;

    /// File name of build number `build` of module `name`
    fn library_file_name(&self, name: &str, build: u64) -> String {
        format!(
            "{}{}_{}{}",
            std::env::consts::DLL_PREFIX,
            name,
            build,
            std::env::consts::DLL_SUFFIX
        )
    }
}

/// Module name derived from a source path: the file stem with anything that is
/// not valid in an identifier replaced by `_`.
pub fn module_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());

    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("m_{}", name)
    } else {
        name
    }
}

/// Out-of-process compiler plus the system dynamic loader
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    config: ToolchainConfig,
}

impl NativeToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Build the compiler command for one job
    pub fn command(&self, source: &Path, output: &Path) -> Command {
        let name = module_name(source);
        let source = source.to_string_lossy();
        let output = output.to_string_lossy();

        let mut command = Command::new(&self.config.program);
        command.args(self.config.args.iter().map(|arg| {
            arg.replace("{source}", &source)
                .replace("{output}", &output)
                .replace("{name}", &name)
        }));
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command.envs(&self.config.env);
        command
    }
}

impl Default for NativeToolchain {
    fn default() -> Self {
        Self::new(ToolchainConfig::default())
    }
}

impl Toolchain for NativeToolchain {
    fn compile(&self, source: &Path, output: &Path) -> ReloadResult<()> {
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir).hot_reload_context(dir)?;
        }

        log::info!("Compiling {} -> {}", source.display(), output.display());

        let result = self.command(source, output).output();
        let result = match result {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::PermissionDenied => {
                return Err(ReloadError::ToolchainUnavailable {
                    program: self.config.program.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(io_error(source, e)),
        };

        if !result.status.success() {
            remove_partial_output(output);
            return Err(ReloadError::CompileFailed {
                file: source.to_path_buf(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !output.exists() {
            return Err(ReloadError::CompileFailed {
                file: source.to_path_buf(),
                status: result.status.to_string(),
                stderr: format!("toolchain produced no module at {}", output.display()),
            });
        }

        Ok(())
    }

    fn load_library(&self, path: &Path) -> ReloadResult<Box<dyn LibraryHandle>> {
        let library = unsafe { Library::new(path) }.map_err(|e| load_error(path, e))?;
        Ok(Box::new(DynamicLibrary {
            library,
            path: path.to_path_buf(),
        }))
    }
}

fn remove_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = std::fs::remove_file(output) {
            log::warn!("Failed to remove partial output {}: {}", output.display(), e);
        }
    }
}

/// Module opened through libloading
pub struct DynamicLibrary {
    library: Library,
    path: PathBuf,
}

impl DynamicLibrary {
    fn symbol_error(&self, symbol: &[u8], error: libloading::Error) -> ReloadError {
        ReloadError::SymbolResolutionFailed {
            path: self.path.clone(),
            symbol: symbol_name(symbol),
            reason: error.to_string(),
        }
    }
}

impl LibraryHandle for DynamicLibrary {
    fn resolve_create_function(&self) -> ReloadResult<CreateObjectFn> {
        let symbol = unsafe { self.library.get::<CreateObjectFn>(CREATE_OBJECT_SYMBOL) }
            .map_err(|e| self.symbol_error(CREATE_OBJECT_SYMBOL, e))?;
        Ok(*symbol)
    }

    fn resolve_destroy_function(&self) -> ReloadResult<DestroyObjectFn> {
        let symbol = unsafe { self.library.get::<DestroyObjectFn>(DESTROY_OBJECT_SYMBOL) }
            .map_err(|e| self.symbol_error(DESTROY_OBJECT_SYMBOL, e))?;
        Ok(*symbol)
    }

    fn close(self: Box<Self>) -> ReloadResult<()> {
        let DynamicLibrary { library, path } = *self;
        library.close().map_err(|e| load_error(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name(Path::new("src/game.rs")), "game");
        assert_eq!(module_name(Path::new("my-game.rs")), "my_game");
        assert_eq!(module_name(Path::new("2d.rs")), "m_2d");
    }

    #[test]
    fn test_library_file_name() {
        let toolchain = NativeToolchain::default();
        let name = toolchain.library_file_name("game", 3);

        assert!(name.starts_with(std::env::consts::DLL_PREFIX));
        assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
        assert!(name.contains("game_3"));
    }

    #[test]
    fn test_command_placeholders() {
        let toolchain = NativeToolchain::new(ToolchainConfig {
            program: "cc".to_string(),
            args: vec![
                "-o".to_string(),
                "{output}".to_string(),
                "--name={name}".to_string(),
                "{source}".to_string(),
            ],
            ..ToolchainConfig::default()
        });

        let command = toolchain.command(Path::new("game.c"), Path::new("out/libgame_1.so"));
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(command.get_program(), "cc");
        assert_eq!(args, vec!["-o", "out/libgame_1.so", "--name=game", "game.c"]);
    }

    #[test]
    fn test_missing_toolchain() {
        let temp_dir = TempDir::new().expect("temp dir");
        let toolchain = NativeToolchain::new(ToolchainConfig {
            program: "earth-reload-no-such-compiler".to_string(),
            ..ToolchainConfig::default()
        });

        let err = toolchain
            .compile(&temp_dir.path().join("game.rs"), &temp_dir.path().join("libgame_1.so"))
            .unwrap_err();
        assert!(matches!(err, ReloadError::ToolchainUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_compile_removes_partial_output() {
        let temp_dir = TempDir::new().expect("temp dir");
        let output = temp_dir.path().join("libgame_1.so");
        let toolchain = NativeToolchain::new(ToolchainConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo partial > \"$0\"; echo 'error: broken' >&2; exit 3".to_string(),
                "{output}".to_string(),
            ],
            ..ToolchainConfig::default()
        });

        let err = toolchain
            .compile(&temp_dir.path().join("game.rs"), &output)
            .unwrap_err();

        match err {
            ReloadError::CompileFailed { stderr, .. } => assert_eq!(stderr, "error: broken"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_success_without_output_is_failure() {
        let temp_dir = TempDir::new().expect("temp dir");
        let toolchain = NativeToolchain::new(ToolchainConfig {
            program: "true".to_string(),
            args: vec![],
            ..ToolchainConfig::default()
        });

        let err = toolchain
            .compile(&temp_dir.path().join("game.rs"), &temp_dir.path().join("libgame_1.so"))
            .unwrap_err();
        assert!(matches!(err, ReloadError::CompileFailed { .. }));
    }

    #[test]
    fn test_load_missing_library() {
        let toolchain = NativeToolchain::default();
        let err = toolchain
            .load_library(Path::new("/nonexistent/libgame_1.so"))
            .err()
            .expect("missing library must not load");
        assert!(matches!(err, ReloadError::LoadFailed { .. }));
    }
}
