use std::ffi::{c_void, CString};
use std::fmt;
use std::path::{Path, PathBuf};

use super::abi::{ModuleExports, ObjectVTable, RawObject};
use super::toolchain::{LibraryHandle, Toolchain};
use super::{ReloadError, ReloadResult};

/// One successful load of the module. Objects remember the generation that
/// created them so they are never destroyed by another build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Instance produced by the active module's factory
pub struct LiveObject {
    raw: RawObject,
    type_name: String,
    generation: Generation,
}

impl LiveObject {
    fn vtable(&self) -> &ObjectVTable {
        // The vtable is static data inside the module, which outlives the object.
        unsafe { &*self.raw.vtable }
    }

    /// Type name the object was created with
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Module generation that created this object
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Opaque instance pointer, for hosts that know the concrete type
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw.instance
    }

    pub fn start(&mut self) {
        if let Some(start) = self.vtable().start {
            unsafe { start(self.raw.instance) }
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.vtable().stop {
            unsafe { stop(self.raw.instance) }
        }
    }

    /// Advance the object by one frame
    pub fn update(&mut self, delta_time: f32) {
        if let Some(update) = self.vtable().update {
            unsafe { update(self.raw.instance, delta_time) }
        }
    }
}

impl fmt::Debug for LiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveObject")
            .field("type_name", &self.type_name)
            .field("generation", &self.generation)
            .field("instance", &self.raw.instance)
            .finish()
    }
}

/// Loaded module instance.
///
/// Only the reloader opens modules, so generation tags stay unique among the
/// modules and objects one reloader owns:
///
/// ```compile_fail
/// use earth_reload::hot_reload::{Generation, LoadedModule, NativeToolchain};
///
/// let toolchain = NativeToolchain::default();
/// let _ = LoadedModule::load(&toolchain, "libgame_1.so", Generation(1));
/// ```
pub struct LoadedModule {
    /// Library file this generation was opened from
    path: PathBuf,

    /// Generation tag shared with every object created here
    generation: Generation,

    /// Resolved factory and destructor
    exports: ModuleExports,

    /// Library handle, released last
    handle: Box<dyn LibraryHandle>,
}

impl LoadedModule {
    /// Open a module and resolve both exports. The handle is released again
    /// if either symbol is missing.
    pub(crate) fn load(
        toolchain: &dyn Toolchain,
        path: impl AsRef<Path>,
        generation: Generation,
    ) -> ReloadResult<Self> {
        let path = path.as_ref();
        let handle = toolchain.load_library(path)?;

        let exports = match resolve_exports(handle.as_ref()) {
            Ok(exports) => exports,
            Err(e) => {
                if let Err(close_err) = handle.close() {
                    log::warn!("Failed to release {}: {}", path.display(), close_err);
                }
                return Err(e);
            }
        };

        log::info!("Loaded module {} as generation {}", path.display(), generation);
        Ok(Self {
            path: path.to_path_buf(),
            generation,
            exports,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Library file name, e.g. `libgame_3.so`
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Create an object through this generation's factory
    pub(crate) fn create_object(&self, type_name: &str) -> ReloadResult<LiveObject> {
        let failed = || ReloadError::InstantiationFailed {
            type_name: type_name.to_string(),
            generation: self.generation,
        };

        let c_name = CString::new(type_name).map_err(|_| failed())?;
        let raw = unsafe { (self.exports.create)(c_name.as_ptr()) };
        if raw.is_null() {
            return Err(failed());
        }

        Ok(LiveObject {
            raw,
            type_name: type_name.to_string(),
            generation: self.generation,
        })
    }

    /// Destroy an object through this generation's destructor. Objects of any
    /// other generation are refused and leaked rather than freed by foreign code.
    pub fn destroy_object(&self, object: LiveObject) -> ReloadResult<()> {
        if object.generation != self.generation {
            return Err(ReloadError::GenerationMismatch {
                object: object.generation,
                module: self.generation,
            });
        }

        unsafe { (self.exports.destroy)(object.raw) };
        Ok(())
    }

    /// Release the library. Every object it created must be gone by now.
    pub fn unload(self) -> ReloadResult<()> {
        log::info!("Unloading module {} (generation {})", self.path.display(), self.generation);
        self.handle.close()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("exports", &self.exports)
            .finish()
    }
}

fn resolve_exports(handle: &dyn LibraryHandle) -> ReloadResult<ModuleExports> {
    Ok(ModuleExports {
        create: handle.resolve_create_function()?,
        destroy: handle.resolve_destroy_function()?,
    })
}
