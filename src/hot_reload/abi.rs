//! Module ABI
//!
//! A hot-reloadable module exports exactly two symbols: a factory that creates
//! an object of a named type and a destructor for objects it created. The
//! signatures below are the only contract between the host and every
//! generation of the module, so they never change shape.
//!
//! A module written in Rust looks like this:
//!
//! ```ignore
//! #[no_mangle]
//! pub unsafe extern "C" fn earth_reload_create_object(type_name: *const c_char) -> RawObject {
//!     // match on the name, box the object, hand out a static vtable
//! }
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn earth_reload_destroy_object(object: RawObject) {
//!     // drop the box created above
//! }
//! ```

use std::ffi::c_void;
use std::os::raw::c_char;

/// Exported factory symbol
pub const CREATE_OBJECT_SYMBOL: &[u8] = b"earth_reload_create_object\0";

/// Exported destructor symbol
pub const DESTROY_OBJECT_SYMBOL: &[u8] = b"earth_reload_destroy_object\0";

/// Lifecycle hooks of a live object. Any hook may be left null.
#[repr(C)]
pub struct ObjectVTable {
    /// Called once after the object has been installed
    pub start: Option<unsafe extern "C" fn(instance: *mut c_void)>,

    /// Called once before the object is destroyed
    pub stop: Option<unsafe extern "C" fn(instance: *mut c_void)>,

    /// Called by the host every frame
    pub update: Option<unsafe extern "C" fn(instance: *mut c_void, delta_time: f32)>,
}

/// Object handed across the module boundary
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawObject {
    /// Module-owned instance
    pub instance: *mut c_void,

    /// Static vtable inside the module
    pub vtable: *const ObjectVTable,
}

impl RawObject {
    /// The value a factory returns when it does not know the requested type
    pub const fn null() -> Self {
        Self {
            instance: std::ptr::null_mut(),
            vtable: std::ptr::null(),
        }
    }

    /// Whether the factory failed to produce an object
    pub fn is_null(&self) -> bool {
        self.instance.is_null() || self.vtable.is_null()
    }
}

/// Factory exported as `earth_reload_create_object`
pub type CreateObjectFn = unsafe extern "C" fn(type_name: *const c_char) -> RawObject;

/// Destructor exported as `earth_reload_destroy_object`
pub type DestroyObjectFn = unsafe extern "C" fn(object: RawObject);

/// Both exports of one module generation
#[derive(Clone, Copy)]
pub struct ModuleExports {
    pub create: CreateObjectFn,
    pub destroy: DestroyObjectFn,
}

impl std::fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExports")
            .field("create", &(self.create as *const ()))
            .field("destroy", &(self.destroy as *const ()))
            .finish()
    }
}

/// Symbol name without the trailing nul, for messages
pub fn symbol_name(symbol: &[u8]) -> String {
    String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned()
}
