//! Sample hot-reloadable module.
//!
//! Run the host on this file and edit `GREETING` or `update` while it runs:
//!
//! ```text
//! earth-reload demos/hot_module.rs --config demos/reload.toml
//! ```
//!
//! The module is built on its own with `rustc --crate-type=cdylib`, so it
//! repeats the ABI types instead of depending on the host crate.

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

const GREETING: &str = "hello from generation one";

#[repr(C)]
pub struct ObjectVTable {
    start: Option<unsafe extern "C" fn(*mut c_void)>,
    stop: Option<unsafe extern "C" fn(*mut c_void)>,
    update: Option<unsafe extern "C" fn(*mut c_void, f32)>,
}

#[repr(C)]
pub struct RawObject {
    instance: *mut c_void,
    vtable: *const ObjectVTable,
}

struct Main {
    elapsed: f32,
    next_report: f32,
}

unsafe extern "C" fn start(_instance: *mut c_void) {
    println!("[module] start: {}", GREETING);
}

unsafe extern "C" fn stop(instance: *mut c_void) {
    let main = &*(instance as *const Main);
    println!("[module] stop after {:.1}s", main.elapsed);
}

unsafe extern "C" fn update(instance: *mut c_void, delta_time: f32) {
    let main = &mut *(instance as *mut Main);
    main.elapsed += delta_time;
    if main.elapsed >= main.next_report {
        main.next_report += 1.0;
        println!("[module] {:.0}s: {}", main.elapsed, GREETING);
    }
}

static MAIN_VTABLE: ObjectVTable = ObjectVTable {
    start: Some(start),
    stop: Some(stop),
    update: Some(update),
};

#[no_mangle]
pub unsafe extern "C" fn earth_reload_create_object(type_name: *const c_char) -> RawObject {
    if CStr::from_ptr(type_name).to_bytes() != b"Main" {
        return RawObject {
            instance: std::ptr::null_mut(),
            vtable: std::ptr::null(),
        };
    }

    let main = Box::new(Main {
        elapsed: 0.0,
        next_report: 1.0,
    });
    RawObject {
        instance: Box::into_raw(main) as *mut c_void,
        vtable: &MAIN_VTABLE,
    }
}

#[no_mangle]
pub unsafe extern "C" fn earth_reload_destroy_object(object: RawObject) {
    drop(Box::from_raw(object.instance as *mut Main));
}
