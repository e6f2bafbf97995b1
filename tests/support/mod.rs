//! Shared fixtures for the reload integration tests.
//!
//! `MockToolchain` "compiles" by copying the source text into the output
//! file and "loads" by reading it back: `v1`, `v2` and `v3` are working
//! modules, `nosym` lacks its factory, `null` has a factory that returns
//! nothing, and anything else fails to load. A source starting with `error`
//! fails to compile.

#![allow(dead_code)]

use std::cell::RefCell;
use std::ffi::{c_void, CStr};
use std::fs::{self, File};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tempfile::TempDir;

use earth_reload::hot_reload::{
    io_error, load_error, CreateObjectFn, DestroyObjectFn, HotReloadConfig, HotReloader,
    LibraryHandle, LiveObject, ObjectVTable, RawObject, ReloadError, ReloadEvent, ReloadResult,
    Toolchain,
};

thread_local! {
    static CALLS: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn record(call: String) {
    CALLS.with(|c| c.borrow_mut().push(call));
}

/// Module calls made on this thread since the last call
pub fn take_calls() -> Vec<String> {
    CALLS.with(|c| std::mem::take(&mut *c.borrow_mut()))
}

struct Instance {
    version: u32,
    frames: u32,
}

unsafe extern "C" fn start(instance: *mut c_void) {
    let instance = &*(instance as *const Instance);
    record(format!("start:v{}", instance.version));
}

unsafe extern "C" fn stop(instance: *mut c_void) {
    let instance = &*(instance as *const Instance);
    record(format!("stop:v{}", instance.version));
}

unsafe extern "C" fn update(instance: *mut c_void, _delta_time: f32) {
    (*(instance as *mut Instance)).frames += 1;
}

static VTABLE: ObjectVTable = ObjectVTable {
    start: Some(start),
    stop: Some(stop),
    update: Some(update),
};

unsafe fn create(version: u32, type_name: *const c_char) -> RawObject {
    if CStr::from_ptr(type_name).to_bytes() != b"Main" {
        return RawObject::null();
    }
    record(format!("create:v{}", version));
    RawObject {
        instance: Box::into_raw(Box::new(Instance { version, frames: 0 })) as *mut c_void,
        vtable: &VTABLE,
    }
}

unsafe fn destroy(version: u32, object: RawObject) {
    let instance = Box::from_raw(object.instance as *mut Instance);
    record(format!("destroy:v{} by v{}", instance.version, version));
}

unsafe extern "C" fn create_v1(type_name: *const c_char) -> RawObject {
    create(1, type_name)
}

unsafe extern "C" fn create_v2(type_name: *const c_char) -> RawObject {
    create(2, type_name)
}

unsafe extern "C" fn create_v3(type_name: *const c_char) -> RawObject {
    create(3, type_name)
}

unsafe extern "C" fn create_null(_type_name: *const c_char) -> RawObject {
    RawObject::null()
}

unsafe extern "C" fn destroy_v1(object: RawObject) {
    destroy(1, object)
}

unsafe extern "C" fn destroy_v2(object: RawObject) {
    destroy(2, object)
}

unsafe extern "C" fn destroy_v3(object: RawObject) {
    destroy(3, object)
}

unsafe extern "C" fn destroy_unreachable(_object: RawObject) {
    record("destroy:unreachable".to_string());
}

/// Version of the module that created `object`
pub fn object_version(object: &LiveObject) -> u32 {
    unsafe { (*(object.as_ptr() as *const Instance)).version }
}

/// Frames the object has been updated for
pub fn object_frames(object: &LiveObject) -> u32 {
    unsafe { (*(object.as_ptr() as *const Instance)).frames }
}

struct MockLibrary {
    path: PathBuf,
    kind: String,
}

impl LibraryHandle for MockLibrary {
    fn resolve_create_function(&self) -> ReloadResult<CreateObjectFn> {
        match self.kind.as_str() {
            "v1" => Ok(create_v1),
            "v2" => Ok(create_v2),
            "v3" => Ok(create_v3),
            "null" => Ok(create_null),
            _ => Err(ReloadError::SymbolResolutionFailed {
                path: self.path.clone(),
                symbol: "earth_reload_create_object".to_string(),
                reason: "undefined symbol".to_string(),
            }),
        }
    }

    fn resolve_destroy_function(&self) -> ReloadResult<DestroyObjectFn> {
        Ok(match self.kind.as_str() {
            "v1" => destroy_v1,
            "v2" => destroy_v2,
            "v3" => destroy_v3,
            _ => destroy_unreachable,
        })
    }

    fn close(self: Box<Self>) -> ReloadResult<()> {
        record(format!("unload:{}", self.kind));
        Ok(())
    }
}

/// Toolchain that copies source text into the module file
#[derive(Default)]
pub struct MockToolchain {
    /// When set, every compile waits for one message before finishing
    gate: Option<Receiver<()>>,

    started: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Toolchain whose compiles block until released through the sender
    pub fn gated() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = unbounded();
        let toolchain = Arc::new(Self {
            gate: Some(rx),
            ..Self::default()
        });
        (toolchain, tx)
    }

    /// Compilations that have read their source so far
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Most compilations ever running at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl Toolchain for MockToolchain {
    fn compile(&self, source: &Path, output: &Path) -> ReloadResult<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        // Snapshot the source when the job starts, like a real compiler would.
        let text = fs::read_to_string(source).map_err(|e| io_error(source, e));
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }

        let result = text.and_then(|text| {
            if text.trim_start().starts_with("error") {
                return Err(ReloadError::CompileFailed {
                    file: source.to_path_buf(),
                    status: "exit status: 1".to_string(),
                    stderr: text.trim().to_string(),
                });
            }
            if let Some(dir) = output.parent() {
                fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
            }
            fs::write(output, text.trim()).map_err(|e| io_error(output, e))
        });

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn load_library(&self, path: &Path) -> ReloadResult<Box<dyn LibraryHandle>> {
        let kind = fs::read_to_string(path).map_err(|e| load_error(path, e))?;
        match kind.trim() {
            "v1" | "v2" | "v3" | "nosym" | "null" => Ok(Box::new(MockLibrary {
                path: path.to_path_buf(),
                kind: kind.trim().to_string(),
            })),
            other => Err(load_error(path, format!("not a module: {:?}", other))),
        }
    }
}

static NEXT_MTIME: AtomicU64 = AtomicU64::new(1_000_000);

/// Write `content` with a modification time no earlier write has used, so
/// every call is seen as a change even within one filesystem tick.
pub fn write_source(path: &Path, content: &str) {
    fs::write(path, content).expect("Failed to write source file");
    let secs = NEXT_MTIME.fetch_add(10, Ordering::SeqCst);
    File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(UNIX_EPOCH + Duration::from_secs(secs)))
        .expect("Failed to set modification time");
}

/// Config for tests: poll on every tick, no filesystem events
pub fn test_config(dir: &Path) -> HotReloadConfig {
    HotReloadConfig {
        build_dir: dir.join("build"),
        poll_interval_ms: 0,
        use_fs_events: false,
        ..HotReloadConfig::default()
    }
}

/// Temp workspace with a main source file
pub struct Fixture {
    pub dir: TempDir,
    pub main: PathBuf,
}

impl Fixture {
    pub fn new(content: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let main = dir.path().join("game.rs");
        write_source(&main, content);
        take_calls();
        Self { dir, main }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn reloader(&self, toolchain: Arc<MockToolchain>) -> HotReloader {
        HotReloader::with_toolchain(test_config(self.dir.path()), toolchain)
    }

    /// Module files currently in the build directory
    pub fn builds(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.dir.path().join("build")) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Tick until `done` holds, failing the test after a few seconds
pub fn tick_until(reloader: &mut HotReloader, mut done: impl FnMut(&HotReloader) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(reloader) {
        assert!(Instant::now() < deadline, "reloader did not settle in time");
        reloader.tick();
        thread::sleep(Duration::from_millis(2));
    }
}

/// Tick once to pick up changes, then until the cycle has run
pub fn settle(reloader: &mut HotReloader) {
    reloader.tick();
    tick_until(reloader, |r| !r.is_compiling() && !r.has_pending_changes());
}

/// Events received so far
pub fn drain(events: &Receiver<ReloadEvent>) -> Vec<ReloadEvent> {
    events.try_iter().collect()
}

pub fn names(events: &[ReloadEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

pub const FULL_CYCLE: [&str; 6] = [
    "CompilationStarted",
    "CompilationFinished",
    "LibraryPreLoaded",
    "LibraryPostLoaded",
    "ClassPreLoaded",
    "ClassPostLoaded",
];

pub const FAILED_CYCLE: [&str; 2] = ["CompilationStarted", "CompilationFinished"];
