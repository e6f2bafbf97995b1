//! Hot-reload orchestrator
//!
//! `HotReloader` owns the watched files, the compiler thread, the active
//! module and the live object. It is driven by `tick`, called once per frame
//! from the thread that uses the live object; every load, unload, create and
//! destroy happens inside that call, never concurrently with the host.
//!
//! A successful cycle publishes, in order: `CompilationStarted`,
//! `CompilationFinished(true)`, `LibraryPreLoaded`, `LibraryPostLoaded`,
//! `ClassPreLoaded`, `ClassPostLoaded`. The new module is opened and has
//! produced its object before anything is torn down, so a failed cycle leaves
//! the previous module and object untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;

#[cfg(feature = "native")]
use super::watcher::FileWatcher;
use super::{
    module_name, CompilationJob, CompilationWorker, CompletedJob, EventBus, FileRole, Generation,
    HotReloadConfig, LiveObject, LoadedModule, NativeToolchain, ReloadError, ReloadEvent,
    ReloadListener, ReloadResult, Toolchain, WatchRegistry, WatchedFile,
};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadState {
    /// Waiting for a change
    Idle,
    /// A job is running on the compiler thread
    Compiling,
    /// Opening the new module and creating its object
    Loading,
    /// The last cycle swapped in a new generation
    Loaded,
    /// The last cycle failed; the previous generation is still active
    Failed,
}

/// Live code reloader
pub struct HotReloader {
    config: HotReloadConfig,
    toolchain: Arc<dyn Toolchain>,
    registry: WatchRegistry,
    worker: CompilationWorker,
    events: EventBus,
    state: ReloadState,

    /// No generation has been installed yet. Tracked on its own because a
    /// failed first cycle also leaves the module slot empty.
    first_compilation: bool,

    /// Changes seen while a job was running, compiled by one follow-up job
    pending_recompile: bool,

    last_build: u64,
    last_generation: u64,
    last_poll: Option<Instant>,

    #[cfg(feature = "native")]
    watcher: Option<FileWatcher>,

    live_object: Option<LiveObject>,
    module: Option<LoadedModule>,
}

impl HotReloader {
    /// Create a reloader using the native toolchain described by the config
    pub fn new(config: HotReloadConfig) -> Self {
        let toolchain = Arc::new(NativeToolchain::new(config.toolchain.clone()));
        Self::with_toolchain(config, toolchain)
    }

    /// Create a reloader with a custom toolchain
    pub fn with_toolchain(config: HotReloadConfig, toolchain: Arc<dyn Toolchain>) -> Self {
        #[cfg(feature = "native")]
        let watcher = if config.use_fs_events {
            match FileWatcher::new(config.debounce_ms) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Filesystem events unavailable, polling only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            worker: CompilationWorker::new(toolchain.clone()),
            toolchain,
            config,
            registry: WatchRegistry::new(),
            events: EventBus::new(),
            state: ReloadState::Idle,
            first_compilation: true,
            pending_recompile: false,
            last_build: 0,
            last_generation: 0,
            last_poll: None,
            #[cfg(feature = "native")]
            watcher,
            live_object: None,
            module: None,
        }
    }

    /// Watch a file. Changes to it rebuild the main file.
    pub fn watch(&mut self, path: impl AsRef<Path>, role: FileRole) {
        let path = path.as_ref();
        self.registry.register(path, role);

        #[cfg(feature = "native")]
        if let Some(watcher) = &mut self.watcher {
            if let Err(e) = watcher.watch_file(path) {
                log::warn!("{}; relying on polling for {}", e, path.display());
            }
        }
    }

    /// Stop watching a file
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Option<WatchedFile> {
        let path = path.as_ref();
        let removed = self.registry.unregister(path)?;

        #[cfg(feature = "native")]
        if let Some(watcher) = &mut self.watcher {
            let dir_still_used = self
                .registry
                .files()
                .iter()
                .any(|f| f.path().parent() == path.parent());
            if !dir_still_used {
                if let Err(e) = watcher.unwatch_file(path) {
                    log::warn!("{}", e);
                }
            }
        }

        Some(removed)
    }

    /// Make `path` the main file and run a full compile and load cycle before
    /// returning. Fails with `InitialLoadFailed` if no generation could ever
    /// be installed.
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> ReloadResult<()> {
        let path = path.as_ref();
        self.watch(path, FileRole::Main);

        if let Some(done) = self.worker.wait() {
            log::debug!("Finishing in-flight job before executing {}", path.display());
            let _ = self.finish_job(done);
        }
        if let Some(job) = self.worker.wait_detached() {
            self.discard_artifact(&job.output);
        }

        let job = match self.next_job() {
            Ok(job) => job,
            Err(e) => return Err(self.fail(None, e)),
        };
        self.compilation_started(job.source.clone());

        let start = Instant::now();
        let result = self.toolchain.compile(&job.source, &job.output);
        self.finish_job(CompletedJob {
            job,
            result,
            elapsed: start.elapsed(),
        })
    }

    /// Swap in an already built module without compiling anything
    pub fn load_library(&mut self, path: impl AsRef<Path>) -> ReloadResult<()> {
        if self.worker.is_busy() {
            return Err(ReloadError::JobInFlight);
        }

        self.state = ReloadState::Loading;
        match self.prepare(path.as_ref()) {
            Ok((module, object)) => {
                self.swap(module, object);
                Ok(())
            }
            Err(e) => Err(self.fail(None, e)),
        }
    }

    /// Advance the reloader by one frame. Never blocks.
    pub fn tick(&mut self) -> ReloadState {
        if matches!(self.state, ReloadState::Loaded | ReloadState::Failed) {
            self.state = ReloadState::Idle;
        }

        if let Some(job) = self.worker.reap_detached() {
            log::debug!("Detached compilation job {} finished, discarding it", job.id);
            self.discard_artifact(&job.output);
        }

        self.detect_changes();

        if let Some(done) = self.worker.try_complete() {
            // Failures are logged and published inside.
            let _ = self.finish_job(done);
        } else if self.state == ReloadState::Idle
            && self.pending_recompile
            && !self.worker.is_busy()
        {
            if let Err(e) = self.start_job() {
                log::error!("Could not start compilation: {}", e);
            }
        }

        self.state
    }

    /// Forward one frame to the live object, if there is one
    pub fn update(&mut self, delta_time: f32) {
        if let Some(object) = self.live_object.as_mut() {
            object.update(delta_time);
        }
    }

    /// Destroy the live object and unload the active module. A running
    /// compilation is detached: no new job starts until its thread ends, and
    /// its output is deleted once it does.
    pub fn shutdown(&mut self) {
        if let Some(job) = self.worker.detach() {
            log::warn!("Shutting down with compilation job {} still running", job.id);
        }
        if self.module.is_some() {
            self.teardown();
        }
        self.first_compilation = true;
        self.pending_recompile = false;
        self.state = ReloadState::Idle;
    }

    /// Receive lifecycle notifications on a channel
    pub fn subscribe(&mut self) -> Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    /// Receive lifecycle notifications synchronously
    pub fn add_listener(&mut self, listener: impl ReloadListener + 'static) {
        self.events.add_listener(listener);
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// File name of the active module
    pub fn library_name(&self) -> Option<&str> {
        self.module.as_ref().and_then(|m| m.name())
    }

    /// Path of the active module
    pub fn library_path(&self) -> Option<&Path> {
        self.module.as_ref().map(|m| m.path())
    }

    pub fn generation(&self) -> Option<Generation> {
        self.module.as_ref().map(|m| m.generation())
    }

    /// Whether a generation has been installed
    pub fn is_initialized(&self) -> bool {
        !self.first_compilation
    }

    /// Whether a compiler thread is still running, including one detached
    /// by `shutdown`
    pub fn is_compiling(&self) -> bool {
        self.worker.is_busy()
    }

    /// Whether a change is waiting for the next compilation
    pub fn has_pending_changes(&self) -> bool {
        self.pending_recompile
    }

    pub fn live_object(&self) -> Option<&LiveObject> {
        self.live_object.as_ref()
    }

    pub fn live_object_mut(&mut self) -> Option<&mut LiveObject> {
        self.live_object.as_mut()
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.config
    }

    fn poll_due(&mut self) -> bool {
        let now = Instant::now();
        let interval_due = self
            .last_poll
            .map_or(true, |last| now.duration_since(last) >= self.config.poll_interval());
        // Drain the watcher every tick so stale events never pile up.
        let watcher_fired = self.watcher_fired();

        let due = interval_due || watcher_fired;
        if due {
            self.last_poll = Some(now);
        }
        due
    }

    #[cfg(feature = "native")]
    fn watcher_fired(&mut self) -> bool {
        let Some(watcher) = &mut self.watcher else {
            return false;
        };

        let events = watcher.poll_events();
        for event in &events {
            log::debug!("{:?} event for {}", event.event_type, event.path.display());
        }
        !events.is_empty()
    }

    #[cfg(not(feature = "native"))]
    fn watcher_fired(&mut self) -> bool {
        false
    }

    fn detect_changes(&mut self) {
        if !self.poll_due() {
            return;
        }

        let changed: Vec<PathBuf> = self
            .registry
            .poll_changes()
            .map(|f| f.path().to_path_buf())
            .collect();
        if changed.is_empty() {
            return;
        }

        for path in &changed {
            log::debug!("Change detected in {}", path.display());
        }
        if self.worker.is_busy() && !self.pending_recompile {
            log::info!("Source changed during compilation, rebuilding once it finishes");
        }
        self.pending_recompile = true;
    }

    fn next_job(&mut self) -> ReloadResult<CompilationJob> {
        self.pending_recompile = false;
        let source = self
            .registry
            .main_file()
            .map(|f| f.path().to_path_buf())
            .ok_or(ReloadError::NoMainFile)?;

        self.last_build += 1;
        let file_name = self
            .toolchain
            .library_file_name(&module_name(&source), self.last_build);

        Ok(CompilationJob {
            id: self.last_build,
            output: self.config.build_dir.join(file_name),
            source,
        })
    }

    fn start_job(&mut self) -> ReloadResult<()> {
        let job = self.next_job()?;
        let source = job.source.clone();
        if let Err(e) = self.worker.spawn(job) {
            self.state = ReloadState::Failed;
            return Err(e);
        }
        self.compilation_started(source);
        Ok(())
    }

    fn compilation_started(&mut self, file: PathBuf) {
        log::info!("Compiling {}", file.display());
        self.state = ReloadState::Compiling;
        self.events.publish(ReloadEvent::CompilationStarted { file });
    }

    fn finish_job(&mut self, done: CompletedJob) -> ReloadResult<()> {
        let CompletedJob {
            job,
            result,
            elapsed,
        } = done;

        let prepared = result.and_then(|()| {
            log::info!("Compiled {} in {:.2?}", job.source.display(), elapsed);
            self.state = ReloadState::Loading;
            self.prepare(&job.output)
        });

        match prepared {
            Ok((module, object)) => {
                self.events.publish(ReloadEvent::CompilationFinished {
                    file: job.source,
                    success: true,
                });
                self.swap(module, object);
                Ok(())
            }
            Err(e) => {
                self.discard_artifact(&job.output);
                Err(self.fail(Some(job.source), e))
            }
        }
    }

    /// Open the next generation and create its object
    fn prepare(&mut self, library: &Path) -> ReloadResult<(LoadedModule, LiveObject)> {
        let generation = Generation(self.last_generation + 1);
        let module = LoadedModule::load(self.toolchain.as_ref(), library, generation)?;

        match module.create_object(&self.config.object_type) {
            Ok(object) => {
                self.last_generation = generation.0;
                Ok((module, object))
            }
            Err(e) => {
                if let Err(close_err) = module.unload() {
                    log::warn!("{}", close_err);
                }
                Err(e)
            }
        }
    }

    fn swap(&mut self, module: LoadedModule, mut object: LiveObject) {
        let library = module.path().to_path_buf();
        let generation = module.generation();

        self.events.publish(ReloadEvent::LibraryPreLoaded {
            library: library.clone(),
        });
        if self.first_compilation {
            log::debug!("First generation, nothing to tear down");
        } else {
            self.teardown();
        }
        self.module = Some(module);
        self.events.publish(ReloadEvent::LibraryPostLoaded {
            library,
            generation,
        });

        let type_name = object.type_name().to_string();
        self.events.publish(ReloadEvent::ClassPreLoaded {
            type_name: type_name.clone(),
        });
        object.start();
        self.live_object = Some(object);
        self.first_compilation = false;
        self.state = ReloadState::Loaded;
        log::info!("Generation {} of `{}` is live", generation, type_name);
        self.events.publish(ReloadEvent::ClassPostLoaded {
            type_name,
            generation,
        });
    }

    /// Stop and destroy the live object with its own module, then unload it
    fn teardown(&mut self) {
        let Some(module) = self.module.take() else {
            log::warn!("No active module to tear down");
            return;
        };

        if let Some(mut object) = self.live_object.take() {
            object.stop();
            if let Err(e) = module.destroy_object(object) {
                log::error!("Leaking live object: {}", e);
            }
        }

        let path = module.path().to_path_buf();
        if let Err(e) = module.unload() {
            log::error!("{}", e);
        }
        self.discard_artifact(&path);
    }

    fn discard_artifact(&self, path: &Path) {
        if !self.config.remove_stale_builds || !path.starts_with(&self.config.build_dir) {
            return;
        }
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("Failed to remove stale build {}: {}", path.display(), e);
            }
        }
    }

    fn fail(&mut self, file: Option<PathBuf>, error: ReloadError) -> ReloadError {
        self.state = ReloadState::Failed;
        if let Some(file) = file {
            self.events.publish(ReloadEvent::CompilationFinished {
                file,
                success: false,
            });
        }

        if self.first_compilation {
            log::error!("Initial load failed, no live object is available: {}", error);
            ReloadError::InitialLoadFailed(Box::new(error))
        } else {
            log::error!(
                "Reload failed, generation {} stays active: {}",
                self.last_generation,
                error
            );
            error
        }
    }
}

impl Drop for HotReloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
