use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::{HotReloadResult, ReloadError};

/// Type of file change event
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEventType {
    Created,
    Modified,
    Deleted,
}

/// File watch event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub event_type: WatchEventType,
}

/// Filesystem change notifier with debouncing.
///
/// Watches the directories that contain registered files, since editors
/// often replace a file instead of writing it in place. Events only tell the
/// reloader to poll the registry now; the registry decides what changed.
pub struct FileWatcher {
    /// Notify watcher instance
    watcher: RecommendedWatcher,

    /// Event receiver
    rx: Receiver<WatchEvent>,

    /// Last accepted event time per path
    debounce_map: Arc<Mutex<HashMap<PathBuf, Instant>>>,

    /// Active watch directories
    watched_dirs: Vec<PathBuf>,
}

impl FileWatcher {
    /// Create new file watcher
    pub fn new(debounce_ms: u64) -> HotReloadResult<Self> {
        let (tx, rx) = unbounded();
        let debounce_map = Arc::new(Mutex::new(HashMap::new()));
        let debounce_map_clone = debounce_map.clone();
        let debounce_duration = Duration::from_millis(debounce_ms);

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watcher error: {}", e);
                    return;
                }
            };

            let event_type = match event.kind {
                EventKind::Create(_) => WatchEventType::Created,
                EventKind::Modify(_) => WatchEventType::Modified,
                EventKind::Remove(_) => WatchEventType::Deleted,
                _ => return,
            };

            let now = Instant::now();
            let mut debounce = debounce_map_clone.lock();
            for path in event.paths {
                if debounce_accept(&mut debounce, &path, now, debounce_duration) {
                    let _ = tx.send(WatchEvent {
                        path,
                        event_type: event_type.clone(),
                    });
                }
            }
        })
        .map_err(|e| ReloadError::Watch(e.to_string()))?;

        Ok(Self {
            watcher,
            rx,
            debounce_map,
            watched_dirs: Vec::new(),
        })
    }

    /// Watch the directory containing `file`
    pub fn watch_file(&mut self, file: impl AsRef<Path>) -> HotReloadResult<()> {
        let dir = watch_dir_of(file.as_ref());
        if self.watched_dirs.contains(&dir) {
            return Ok(());
        }

        self.watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ReloadError::Watch(format!("{}: {}", dir.display(), e)))?;
        log::debug!("Watching directory {}", dir.display());
        self.watched_dirs.push(dir);
        Ok(())
    }

    /// Stop watching the directory containing `file`
    pub fn unwatch_file(&mut self, file: impl AsRef<Path>) -> HotReloadResult<()> {
        let dir = watch_dir_of(file.as_ref());
        if !self.watched_dirs.contains(&dir) {
            return Ok(());
        }

        self.watcher
            .unwatch(&dir)
            .map_err(|e| ReloadError::Watch(format!("{}: {}", dir.display(), e)))?;
        self.watched_dirs.retain(|d| d != &dir);
        Ok(())
    }

    /// Poll for events (non-blocking)
    pub fn poll_events(&mut self) -> Vec<WatchEvent> {
        self.rx.try_iter().collect()
    }

    /// Get watched directories
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched_dirs
    }

    /// Number of paths currently inside their debounce window
    pub fn debounced_paths(&self) -> usize {
        self.debounce_map.lock().len()
    }
}

/// Record an event for `path` unless one was accepted within `window`.
/// Entries whose window has passed are dropped, so the map only holds
/// recently active paths.
fn debounce_accept(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    window: Duration,
) -> bool {
    debounce.retain(|_, last| now.duration_since(*last) < window);
    if debounce.contains_key(path) {
        return false;
    }
    debounce.insert(path.to_path_buf(), now);
    true
}

fn watch_dir_of(file: &Path) -> PathBuf {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
