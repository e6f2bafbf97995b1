//! Watched-file registry
//!
//! Polls the metadata of every registered source file and reports the ones
//! that changed since the last poll. It never compiles or loads anything.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Role of a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    /// The file whose module is loaded
    Main,
    /// Triggers a rebuild of the main file
    Dependency,
}

/// On-disk modification signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub modified: SystemTime,
    pub len: u64,
}

impl FileSignature {
    /// Read the signature of a file, `None` when it does not exist
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        })
    }
}

/// Registered source file
#[derive(Debug, Clone)]
pub struct WatchedFile {
    path: PathBuf,
    role: FileRole,
    signature: Option<FileSignature>,
}

impl WatchedFile {
    fn new(path: PathBuf, role: FileRole) -> Self {
        let signature = FileSignature::read(&path);
        if signature.is_none() {
            log::warn!("Watching {} which does not exist yet", path.display());
        }
        Self {
            path,
            role,
            signature,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> FileRole {
        self.role
    }

    pub fn signature(&self) -> Option<FileSignature> {
        self.signature
    }

    pub fn is_main(&self) -> bool {
        self.role == FileRole::Main
    }

    /// Refresh the stored signature, returning whether the file changed.
    /// A file that went missing is not a change; it is reported again once
    /// it reappears.
    fn refresh(&mut self) -> bool {
        let current = FileSignature::read(&self.path);
        if current == self.signature {
            return false;
        }

        let previous = std::mem::replace(&mut self.signature, current);
        match (previous, current) {
            (_, None) => {
                log::warn!("Watched file {} disappeared", self.path.display());
                false
            }
            _ => true,
        }
    }
}

/// Registry of watched source files
#[derive(Debug, Default)]
pub struct WatchRegistry {
    files: Vec<WatchedFile>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file or update the role of a registered one. A new main file
    /// demotes the previous one to a dependency. Updating keeps the stored
    /// signature so a change that has not been polled yet is still reported.
    pub fn register(&mut self, path: impl AsRef<Path>, role: FileRole) {
        let path = path.as_ref();

        if role == FileRole::Main {
            for file in self.files.iter_mut().filter(|f| f.is_main() && f.path != path) {
                log::info!("{} is no longer the main file", file.path.display());
                file.role = FileRole::Dependency;
            }
        }

        match self.files.iter_mut().find(|f| f.path == path) {
            Some(file) => file.role = role,
            None => self.files.push(WatchedFile::new(path.to_path_buf(), role)),
        }
    }

    /// Stop watching a file
    pub fn unregister(&mut self, path: impl AsRef<Path>) -> Option<WatchedFile> {
        let path = path.as_ref();
        let index = self.files.iter().position(|f| f.path == path)?;
        Some(self.files.remove(index))
    }

    /// Files whose signature changed since the last poll. Signatures are
    /// refreshed as the iterator advances, so each change is yielded once.
    pub fn poll_changes(&mut self) -> impl Iterator<Item = &WatchedFile> + '_ {
        self.files
            .iter_mut()
            .filter_map(|file| if file.refresh() { Some(&*file) } else { None })
    }

    pub fn main_file(&self) -> Option<&WatchedFile> {
        self.files.iter().find(|f| f.is_main())
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.files.iter().any(|f| f.path == path)
    }

    pub fn files(&self) -> &[WatchedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
