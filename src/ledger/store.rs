//! Ledger persistence backends

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Where the serialized ledger lives between process runs
pub trait LedgerStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored yet
    fn load(&self) -> io::Result<Option<String>>;

    fn save(&self, contents: &str) -> io::Result<()>;
}

/// JSON file on local disk, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)
    }
}

/// In-process store; can be told to reject writes
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    contents: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
            ..Self::default()
        }
    }

    /// Simulate a full or read-only backing store
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("ledger storage quota exceeded"));
        }
        *self.contents.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
