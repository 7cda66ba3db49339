use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::FlagError;

/// Key under which the one-time import is recorded.
pub const SEED_FLAG_KEY: &str = "initial_import_done";

pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Result<bool, FlagError>;
    fn set(&self, key: &str, value: bool) -> Result<(), FlagError>;
}

/// Flags kept in a small JSON object on disk, replaced atomically on write.
pub struct JsonFlags {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFlags {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, bool>, FlagError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, flags: &BTreeMap<String, bool>) -> Result<(), FlagError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, flags)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl FlagStore for JsonFlags {
    fn get(&self, key: &str) -> Result<bool, FlagError> {
        Ok(self.load()?.get(key).copied().unwrap_or(false))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), FlagError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut flags = self.load()?;
        flags.insert(key.to_string(), value);
        self.store(&flags)?;
        debug!(key, value, path = %self.path.display(), "stored flag");
        Ok(())
    }
}

/// Process-local flags. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryFlags {
    flags: Mutex<BTreeMap<String, bool>>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlags {
    fn get(&self, key: &str) -> Result<bool, FlagError> {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        Ok(flags.get(key).copied().unwrap_or(false))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), FlagError> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.insert(key.to_string(), value);
        Ok(())
    }
}
