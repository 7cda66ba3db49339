use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SeedError;
use crate::flags::{FlagStore, SEED_FLAG_KEY};
use crate::model::ImportedTask;
use crate::store::TaskStore;

const BUNDLED_TODOS: &str = include_str!("../data/todos.json");

/// One entry of the seed document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedTodo {
    #[serde(deserialize_with = "positive_id")]
    pub id: i64,
    pub todo: String,
    pub completed: bool,
}

/// Local tasks take ids at or below zero, so seed ids must stay above it.
fn positive_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let id = i64::deserialize(deserializer)?;
    if id <= 0 {
        return Err(de::Error::custom(format!("seed id must be positive, got {id}")));
    }
    Ok(id)
}

impl SeedTodo {
    fn into_task(self, imported_at: DateTime<Utc>) -> ImportedTask {
        ImportedTask {
            id: self.id,
            description: format!("Imported from starter list (#{})", self.id),
            title: self.todo,
            completed: self.completed,
            created_at: imported_at,
        }
    }
}

#[derive(Deserialize)]
struct SeedDocument {
    todos: Vec<SeedTodo>,
}

/// Decodes a `{ "todos": [...] }` document. Unknown fields are ignored.
pub fn decode(bytes: &[u8]) -> Result<Vec<SeedTodo>, SeedError> {
    let doc: SeedDocument = serde_json::from_slice(bytes)?;
    Ok(doc.todos)
}

pub trait SeedSource: Send + Sync {
    fn load(&self) -> Result<Vec<SeedTodo>, SeedError>;
}

/// The dataset compiled into the binary.
pub struct BundledSeed;

impl SeedSource for BundledSeed {
    fn load(&self) -> Result<Vec<SeedTodo>, SeedError> {
        decode(BUNDLED_TODOS.as_bytes())
    }
}

/// A seed document read from disk on each load.
pub struct FileSeed {
    path: PathBuf,
}

impl FileSeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SeedSource for FileSeed {
    fn load(&self) -> Result<Vec<SeedTodo>, SeedError> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SeedError::ResourceNotFound(self.path.clone()),
            _ => SeedError::Io(e),
        })?;
        decode(&bytes)
    }
}

/// A seed document held in memory.
pub struct StaticSeed(pub String);

impl SeedSource for StaticSeed {
    fn load(&self) -> Result<Vec<SeedTodo>, SeedError> {
        decode(self.0.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    AlreadySeeded,
    /// Number of rows written; ids already present are not counted.
    Imported(usize),
}

#[derive(Clone)]
pub struct SeedCoordinator {
    store: TaskStore,
    flags: Arc<dyn FlagStore>,
    source: Arc<dyn SeedSource>,
    running: Arc<Mutex<()>>,
}

impl SeedCoordinator {
    pub fn new(store: TaskStore, flags: Arc<dyn FlagStore>, source: Arc<dyn SeedSource>) -> Self {
        Self {
            store,
            flags,
            source,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_seeded(&self) -> Result<bool, SeedError> {
        Ok(self.flags.get(SEED_FLAG_KEY)?)
    }

    /// Imports the seed batch unless the flag says it already happened.
    /// The flag is set only after the batch commits; any failure leaves it
    /// unset so the next launch retries.
    pub fn ensure_seeded(&self) -> Result<SeedOutcome, SeedError> {
        let _running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        self.run_import().inspect_err(|e| warn!(error = %e, "seed import failed"))
    }

    fn run_import(&self) -> Result<SeedOutcome, SeedError> {
        if self.flags.get(SEED_FLAG_KEY)? {
            debug!("seed flag already set, skipping import");
            return Ok(SeedOutcome::AlreadySeeded);
        }
        let todos = self.source.load()?;
        let offered = todos.len();
        let imported_at = Utc::now();
        let tasks: Vec<ImportedTask> = todos
            .into_iter()
            .map(|todo| todo.into_task(imported_at))
            .collect();
        let inserted = self.store.insert_many(&tasks)?;
        self.flags.set(SEED_FLAG_KEY, true)?;
        info!(offered, inserted, "seed import complete");
        Ok(SeedOutcome::Imported(inserted))
    }

    /// Runs `ensure_seeded` on a background thread. There is no
    /// cancellation: the job runs until it succeeds or fails.
    pub fn spawn(&self) -> Result<SeedJob, SeedError> {
        let coordinator = self.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("seed-import".into())
            .spawn(move || {
                // Receiver may be gone if the caller stopped caring.
                let _ = tx.send(coordinator.ensure_seeded());
            })
            .map_err(SeedError::Io)?;
        Ok(SeedJob {
            rx,
            handle: Some(handle),
            finished: false,
        })
    }
}

/// Handle to a background seed import.
pub struct SeedJob {
    rx: Receiver<Result<SeedOutcome, SeedError>>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl SeedJob {
    /// Returns the outcome once, as soon as it is available.
    pub fn try_result(&mut self) -> Option<Result<SeedOutcome, SeedError>> {
        if self.finished {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(SeedError::WorkerLost),
        };
        self.finish();
        Some(result)
    }

    pub fn wait(mut self) -> Result<SeedOutcome, SeedError> {
        let result = self.rx.recv().unwrap_or(Err(SeedError::WorkerLost));
        self.finish();
        result
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
