//! Live, sectioned projection of the task store.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{SectionKey, Task, TaskEdit};
use crate::seed::{SeedCoordinator, SeedJob};
use crate::store::{StoreEvent, TaskStore};

pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

/// Signals for the presentation layer. `DataChanged` carries no payload;
/// consumers re-read whatever they display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    DataChanged,
    Loading(bool),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Section {
    pub key: SectionKey,
    pub tasks: Vec<Task>,
}

impl Section {
    pub fn title(&self) -> &'static str {
        self.key.label()
    }
}

fn split_sections(tasks: Vec<Task>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for task in tasks {
        let key = task.section_key();
        if sections.last().map(|s| s.key) != Some(key) {
            sections.push(Section {
                key,
                tasks: Vec::new(),
            });
        }
        if let Some(section) = sections.last_mut() {
            section.tasks.push(task);
        }
    }
    sections
}

pub struct QueryView {
    store: TaskStore,
    changes: Receiver<StoreEvent>,
    seeder: Option<SeedCoordinator>,
    seed_job: Option<SeedJob>,
    refresh_delay: Duration,
    refresh_deadline: Option<Instant>,
    search: String,
    sections: Vec<Section>,
    collapsed: HashSet<SectionKey>,
    expanded: Option<i64>,
    loading: bool,
    listeners: Vec<Sender<ViewEvent>>,
}

impl QueryView {
    pub fn new(store: TaskStore) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            changes,
            seeder: None,
            seed_job: None,
            refresh_delay: DEFAULT_REFRESH_DELAY,
            refresh_deadline: None,
            search: String::new(),
            sections: Vec::new(),
            collapsed: HashSet::new(),
            expanded: None,
            loading: false,
            listeners: Vec::new(),
        }
    }

    /// Seed import to start from `view_did_load`.
    pub fn with_seeder(mut self, seeder: SeedCoordinator) -> Self {
        self.seeder = Some(seeder);
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn subscribe(&mut self) -> Receiver<ViewEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    fn emit(&mut self, event: ViewEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn report(&mut self, message: String) {
        warn!(%message, "view error");
        self.emit(ViewEvent::Error(message));
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(ViewEvent::Loading(loading));
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether a background seed import started by `view_did_load` has not
    /// yet reported its outcome. Loading may already be off by then.
    pub fn is_seeding(&self) -> bool {
        self.seed_job.is_some()
    }

    /// First display: derive the projection and start the seed import in the
    /// background. Loading stays on until the import finishes.
    pub fn view_did_load(&mut self) {
        self.set_loading(true);
        self.reload();
        let Some(seeder) = self.seeder.clone() else {
            self.set_loading(false);
            return;
        };
        match seeder.spawn() {
            Ok(job) => self.seed_job = Some(job),
            Err(e) => {
                self.report(format!("Failed to load initial tasks: {e}"));
                self.set_loading(false);
            }
        }
    }

    /// Pull-to-refresh. Loading turns off after the configured delay; no
    /// store operation is performed.
    pub fn refresh(&mut self) {
        self.set_loading(true);
        self.refresh_deadline = Some(Instant::now() + self.refresh_delay);
        self.pump();
    }

    /// Processes everything that has happened since the last call: store
    /// changes, seed completion, and the refresh timer. Re-derives at most
    /// once. Returns whether the projection was re-derived.
    pub fn pump(&mut self) -> bool {
        self.process(false)
    }

    /// Blocks up to `timeout` for the next store change, then pumps.
    pub fn wait_and_pump(&mut self, timeout: Duration) -> bool {
        let changed = match self.changes.recv_timeout(timeout) {
            Ok(event) => {
                self.note_store_event(event);
                true
            }
            Err(_) => false,
        };
        self.process(changed)
    }

    fn note_store_event(&mut self, event: StoreEvent) {
        if matches!(event, StoreEvent::Imported(_))
            && self.seed_job.is_some()
            && self.refresh_deadline.is_none()
        {
            self.set_loading(false);
        }
    }

    fn process(&mut self, mut dirty: bool) -> bool {
        while let Ok(event) = self.changes.try_recv() {
            self.note_store_event(event);
            dirty = true;
        }

        let seeded = self.seed_job.as_mut().and_then(SeedJob::try_result);
        if let Some(result) = seeded {
            self.seed_job = None;
            if let Err(e) = result {
                self.report(format!("Failed to load initial tasks: {e}"));
            }
            if self.refresh_deadline.is_none() {
                self.set_loading(false);
            }
        }

        if let Some(deadline) = self.refresh_deadline {
            if Instant::now() >= deadline {
                self.refresh_deadline = None;
                if self.seed_job.is_none() {
                    self.set_loading(false);
                }
            }
        }

        if dirty {
            self.reload();
        }
        dirty
    }

    fn reload(&mut self) {
        let search = (!self.search.is_empty()).then_some(self.search.as_str());
        match self.store.query(search) {
            Ok(tasks) => {
                self.sections = split_sections(tasks);
                if let Some(id) = self.expanded {
                    if self.locate(id).is_none() {
                        self.expanded = None;
                    }
                }
                debug!(
                    sections = self.sections.len(),
                    rows = self.sections.iter().map(|s| s.tasks.len()).sum::<usize>(),
                    "re-derived task view"
                );
                self.emit(ViewEvent::DataChanged);
            }
            Err(e) => self.report(format!("Failed to load tasks: {e}")),
        }
    }

    pub fn search_text(&self) -> &str {
        &self.search
    }

    /// Replaces the title filter and re-derives. An empty string shows all.
    pub fn set_search_text(&mut self, text: &str) {
        self.search = text.to_string();
        self.reload();
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section_key(&self, section: usize) -> Option<SectionKey> {
        self.sections.get(section).map(|s| s.key)
    }

    pub fn section_title(&self, section: usize) -> Option<&'static str> {
        self.sections.get(section).map(Section::title)
    }

    /// Visible rows; zero while the section is collapsed.
    pub fn row_count(&self, section: usize) -> usize {
        match self.sections.get(section) {
            Some(s) if !self.collapsed.contains(&s.key) => s.tasks.len(),
            _ => 0,
        }
    }

    pub fn task(&self, at: IndexPath) -> Option<&Task> {
        if at.row >= self.row_count(at.section) {
            return None;
        }
        self.sections.get(at.section)?.tasks.get(at.row)
    }

    fn locate(&self, id: i64) -> Option<IndexPath> {
        self.sections.iter().enumerate().find_map(|(section, s)| {
            s.tasks
                .iter()
                .position(|t| t.id == id)
                .map(|row| IndexPath::new(section, row))
        })
    }

    pub fn is_collapsed(&self, key: SectionKey) -> bool {
        self.collapsed.contains(&key)
    }

    pub fn set_collapsed(&mut self, key: SectionKey, collapsed: bool) {
        let changed = if collapsed {
            self.collapsed.insert(key)
        } else {
            self.collapsed.remove(&key)
        };
        if changed {
            self.emit(ViewEvent::DataChanged);
        }
    }

    pub fn toggle_section_collapse(&mut self, section: usize) {
        if let Some(key) = self.section_key(section) {
            let collapsed = self.is_collapsed(key);
            self.set_collapsed(key, !collapsed);
        }
    }

    /// Expands the row, or collapses it if it is already the expanded one.
    /// At most one row is expanded at a time.
    pub fn toggle_row_expansion(&mut self, at: IndexPath) {
        let Some(id) = self.task(at).map(|t| t.id) else {
            return;
        };
        self.expanded = if self.expanded == Some(id) {
            None
        } else {
            Some(id)
        };
        self.emit(ViewEvent::DataChanged);
    }

    /// Position of the expanded row, if it is currently visible.
    pub fn expanded_index(&self) -> Option<IndexPath> {
        let at = self.locate(self.expanded?)?;
        self.task(at).map(|_| at)
    }

    pub fn is_expanded(&self, at: IndexPath) -> bool {
        self.expanded_index() == Some(at)
    }

    fn task_id_at(&mut self, at: IndexPath) -> Option<i64> {
        let id = self.task(at).map(|t| t.id);
        if id.is_none() {
            self.report(format!(
                "No task at section {} row {}",
                at.section, at.row
            ));
        }
        id
    }

    fn apply<T>(&mut self, action: &str, result: crate::error::StoreResult<T>) -> Option<T> {
        let outcome = match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(format!("Failed to {action}: {e}"));
                None
            }
        };
        self.pump();
        outcome
    }

    pub fn add_task(
        &mut self,
        title: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Option<Task> {
        let result = self.store.insert(title, description, created_at);
        self.apply("add task", result)
    }

    pub fn edit_task(&mut self, at: IndexPath, edit: &TaskEdit) -> Option<Task> {
        let id = self.task_id_at(at)?;
        let result = self.store.update(id, edit);
        self.apply("edit task", result)
    }

    pub fn toggle_task_status(&mut self, at: IndexPath) -> Option<Task> {
        let id = self.task_id_at(at)?;
        let result = self.store.toggle_completed(id);
        self.apply("update task", result)
    }

    pub fn mark_task_as_completed(&mut self, at: IndexPath) -> Option<Task> {
        let id = self.task_id_at(at)?;
        let result = self.store.set_completed(id, true);
        self.apply("complete task", result)
    }

    pub fn delete_task(&mut self, at: IndexPath) -> bool {
        let Some(id) = self.task_id_at(at) else {
            return false;
        };
        let result = self.store.delete(id);
        self.apply("delete task", result).unwrap_or(false)
    }
}
