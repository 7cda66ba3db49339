use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::db;
use crate::error::{StoreError, StoreResult};
use crate::model::{ImportedTask, SectionKey, Task, TaskEdit};

/// Published after a write commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Inserted(i64),
    Updated(i64),
    Deleted(i64),
    Imported(usize),
}

const TASK_COLUMNS: &str = "id, title, description, completed, section_key, created_at";

const NEXT_LOCAL_ID: &str = "SELECT MIN(COALESCE(MIN(id), 0), 0) - 1 FROM tasks";

const INSERT_TASK: &str = "
INSERT INTO tasks (id, title, description, completed, section_key, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

const IMPORT_TASK: &str = "
INSERT INTO tasks (id, title, description, completed, section_key, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(id) DO NOTHING
";

const UPDATE_FIELDS: &str = "
UPDATE tasks
SET title = COALESCE(?2, title),
    description = COALESCE(?3, description),
    created_at = COALESCE(?4, created_at)
WHERE id = ?1
RETURNING id, title, description, completed, section_key, created_at
";

const SET_COMPLETED: &str = "
UPDATE tasks
SET completed = ?2, section_key = ?3
WHERE id = ?1 AND completed != ?2
RETURNING id, title, description, completed, section_key, created_at
";

const TOGGLE_COMPLETED: &str = "
UPDATE tasks
SET completed = 1 - completed,
    section_key = CASE completed WHEN 1 THEN 'pending' ELSE 'completed' END
WHERE id = ?1
RETURNING id, title, description, completed, section_key, created_at
";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or(StoreError::Timestamp(micros))
}

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let section: String = row.get(4)?;
    let section_key = match section.as_str() {
        "pending" => SectionKey::Pending,
        "completed" => SectionKey::Completed,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown section key '{other}'").into(),
            ))
        }
    };
    let micros: i64 = row.get(5)?;
    let created_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Integer,
            format!("timestamp {micros} out of range").into(),
        )
    })?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        section_key,
        created_at,
    })
}

fn fetch_task(conn: &Connection, id: i64) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [id],
        read_task_row,
    )
    .optional()
}

/// Case-insensitive containment over Unicode lowercase folding.
fn title_matches(title: &str, folded_needle: &str) -> bool {
    title.to_lowercase().contains(folded_needle)
}

struct Inner {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    subscribers: Mutex<Vec<Sender<StoreEvent>>>,
}

/// Change events go out after commit while the writer lock is still held,
/// so subscribers observe them in commit order.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Inner>,
}

impl TaskStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: &str) -> StoreResult<Self> {
        if path == db::MEMORY_PATH {
            return Self::in_memory();
        }
        let writer = db::open(path)?;
        db::init(&writer)?;
        let reader = db::open_reader(path)?;
        info!(path, "opened task store");
        Ok(Self::from_parts(writer, Some(reader)))
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::from_parts(db::open_memory()?, None))
    }

    fn from_parts(writer: Connection, reader: Option<Connection>) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(writer),
                reader: reader.map(Mutex::new),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns a receiver for committed-change events. Dropping the receiver
    /// unsubscribes it on the next publish.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    fn publish(&self, event: StoreEvent) {
        lock(&self.inner.subscribers).retain(|tx| tx.send(event).is_ok());
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        match &self.inner.reader {
            Some(reader) => f(&*lock(reader)),
            None => f(&*lock(&self.inner.writer)),
        }
    }

    /// Creates a pending task with a fresh local id.
    pub fn insert(
        &self,
        title: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let micros = to_micros(created_at);
        let created_at = from_micros(micros)?;
        let conn = lock(&self.inner.writer);
        let id: i64 = conn.query_row(NEXT_LOCAL_ID, [], |row| row.get(0))?;
        let section_key = SectionKey::for_completed(false);
        conn.execute(
            INSERT_TASK,
            params![id, title, description, false, section_key.as_str(), micros],
        )?;
        let task = Task {
            id,
            title: title.to_string(),
            description: description.to_string(),
            completed: false,
            section_key,
            created_at,
        };
        debug!(id, "inserted task");
        self.publish(StoreEvent::Inserted(id));
        Ok(task)
    }

    /// Inserts a batch in one transaction. Rows whose id already exists are
    /// skipped; the return value counts rows actually written. On failure
    /// nothing is written and nothing is published.
    pub fn insert_many(&self, tasks: &[ImportedTask]) -> StoreResult<usize> {
        let mut conn = lock(&self.inner.writer);
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(IMPORT_TASK)?;
            for task in tasks {
                inserted += stmt.execute(params![
                    task.id,
                    task.title,
                    task.description,
                    task.completed,
                    SectionKey::for_completed(task.completed).as_str(),
                    to_micros(task.created_at),
                ])?;
            }
        }
        tx.commit()?;
        debug!(offered = tasks.len(), inserted, "imported task batch");
        if inserted > 0 {
            self.publish(StoreEvent::Imported(inserted));
        }
        Ok(inserted)
    }

    /// Overwrites the supplied fields. Completion state is untouched.
    pub fn update(&self, id: i64, edit: &TaskEdit) -> StoreResult<Task> {
        let conn = lock(&self.inner.writer);
        let task = conn
            .query_row(
                UPDATE_FIELDS,
                params![
                    id,
                    edit.title,
                    edit.description,
                    edit.created_at.map(to_micros),
                ],
                read_task_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound(id))?;
        debug!(id, "updated task");
        self.publish(StoreEvent::Updated(id));
        Ok(task)
    }

    /// Sets the completion flag. Setting it to its current value succeeds
    /// without writing or publishing anything.
    pub fn set_completed(&self, id: i64, completed: bool) -> StoreResult<Task> {
        let conn = lock(&self.inner.writer);
        let section_key = SectionKey::for_completed(completed);
        let changed = conn
            .query_row(
                SET_COMPLETED,
                params![id, completed, section_key.as_str()],
                read_task_row,
            )
            .optional()?;
        match changed {
            Some(task) => {
                debug!(id, completed, "set completion");
                self.publish(StoreEvent::Updated(id));
                Ok(task)
            }
            None => fetch_task(&conn, id)?.ok_or(StoreError::NotFound(id)),
        }
    }

    pub fn toggle_completed(&self, id: i64) -> StoreResult<Task> {
        let conn = lock(&self.inner.writer);
        let task = conn
            .query_row(TOGGLE_COMPLETED, [id], read_task_row)
            .optional()?
            .ok_or(StoreError::NotFound(id))?;
        debug!(id, completed = task.completed, "toggled completion");
        self.publish(StoreEvent::Updated(id));
        Ok(task)
    }

    /// Removes a task. Returns whether a row existed; a missing id is not an
    /// error.
    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        let conn = lock(&self.inner.writer);
        let removed = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])? > 0;
        if removed {
            debug!(id, "deleted task");
            self.publish(StoreEvent::Deleted(id));
        }
        Ok(removed)
    }

    pub fn get(&self, id: i64) -> StoreResult<Option<Task>> {
        Ok(self.read(|conn| fetch_task(conn, id))?)
    }

    /// All tasks whose title contains `search` case-insensitively, pending
    /// before completed and newest first within each group. `None` or an
    /// empty string disables filtering.
    pub fn query(&self, search: Option<&str>) -> StoreResult<Vec<Task>> {
        let mut tasks = self.read(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks ORDER BY completed ASC, created_at DESC, id ASC"
            ))?;
            let rows = stmt.query_map([], read_task_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        if let Some(needle) = search.filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            tasks.retain(|t| title_matches(&t.title, &needle));
        }
        Ok(tasks)
    }

    pub fn count(&self) -> StoreResult<usize> {
        let n: i64 = self.read(|conn| conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0)))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 4, 9, minute, 0).unwrap()
    }

    fn imported(id: i64, title: &str, completed: bool) -> ImportedTask {
        ImportedTask {
            id,
            title: title.into(),
            description: String::new(),
            completed,
            created_at: at(0),
        }
    }

    fn assert_ordered(tasks: &[Task]) {
        for pair in tasks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                (!a.completed && b.completed)
                    || (a.completed == b.completed && a.created_at >= b.created_at),
                "{} should not precede {}",
                a.title,
                b.title
            );
        }
    }

    #[test]
    fn memory_path_opens_usable_store() {
        let store = TaskStore::open(db::MEMORY_PATH).unwrap();
        store.insert("a", "", at(1)).unwrap();
        assert_eq!(store.query(None).unwrap().len(), 1);
    }

    #[test]
    fn insert_creates_pending_task() {
        let store = TaskStore::in_memory().unwrap();
        let task = store.insert("Buy milk", "2 liters", at(1)).unwrap();
        assert!(!task.completed);
        assert_eq!(task.section_key(), SectionKey::Pending);
        assert_eq!(task.created_at, at(1));
        assert_eq!(store.get(task.id).unwrap(), Some(task));
    }

    #[test]
    fn local_ids_never_collide_with_imported() {
        let store = TaskStore::in_memory().unwrap();
        store.insert_many(&[imported(1, "a", false), imported(2, "b", false)]).unwrap();
        let first = store.insert("local", "", at(1)).unwrap();
        let second = store.insert("local 2", "", at(2)).unwrap();
        assert!(first.id <= 0 && !first.is_imported());
        assert!(second.id < first.id);
    }

    #[test]
    fn insert_many_skips_existing_ids() {
        let store = TaskStore::in_memory().unwrap();
        let batch = [imported(1, "a", false), imported(2, "b", true)];
        assert_eq!(store.insert_many(&batch).unwrap(), 2);
        assert_eq!(store.insert_many(&batch).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn insert_many_derives_section_key() {
        let store = TaskStore::in_memory().unwrap();
        store.insert_many(&[imported(5, "done", true)]).unwrap();
        let task = store.get(5).unwrap().unwrap();
        assert!(task.completed);
        assert_eq!(task.section_key(), SectionKey::Completed);
    }

    #[test]
    fn update_only_touches_supplied_fields() {
        let store = TaskStore::in_memory().unwrap();
        let task = store.insert("old", "keep me", at(1)).unwrap();
        let edit = TaskEdit {
            title: Some("new".into()),
            ..TaskEdit::default()
        };
        let updated = store.update(task.id, &edit).unwrap();
        assert_eq!(updated.title, "new");
        assert_eq!(updated.description, "keep me");
        assert_eq!(updated.created_at, at(1));
        assert!(!updated.completed);
    }

    #[test]
    fn update_missing_task_fails() {
        let store = TaskStore::in_memory().unwrap();
        let err = store.update(42, &TaskEdit::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn set_completed_is_idempotent() {
        let store = TaskStore::in_memory().unwrap();
        let task = store.insert("t", "", at(1)).unwrap();
        let rx = store.subscribe();

        let done = store.set_completed(task.id, true).unwrap();
        assert!(done.completed);
        assert_eq!(done.section_key(), SectionKey::Completed);

        let again = store.set_completed(task.id, true).unwrap();
        assert_eq!(again, done);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn toggle_flips_and_recomputes_section() {
        let store = TaskStore::in_memory().unwrap();
        let task = store.insert("t", "", at(1)).unwrap();
        let toggled = store.toggle_completed(task.id).unwrap();
        assert!(toggled.completed);
        assert_eq!(toggled.section_key(), SectionKey::Completed);
        let back = store.toggle_completed(task.id).unwrap();
        assert!(!back.completed);
        assert_eq!(back.section_key(), SectionKey::Pending);
    }

    #[test]
    fn toggle_missing_task_fails() {
        let store = TaskStore::in_memory().unwrap();
        assert!(matches!(
            store.toggle_completed(3),
            Err(StoreError::NotFound(3))
        ));
    }

    #[test]
    fn delete_missing_is_noop() {
        let store = TaskStore::in_memory().unwrap();
        store.insert("t", "", at(1)).unwrap();
        assert!(!store.delete(999).unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn delete_removes_row() {
        let store = TaskStore::in_memory().unwrap();
        let task = store.insert("t", "", at(1)).unwrap();
        assert!(store.delete(task.id).unwrap());
        assert_eq!(store.get(task.id).unwrap(), None);
    }

    #[test]
    fn query_orders_pending_first_newest_first() {
        let store = TaskStore::in_memory().unwrap();
        store.insert("old", "", at(1)).unwrap();
        store.insert("new", "", at(5)).unwrap();
        let done_old = store.insert("done old", "", at(2)).unwrap();
        let done_new = store.insert("done new", "", at(9)).unwrap();
        store.set_completed(done_old.id, true).unwrap();
        store.set_completed(done_new.id, true).unwrap();

        let tasks = store.query(None).unwrap();
        let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["new", "old", "done new", "done old"]);
        assert_ordered(&tasks);
    }

    #[test]
    fn query_empty_equals_none() {
        let store = TaskStore::in_memory().unwrap();
        store.insert("a", "", at(1)).unwrap();
        store.insert("b", "", at(2)).unwrap();
        assert_eq!(store.query(Some("")).unwrap(), store.query(None).unwrap());
    }

    #[test]
    fn query_is_case_insensitive_for_cyrillic() {
        let store = TaskStore::in_memory().unwrap();
        store.insert("Купить молоко", "", at(1)).unwrap();
        store.insert("Выгулять собаку", "", at(2)).unwrap();
        store.insert("купить хлеб", "", at(3)).unwrap();
        let found = store.query(Some("КУПИТЬ")).unwrap();
        let titles: Vec<_> = found.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["купить хлеб", "Купить молоко"]);
    }

    #[test]
    fn query_is_idempotent() {
        let store = TaskStore::in_memory().unwrap();
        for i in 0..5 {
            store.insert(&format!("task {i}"), "", at(0) + Duration::minutes(i)).unwrap();
        }
        assert_eq!(store.query(Some("task")).unwrap(), store.query(Some("task")).unwrap());
    }

    #[test]
    fn ties_on_created_at_keep_source_order() {
        let store = TaskStore::in_memory().unwrap();
        store
            .insert_many(&[imported(1, "one", false), imported(2, "two", false), imported(3, "three", false)])
            .unwrap();
        let ids: Vec<_> = store.query(None).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[test]
    fn events_follow_writes() {
        let store = TaskStore::in_memory().unwrap();
        let rx = store.subscribe();
        let task = store.insert("t", "", at(1)).unwrap();
        store.toggle_completed(task.id).unwrap();
        store.delete(task.id).unwrap();
        store.delete(task.id).unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            [
                StoreEvent::Inserted(task.id),
                StoreEvent::Updated(task.id),
                StoreEvent::Deleted(task.id),
            ]
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = TaskStore::in_memory().unwrap();
        drop(store.subscribe());
        store.insert("t", "", at(1)).unwrap();
        assert!(lock(&store.inner.subscribers).is_empty());
    }

    #[test]
    fn failed_import_publishes_nothing() {
        let store = TaskStore::in_memory().unwrap();
        let rx = store.subscribe();
        lock(&store.inner.writer)
            .execute_batch("CREATE TRIGGER reject BEFORE INSERT ON tasks WHEN NEW.id = 2 BEGIN SELECT RAISE(ABORT, 'rejected'); END;")
            .unwrap();
        let result = store.insert_many(&[imported(1, "a", false), imported(2, "b", false)]);
        assert!(matches!(result, Err(StoreError::Persistence(_))));
        assert_eq!(store.count().unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }
}
