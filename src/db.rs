use rusqlite::{Connection, OpenFlags};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id          INTEGER PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    completed   INTEGER NOT NULL DEFAULT 0 CHECK(completed IN (0, 1)),
    section_key TEXT NOT NULL DEFAULT 'pending'
        CHECK(section_key = CASE completed WHEN 1 THEN 'completed' ELSE 'pending' END),
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_order ON tasks(completed, created_at);
";

fn set_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// SQLite's name for a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

pub fn open(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

/// Opens a second, read-only handle on an existing database file.
/// Under WAL it sees every committed write without blocking the writer.
pub fn open_reader(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

pub fn open_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = open_memory().unwrap();
        init(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn section_key_must_agree_with_completed() {
        let conn = open_memory().unwrap();
        let mismatched = conn.execute(
            "INSERT INTO tasks (id, title, completed, section_key, created_at)
             VALUES (1, 't', 1, 'pending', 0)",
            [],
        );
        assert!(mismatched.is_err());

        conn.execute(
            "INSERT INTO tasks (id, title, completed, section_key, created_at)
             VALUES (1, 't', 1, 'completed', 0)",
            [],
        )
        .unwrap();
    }
}
