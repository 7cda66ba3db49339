use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Creates a watcher for the database file and returns a receiver for change events.
/// The watcher must be kept alive for events to be received.
///
/// The parent directory is watched, since SQLite writes `-wal` and `-shm` files
/// next to the database, and events for unrelated files are filtered out.
pub fn watch_db(db_path: &str) -> Result<(RecommendedWatcher, Receiver<()>)> {
    let (tx, rx) = mpsc::channel();

    let db_filename = Path::new(db_path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            // Reads by any process show up as access events; they change nothing.
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if touches_db(&event.paths, &db_filename) {
                let _ = tx.send(());
            }
        }
    })
    .context("failed to create file watcher")?;

    let path = Path::new(db_path);
    let watch_path = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    watcher
        .watch(watch_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", watch_path.display()))?;

    Ok((watcher, rx))
}

fn touches_db(paths: &[std::path::PathBuf], db_filename: &str) -> bool {
    paths.iter().any(|p| {
        p.file_name()
            .map(|f| f.to_string_lossy().starts_with(db_filename))
            .unwrap_or(false)
    })
}

/// Waits for a database change event with timeout.
/// Returns true if an event was received, false on timeout.
pub fn wait_for_change(rx: &Receiver<()>, timeout: Duration) -> bool {
    rx.recv_timeout(timeout).is_ok()
}

/// Drains any pending events from the receiver.
pub fn drain_events(rx: &Receiver<()>) {
    while rx.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn companion_files_count_as_db_changes() {
        let paths = [PathBuf::from("/data/todokit.db-wal")];
        assert!(touches_db(&paths, "todokit.db"));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let paths = [PathBuf::from("/data/flags.json")];
        assert!(!touches_db(&paths, "todokit.db"));
    }

    #[test]
    fn drain_empties_channel() {
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        drain_events(&rx);
        assert!(!wait_for_change(&rx, Duration::ZERO));
    }
}
