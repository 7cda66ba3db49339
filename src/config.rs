use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::view::DEFAULT_REFRESH_DELAY;

pub const DB_ENV: &str = "TODOKIT_DB";
pub const FLAGS_ENV: &str = "TODOKIT_FLAGS";
pub const SEED_ENV: &str = "TODOKIT_SEED";
pub const REFRESH_ENV: &str = "TODOKIT_REFRESH_MS";
pub const LOG_ENV: &str = "TODOKIT_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: String,
    pub flags_path: String,
    /// Seed document on disk; `None` uses the bundled dataset.
    pub seed_path: Option<String>,
    pub refresh_delay: Duration,
}

fn home_dir(lookup: &impl Fn(&str) -> Option<String>) -> String {
    lookup("HOME").unwrap_or_else(|| ".".into())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup(DB_ENV)
            .unwrap_or_else(|| format!("{}/.todokit/todokit.db", home_dir(&lookup)));
        let flags_path = lookup(FLAGS_ENV)
            .unwrap_or_else(|| format!("{}/.todokit/flags.json", home_dir(&lookup)));
        let refresh_delay = match lookup(REFRESH_ENV) {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("{REFRESH_ENV} must be milliseconds, got '{ms}'"))?,
            ),
            None => DEFAULT_REFRESH_DELAY,
        };
        Ok(Self {
            db_path,
            flags_path,
            seed_path: lookup(SEED_ENV),
            refresh_delay,
        })
    }

    pub fn with_overrides(
        mut self,
        db: Option<String>,
        flags: Option<String>,
        seed: Option<String>,
    ) -> Self {
        if let Some(db) = db {
            self.db_path = db;
        }
        if let Some(flags) = flags {
            self.flags_path = flags;
        }
        if seed.is_some() {
            self.seed_path = seed;
        }
        self
    }

    /// Creates the directories holding the database and the flag file.
    pub fn ensure_dirs(&self) -> Result<()> {
        for file in [&self.db_path, &self.flags_path] {
            if let Some(parent) = Path::new(file).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create directory {}", parent.display()))?;
                }
            }
        }
        Ok(())
    }
}
