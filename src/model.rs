use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Grouping discriminator derived from `Task::completed`.
///
/// Ordering follows display order: pending rows come before completed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKey {
    Pending,
    Completed,
}

impl SectionKey {
    pub fn for_completed(completed: bool) -> Self {
        if completed {
            Self::Completed
        } else {
            Self::Pending
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => anyhow::bail!("invalid section '{s}': must be pending or completed"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Human label shown as the section header.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Today",
            Self::Completed => "Completed",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::Completed => "[x]",
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub(crate) section_key: SectionKey,
}

impl Task {
    pub fn section_key(&self) -> SectionKey {
        self.section_key
    }

    /// Locally created tasks get non-positive ids; seeded ones keep theirs.
    pub fn is_imported(&self) -> bool {
        self.id > 0
    }
}

/// A record arriving from the seed import path, id preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTask {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields to overwrite on `TaskStore::update`; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.created_at.is_none()
    }
}
