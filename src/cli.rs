use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "todokit", about = "Personal task list with a one-time starter import")]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.todokit/todokit.db]
    #[arg(long, env = "TODOKIT_DB", global = true)]
    pub db: Option<String>,

    /// Path to the flag file [default: ~/.todokit/flags.json]
    #[arg(long, env = "TODOKIT_FLAGS", global = true)]
    pub flags: Option<String>,

    /// Seed document to import instead of the bundled one
    #[arg(long, env = "TODOKIT_SEED", global = true)]
    pub seed: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Import the starter list unless it was already imported
    Seed,

    /// Add a task
    Add {
        /// Task title
        title: String,
        /// Task description
        #[arg(short, long, default_value = "")]
        desc: String,
        /// Creation date (RFC 3339) [default: now]
        #[arg(long)]
        date: Option<String>,
    },

    /// Edit a task's title, description, or date
    Edit {
        /// Task id
        #[arg(allow_negative_numbers = true)]
        id: i64,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        desc: Option<String>,
        /// New creation date (RFC 3339)
        #[arg(long)]
        date: Option<String>,
    },

    /// Mark a task as completed
    Done {
        /// Task id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },

    /// Flip a task between pending and completed
    Toggle {
        /// Task id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },

    /// Remove a task
    Rm {
        /// Task id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },

    /// Show task details
    Show {
        /// Task id
        #[arg(allow_negative_numbers = true)]
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tasks grouped into Today and Completed
    List {
        /// Only titles containing this text (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,
        /// Hide the rows of a section (pending or completed)
        #[arg(long)]
        collapse: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Block until the database changes
    Wait,
}
