mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use todokit::config::{Config, LOG_ENV};
use todokit::{
    output, watch, BundledSeed, FileSeed, JsonFlags, QueryView, SectionKey, SeedCoordinator,
    SeedOutcome, SeedSource, TaskEdit, TaskStore, ViewEvent,
};

const SEED_POLL: Duration = Duration::from_millis(50);

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("todokit=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_date(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid date '{s}': expected RFC 3339"))
        })
        .transpose()
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        bail!("task title must not be empty");
    }
    Ok(())
}

fn coordinator(config: &Config, store: &TaskStore) -> SeedCoordinator {
    let source: Arc<dyn SeedSource> = match &config.seed_path {
        Some(path) => Arc::new(FileSeed::new(path)),
        None => Arc::new(BundledSeed),
    };
    SeedCoordinator::new(
        store.clone(),
        Arc::new(JsonFlags::new(&config.flags_path)),
        source,
    )
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?.with_overrides(cli.db, cli.flags, cli.seed);
    config.ensure_dirs()?;
    let store = TaskStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path))?;

    match cli.command {
        Command::Init => {
            eprintln!("Initialized {}", config.db_path);
            if !coordinator(&config, &store).is_seeded()? {
                eprintln!("Starter tasks not imported yet; run `todokit seed`");
            }
        }

        Command::Seed => match coordinator(&config, &store).ensure_seeded()? {
            SeedOutcome::AlreadySeeded => eprintln!("Starter tasks were already imported"),
            SeedOutcome::Imported(n) => eprintln!("Imported {n} starter tasks"),
        },

        Command::Add { title, desc, date } => {
            require_title(&title)?;
            let created_at = parse_date(date.as_deref())?.unwrap_or_else(Utc::now);
            let task = store.insert(&title, &desc, created_at)?;
            println!("{}", task.id);
            eprintln!("Added task '{}'", task.title);
        }

        Command::Edit {
            id,
            title,
            desc,
            date,
        } => {
            if let Some(t) = &title {
                require_title(t)?;
            }
            let edit = TaskEdit {
                title,
                description: desc,
                created_at: parse_date(date.as_deref())?,
            };
            if edit.is_empty() {
                bail!("nothing to change: pass --title, --desc, or --date");
            }
            store.update(id, &edit)?;
            eprintln!("Updated task {id}");
        }

        Command::Done { id } => {
            store.set_completed(id, true)?;
            eprintln!("Marked task {id} as completed");
        }

        Command::Toggle { id } => {
            let task = store.toggle_completed(id)?;
            eprintln!("Task {id} is now {}", task.section_key());
        }

        Command::Rm { id } => {
            if store.delete(id)? {
                eprintln!("Removed task {id}");
            } else {
                eprintln!("No task {id}; nothing removed");
            }
        }

        Command::Show { id, json } => {
            let task = store.get(id)?.ok_or_else(|| anyhow!("task {id} not found"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print!("{}", output::format_task_detail(&task));
            }
        }

        Command::List {
            search,
            collapse,
            json,
        } => {
            let collapse = collapse
                .iter()
                .map(|s| SectionKey::parse(s))
                .collect::<Result<Vec<_>>>()?;
            let mut view = QueryView::new(store.clone())
                .with_seeder(coordinator(&config, &store))
                .with_refresh_delay(config.refresh_delay);
            let events = view.subscribe();
            view.view_did_load();
            while view.is_loading() || view.is_seeding() {
                view.wait_and_pump(SEED_POLL);
            }
            for event in events.try_iter() {
                if let ViewEvent::Error(message) = event {
                    eprintln!("warning: {message}");
                }
            }
            if let Some(text) = search.as_deref() {
                view.set_search_text(text);
            }
            for key in collapse {
                view.set_collapsed(key, true);
            }
            if json {
                let sections = output::section_details(&view);
                println!("{}", serde_json::to_string_pretty(&sections)?);
            } else {
                print!("{}", output::format_sections(&view));
            }
        }

        Command::Wait => {
            let (_watcher, rx) = watch::watch_db(&config.db_path)?;
            // Block until a change event
            watch::wait_for_change(&rx, Duration::MAX);
        }
    }

    Ok(())
}
