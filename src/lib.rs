//! Task persistence and query layer.
//!
//! [`store::TaskStore`] owns the task rows, [`seed::SeedCoordinator`] imports
//! the starter list exactly once, and [`view::QueryView`] keeps a sectioned,
//! searchable projection in step with committed writes.

pub mod config;
pub mod db;
pub mod error;
pub mod flags;
pub mod model;
pub mod output;
pub mod seed;
pub mod store;
pub mod view;
pub mod watch;

pub use error::{FlagError, SeedError, StoreError};
pub use flags::{FlagStore, JsonFlags, MemoryFlags, SEED_FLAG_KEY};
pub use model::{ImportedTask, SectionKey, Task, TaskEdit};
pub use seed::{BundledSeed, FileSeed, SeedCoordinator, SeedOutcome, SeedSource, StaticSeed};
pub use store::{StoreEvent, TaskStore};
pub use view::{IndexPath, QueryView, ViewEvent};
