pub mod error_log;
pub mod state;
pub mod store;

pub use error_log::{ErrorLog, ErrorLogEntry, Severity};
pub use state::{SchedulerState, StateStore};
pub use store::{MemoryStore, SqliteStore, Store};
