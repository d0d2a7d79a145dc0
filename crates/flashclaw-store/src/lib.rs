pub mod db;
pub mod error;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::Store;
pub use types::{TaskRun, TaskRunOutcome};
