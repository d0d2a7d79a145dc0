pub mod backup;
pub mod config;
pub mod error;
pub mod ipc_write;
pub mod paths;
pub mod types;

pub use config::FlashclawConfig;
pub use error::{FlashclawError, Result};
pub use paths::{Paths, MAIN_GROUP_FOLDER};
