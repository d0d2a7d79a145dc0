//! `flashclaw-ipc` — the file-based IPC bus (§4.7): tool plugins and other
//! out-of-process producers drop JSON envelopes under
//! `<root>/data/ipc/<group>/{messages,tasks}/*.json`; this crate polls,
//! validates, authorises, and dispatches them.

pub mod authorize;
pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod validate;

pub use bus::IpcBus;
pub use dispatcher::Dispatcher;
pub use error::{IpcError, Result};
