//! `flashclaw-scheduler` — precise wake-up task scheduler (§4.6).
//!
//! Rather than polling, [`engine::SchedulerEngine`] arms a single timer for
//! the soonest `next_run` across all active tasks (read via
//! [`flashclaw_store::Store::get_next_wake_time`]), runs due tasks through a
//! concurrency-limited pool, and re-arms. [`engine::SchedulerHandle`] is the
//! CRUD-plus-`wake()` surface the IPC bus and slash commands use.
//!
//! | `schedule_type` | Behaviour                                          |
//! |-----------------|-----------------------------------------------------|
//! | `cron`          | Next occurrence via the `cron` crate                |
//! | `interval`      | `now + schedule_value` milliseconds                 |
//! | `once`          | Fires once at the ISO-8601 instant, then completes  |

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{SchedulerEngine, SchedulerHandle, TaskExecutor};
pub use error::{Result, SchedulerError};
