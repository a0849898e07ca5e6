//! `keeper-scheduler`: in-process, tokio-driven scheduler engine.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] keeps a live set of entries keyed by id.
//! Each entry pairs a [`types::Trigger`] with a [`job::ScheduledJob`] and an
//! [`types::EntryOptions`] firing policy. The tick loop launches due run
//! times in their own tasks and advances every entry past "now".
//!
//! # Firing policy
//!
//! | Option             | Behaviour                                            |
//! |--------------------|------------------------------------------------------|
//! | `misfire_grace`    | Run times older than `now - grace` are skipped       |
//! | `coalesce`         | Several overdue run times launch once                |
//! | `max_instances`    | A firing is skipped while this many are in flight    |
//! | `replace_existing` | Adding an existing id overwrites instead of failing  |

pub mod engine;
pub mod error;
pub mod job;
pub mod schedule;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use job::ScheduledJob;
pub use types::{EntryOptions, EntrySnapshot, RunOutcome, Trigger};
