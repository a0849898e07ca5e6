//! `keeper-store`: SQLite persistence for projects, job definitions, units
//! and execution records.
//!
//! The store is read-mostly from the scheduler's point of view: the
//! reconciler only lists and fetches job definitions, while the sync tasks
//! write units and execution status.

pub mod context;
pub mod db;
pub mod error;
pub mod store;

pub use context::StoreContext;
pub use error::{Result, StoreError};
pub use store::{
    DefinitionScan, JobFilter, JobStore, NewJobDefinition, RejectedDefinition, UnitChanges,
};
