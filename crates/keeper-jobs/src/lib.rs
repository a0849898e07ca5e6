//! `keeper-jobs`: the tasks the scheduler engine runs.
//!
//! - [`reconciler`] keeps one engine entry per pre-scheduled periodic job
//!   definition.
//! - [`dispatcher`] starts a definition on the execution agent.
//! - [`sync`] mirrors projects, units and execution status from the agent.
//! - [`registrar`] installs the fixed-interval system tasks.
//!
//! Every task runs through [`scope::Scoped`], which gives it its own store
//! scope for the length of one run.

pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod registrar;
pub mod scope;
pub mod sync;

pub use dispatcher::{DispatchJob, DispatchOutcome, Dispatcher};
pub use error::{JobsError, Result};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registrar::{register_system_tasks, SystemIntervals};
pub use scope::{Scoped, ScopedTask};
pub use sync::{sync_projects, sync_status, sync_units, SyncReport};
