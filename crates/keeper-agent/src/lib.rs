//! `keeper-agent`: client side of the remote execution agent.
//!
//! [`ExecutionAgent`] is the only contract the scheduler core depends on;
//! [`ScrapydAgent`] implements it against a Scrapyd-compatible HTTP API.

pub mod agent;
pub mod scrapyd;

pub use agent::{AgentError, ExecutionAgent};
pub use scrapyd::ScrapydAgent;
