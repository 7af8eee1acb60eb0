//! Daily Check-in Agent Library
//!
//! This library provides components for verifying a session cookie and running
//! automated check-in requests against a set of configured HTTP APIs, keeping
//! per-target status for an observing UI.

pub mod agent;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod extract;
pub mod messages;
pub mod notify;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;

pub use agent::{AgentHandle, CheckinAgent};
pub use config::{Settings, TargetConfig};
pub use errors::{AgentError, Result};
pub use messages::{Message, Request, Response};
pub use orchestrator::{CheckinOrchestrator, RunOutcome};
pub use transport::{CheckinExecutor, HttpTransport, Outcome};
