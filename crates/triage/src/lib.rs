//! Cluster alert triage.
//!
//! Receives fleet alerts, runs the matching investigation against the
//! cluster's management API and cloud account, and either remediates
//! automatically (support restrictions, customer advisories, silencing) or
//! escalates to a human with notes explaining what was found.
//!
//! Entry point is [`Triage::handle`].

pub mod actions;
pub mod alert;
pub mod clients;
pub mod config;
pub mod error;
pub mod flapping;
pub mod investigations;
pub mod metrics;
pub mod notes;
pub mod resolver;
pub mod retry;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::{Action, Conclusion, Executor};
pub use alert::{AlertEvent, AlertStatus};
pub use config::TriageConfig;
pub use error::{ClassifiedError, ErrorKind};
pub use investigations::{Investigation, Registry};
pub use metrics::{AtomicMetrics, MetricsRecorder, MetricsSnapshot};
pub use resolver::{AlertContext, Requirements, Resolver, Services};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{Outcome, OutcomeStatus, Triage};
