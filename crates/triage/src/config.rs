//! Runtime configuration passed explicitly into every run.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clients::command;
use crate::retry::RetryPolicy;

/// Hostname of the dead-man's-snitch monitor every cluster must reach.
pub const DEFAULT_MONITOR_HOST: &str = "nosnch.in";

/// Service account the triage automation acts as by default.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "service-account-cluster-triage";

/// Configuration for investigations and the runner.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Allow investigations that are not production-ready to be dispatched.
    pub experimental_enabled: bool,
    /// Applied to whole investigation runs and to restriction changes.
    pub retry: RetryPolicy,
    /// Upper bound for AI-assisted analysis calls.
    pub analysis_timeout: Duration,
    /// Upper bound for each external tool invocation.
    pub command_timeout: Duration,
    /// How far back to look for stop/terminate audit events.
    pub audit_lookback: Duration,
    /// Maximum number of audit events fetched per instance.
    pub audit_max_results: usize,
    /// A resume from hibernation within this window is "recent".
    pub recent_resume_window: Duration,
    /// History window inspected by the anti-flapping guard.
    pub flapping_window: Duration,
    /// Number of recent restriction changes that blocks automatic removal.
    pub flapping_threshold: usize,
    /// Accounts the automation posts restriction changes as.
    pub service_accounts: Vec<String>,
    /// Egress failures mentioning this host block the cluster's monitoring.
    pub monitor_host: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            experimental_enabled: false,
            retry: RetryPolicy::default(),
            analysis_timeout: Duration::from_secs(300),
            command_timeout: command::DEFAULT_TIMEOUT,
            audit_lookback: Duration::from_secs(15 * 60),
            audit_max_results: 50,
            recent_resume_window: Duration::from_secs(2 * 60 * 60),
            flapping_window: Duration::from_secs(24 * 60 * 60),
            flapping_threshold: 2,
            service_accounts: vec![DEFAULT_SERVICE_ACCOUNT.to_string()],
            monitor_host: DEFAULT_MONITOR_HOST.to_string(),
        }
    }
}

impl TriageConfig {
    /// Whether `username` is one of the automation's own accounts.
    pub fn is_service_account(&self, username: &str) -> bool {
        self.service_accounts.iter().any(|a| a == username)
    }
}

/// Start of a look-back window of length `window` ending at `now`.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
