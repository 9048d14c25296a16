//! Domain records exchanged with external collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster records
// ============================================================================

/// Lifecycle state reported by cluster management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Installing,
    Ready,
    Error,
    Hibernating,
    Resuming,
    PoweringDown,
    Uninstalling,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installing => write!(f, "installing"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
            Self::Hibernating => write!(f, "hibernating"),
            Self::Resuming => write!(f, "resuming"),
            Self::PoweringDown => write!(f, "powering_down"),
            Self::Uninstalling => write!(f, "uninstalling"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Managed product flavour; selects documentation links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Osd,
    Rosa,
    #[serde(other)]
    Unknown,
}

/// A managed cluster as known to cluster management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Internal cluster identifier.
    pub id: String,
    /// External (UUID) identifier.
    pub external_id: String,
    pub name: String,
    pub state: ClusterState,
    pub product: Product,
    /// Customer cloud subscription: the customer owns the cloud account.
    pub ccs: bool,
    /// Cloud provider id, e.g. `aws`.
    pub cloud_provider: String,
    pub region: String,
    /// Hosted control plane cluster.
    pub hypershift: bool,
    /// Infrastructure id, when cluster management knows it.
    pub infra_id: Option<String>,
    /// Customer-provided subnets (empty for installer-managed networking).
    pub subnet_ids: Vec<String>,
    pub subscription_id: Option<String>,
}

/// Hive-side deployment record of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDeployment {
    pub name: String,
    pub namespace: String,
    pub infra_id: String,
    pub installed: bool,
    pub power_state: Option<String>,
}

/// Expected worker and control plane node count range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    pub min: u32,
    pub max: u32,
}

// ============================================================================
// Restrictions and advisories
// ============================================================================

/// Support restriction (limited support reason) on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    /// Assigned by cluster management once posted.
    pub id: Option<String>,
    pub summary: String,
    pub details: String,
}

impl Restriction {
    pub fn new(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            id: None,
            summary: summary.into(),
            details: details.into(),
        }
    }

    /// Two restrictions with the same summary and details are the same reason.
    pub fn same_reason(&self, other: &Self) -> bool {
        self.summary == other.summary && self.details == other.details
    }
}

/// Advisory severity understood by the advisory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvisorySeverity {
    Debug,
    Info,
    Warning,
    Major,
    Critical,
}

/// A customer-facing advisory to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub severity: AdvisorySeverity,
    pub summary: String,
    pub description: String,
    /// Routing tag for the advisory system.
    pub service_name: String,
    pub internal_only: bool,
}

/// Category of history entries written when a restriction is set or lifted.
pub const RESTRICTION_CHANGE_LOG_TYPE: &str = "cluster-state-updates";

/// Entry in a cluster's advisory/audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryEntry {
    pub id: String,
    /// Account that created the entry.
    pub username: String,
    /// Category, e.g. [`RESTRICTION_CHANGE_LOG_TYPE`].
    pub log_type: String,
    pub summary: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Server-side narrowing of an advisory history listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvisoryFilter {
    pub log_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// State change observed on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: ClusterState,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Cloud provider records
// ============================================================================

/// Instance lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Terminated => write!(f, "terminated"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A cloud instance belonging to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    pub instance_type: Option<String>,
}

/// An audit trail record of a stop or terminate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    /// `StopInstances`, `TerminateInstances`, ...
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    /// Top-level username recorded by the audit trail.
    pub username: Option<String>,
    /// Raw JSON payload of the event.
    pub payload: String,
}

/// Route entry of a route table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination_cidr: Option<String>,
    pub gateway_id: Option<String>,
    pub nat_gateway_id: Option<String>,
    pub transit_gateway_id: Option<String>,
    pub state: Option<String>,
}

/// A route table associated with a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub routes: Vec<Route>,
}
