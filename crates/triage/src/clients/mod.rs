//! Collaborator seams consumed by investigations.
//!
//! Each external platform sits behind an `async_trait` so that decision trees
//! can be exercised with in-memory fakes:
//!
//! - [`CloudProvider`] / [`CloudProviderFactory`] - instances, audit trail, networking
//! - [`ClusterManager`] - cluster records, restrictions, advisories
//! - [`DeploymentLookup`] - Hive `ClusterDeployment` records
//! - [`IncidentPager`] - notes, escalation and silencing of the incident
//! - [`NetworkVerifier`] - egress reachability checks
//! - [`AnalysisAgent`] - AI-assisted summaries

pub mod analysis;
mod api;
pub mod aws;
pub mod command;
pub mod hive;
pub mod ocm;
pub mod pagerduty;
mod types;
pub mod verifier;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use analysis::{AnalysisAgent, AnalysisRequest};
pub use api::ApiError;
pub use types::{
    Advisory, AdvisoryEntry, AdvisoryFilter, AdvisorySeverity, AuditEvent, Cluster,
    ClusterDeployment, ClusterState, Instance, InstanceState, NodeCount, Product, Restriction,
    Route, RouteTable, StateTransition, RESTRICTION_CHANGE_LOG_TYPE,
};
pub use verifier::{EgressTarget, NetworkVerifier, VerifierOutcome};

/// Cloud account access for one cluster.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Instances tagged with the infrastructure id that are not running.
    async fn list_non_running_instances(&self, infra_id: &str) -> Result<Vec<Instance>>;

    /// Instances tagged with the infrastructure id that are running.
    async fn list_running_instances(&self, infra_id: &str) -> Result<Vec<Instance>>;

    /// Stop/terminate audit events for the given instances since `since`,
    /// at most `max_results` per instance.
    async fn lookup_stop_events(
        &self,
        instance_ids: &[String],
        since: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<AuditEvent>>;

    /// Route tables associated with a subnet.
    async fn route_tables(&self, subnet_id: &str) -> Result<Vec<RouteTable>>;

    /// Subnets created for the cluster's infrastructure.
    async fn subnet_ids(&self, infra_id: &str) -> Result<Vec<String>>;

    /// Control plane security group of the cluster's infrastructure.
    async fn security_group_id(&self, infra_id: &str) -> Result<String>;
}

/// Builds a [`CloudProvider`] scoped to one cluster's cloud account.
#[async_trait]
pub trait CloudProviderFactory: Send + Sync {
    async fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn CloudProvider>>;
}

/// Cluster management API.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster>;

    /// Expected node count derived from machine pools.
    async fn get_expected_node_count(&self, cluster: &Cluster) -> Result<NodeCount>;

    async fn list_restrictions(&self, cluster_id: &str) -> Result<Vec<Restriction>>;

    async fn post_restriction(&self, cluster_id: &str, restriction: &Restriction) -> Result<()>;

    async fn delete_restriction(&self, cluster_id: &str, restriction_id: &str) -> Result<()>;

    async fn post_advisory(&self, cluster: &Cluster, advisory: &Advisory) -> Result<()>;

    async fn list_advisories(
        &self,
        cluster: &Cluster,
        filter: &AdvisoryFilter,
    ) -> Result<Vec<AdvisoryEntry>>;

    /// State changes in chronological order.
    async fn list_state_transitions(&self, cluster: &Cluster) -> Result<Vec<StateTransition>>;

    async fn get_organization_id(&self, cluster: &Cluster) -> Result<String>;

    async fn is_access_protected(&self, cluster: &Cluster) -> Result<bool>;
}

/// Lookup of Hive deployment records.
#[async_trait]
pub trait DeploymentLookup: Send + Sync {
    async fn get_cluster_deployment(&self, cluster_id: &str) -> Result<ClusterDeployment>;
}

/// Incident paging API.
#[async_trait]
pub trait IncidentPager: Send + Sync {
    async fn add_note(&self, incident_id: &str, note: &str) -> Result<()>;

    /// Hand the incident to a human.
    async fn escalate(&self, incident_id: &str, reason: &str) -> Result<()>;

    /// Suppress paging for the incident.
    async fn silence(&self, incident_id: &str, reason: &str) -> Result<()>;

    /// Cluster id recorded in the incident's alert details.
    async fn get_cluster_id(&self, incident_id: &str) -> Result<String>;
}
