//! AWS access through the `aws` CLI.
//!
//! Every call runs `aws <service> <operation> --output json` scoped to the
//! cluster's region and an optional named profile, and parses the JSON reply.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::command;
use super::{
    AuditEvent, CloudProvider, CloudProviderFactory, Cluster, Instance, InstanceState, Route,
    RouteTable,
};

/// Audit event names that stop or remove an instance.
const STOP_EVENT_NAMES: [&str; 2] = ["StopInstances", "TerminateInstances"];

/// Largest page CloudTrail `lookup-events` accepts.
const MAX_LOOKUP_RESULTS: usize = 50;

/// Tag key prefix carried by every installer-created resource.
const CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";

/// AWS CLI wrapper scoped to one account and region.
#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: PathBuf,
    region: String,
    profile: Option<String>,
    timeout: Duration,
}

impl AwsCli {
    pub fn new(binary: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            region: region.into(),
            profile: None,
            timeout: command::DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self, service: &str, operation: &str, extra: &[String]) -> Vec<String> {
        let mut args = vec![
            service.to_string(),
            operation.to_string(),
            "--output".to_string(),
            "json".to_string(),
            "--region".to_string(),
            self.region.clone(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args.extend_from_slice(extra);
        args
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        extra: &[String],
    ) -> Result<T> {
        let args = self.args(service, operation, extra);
        command::run_json(&self.binary, &args, self.timeout)
            .await
            .with_context(|| format!("aws {service} {operation} failed"))
    }

    /// Confirm the configured credentials are accepted.
    pub async fn validate(&self) -> Result<()> {
        let identity: CallerIdentity = self.call("sts", "get-caller-identity", &[]).await?;
        debug!(account = %identity.account, arn = %identity.arn, "AWS credentials valid");
        Ok(())
    }

    async fn describe_instances(&self, infra_id: &str, states: &str) -> Result<Vec<Instance>> {
        let filters = vec![
            "--filters".to_string(),
            format!("Name=tag:{CLUSTER_TAG_PREFIX}{infra_id},Values=owned"),
            format!("Name=instance-state-name,Values={states}"),
        ];
        let reply: DescribeInstances = self.call("ec2", "describe-instances", &filters).await?;
        Ok(reply.into_instances())
    }
}

#[async_trait]
impl CloudProvider for AwsCli {
    async fn list_non_running_instances(&self, infra_id: &str) -> Result<Vec<Instance>> {
        self.describe_instances(infra_id, "pending,stopping,stopped,shutting-down,terminated")
            .await
    }

    async fn list_running_instances(&self, infra_id: &str) -> Result<Vec<Instance>> {
        self.describe_instances(infra_id, "running").await
    }

    async fn lookup_stop_events(
        &self,
        instance_ids: &[String],
        since: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<AuditEvent>> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for instance_id in instance_ids {
            let extra = lookup_args(instance_id, since, max_results);
            let reply: LookupEvents = self.call("cloudtrail", "lookup-events", &extra).await?;
            for event in reply.into_stop_events()? {
                if seen.insert(event.event_id.clone()) {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(|e| e.event_time);
        debug!(count = events.len(), "Found stop events");
        Ok(events)
    }

    async fn route_tables(&self, subnet_id: &str) -> Result<Vec<RouteTable>> {
        let extra = vec![
            "--filters".to_string(),
            format!("Name=association.subnet-id,Values={subnet_id}"),
        ];
        let reply: DescribeRouteTables = self.call("ec2", "describe-route-tables", &extra).await?;
        Ok(reply.route_tables.into_iter().map(Into::into).collect())
    }

    async fn subnet_ids(&self, infra_id: &str) -> Result<Vec<String>> {
        let extra = vec![
            "--filters".to_string(),
            format!("Name=tag:{CLUSTER_TAG_PREFIX}{infra_id},Values=owned,shared"),
        ];
        let reply: DescribeSubnets = self.call("ec2", "describe-subnets", &extra).await?;
        Ok(reply.subnets.into_iter().map(|s| s.subnet_id).collect())
    }

    async fn security_group_id(&self, infra_id: &str) -> Result<String> {
        let extra = vec![
            "--filters".to_string(),
            format!("Name=tag:Name,Values={infra_id}-master-sg,{infra_id}-controlplane"),
        ];
        let reply: DescribeSecurityGroups =
            self.call("ec2", "describe-security-groups", &extra).await?;
        match reply.security_groups.into_iter().next() {
            Some(group) => Ok(group.group_id),
            None => bail!("no control plane security group found for {infra_id}"),
        }
    }
}

fn lookup_args(instance_id: &str, since: DateTime<Utc>, max_results: usize) -> Vec<String> {
    vec![
        "--lookup-attributes".to_string(),
        format!("AttributeKey=ResourceName,AttributeValue={instance_id}"),
        "--start-time".to_string(),
        since.to_rfc3339(),
        "--max-results".to_string(),
        max_results.min(MAX_LOOKUP_RESULTS).to_string(),
    ]
}

/// Builds [`AwsCli`] clients for AWS clusters.
#[derive(Debug, Clone)]
pub struct AwsCliFactory {
    binary: PathBuf,
    profile: Option<String>,
    timeout: Duration,
}

impl AwsCliFactory {
    pub fn new(binary: impl Into<PathBuf>, profile: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            profile,
            timeout: command::DEFAULT_TIMEOUT,
        }
    }

    /// Limit applied to every CLI call of the clients this factory builds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CloudProviderFactory for AwsCliFactory {
    async fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn CloudProvider>> {
        if cluster.cloud_provider != "aws" {
            bail!(
                "unsupported cloud provider '{}' for cluster {}",
                cluster.cloud_provider,
                cluster.id
            );
        }
        let cli = AwsCli::new(&self.binary, &cluster.region)
            .with_profile(self.profile.clone())
            .with_timeout(self.timeout);
        cli.validate()
            .await
            .with_context(|| format!("cannot access the cloud account of {}", cluster.id))?;
        info!(cluster_id = %cluster.id, region = %cluster.region, "Cloud provider ready");
        Ok(Arc::new(cli))
    }
}

// =============================================================================
// CLI output types (internal)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
    arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceRecord {
    instance_id: String,
    instance_type: Option<String>,
    state: InstanceStateRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceStateRecord {
    name: InstanceState,
}

impl DescribeInstances {
    fn into_instances(self) -> Vec<Instance> {
        self.reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(|i| Instance {
                id: i.instance_id,
                state: i.state.name,
                instance_type: i.instance_type,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LookupEvents {
    #[serde(default)]
    events: Vec<EventRecord>,
}

/// CLI v2 prints ISO timestamps, v1 prints epoch seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventTime {
    Iso(DateTime<Utc>),
    Epoch(f64),
}

impl EventTime {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Iso(t) => Some(*t),
            Self::Epoch(secs) => {
                let nanos = (secs.fract() * 1e9) as u32;
                DateTime::from_timestamp(secs.trunc() as i64, nanos)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventRecord {
    event_id: String,
    event_name: String,
    event_time: EventTime,
    username: Option<String>,
    #[serde(rename = "CloudTrailEvent", default)]
    cloud_trail_event: String,
}

impl LookupEvents {
    fn into_stop_events(self) -> Result<Vec<AuditEvent>> {
        self.events
            .into_iter()
            .filter(|e| STOP_EVENT_NAMES.contains(&e.event_name.as_str()))
            .map(|e| {
                let event_time = e
                    .event_time
                    .to_utc()
                    .with_context(|| format!("invalid time on audit event {}", e.event_id))?;
                Ok(AuditEvent {
                    event_id: e.event_id,
                    event_name: e.event_name,
                    event_time,
                    username: e.username,
                    payload: e.cloud_trail_event,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRouteTables {
    #[serde(default)]
    route_tables: Vec<RouteTableRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RouteTableRecord {
    route_table_id: String,
    #[serde(default)]
    routes: Vec<RouteRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RouteRecord {
    destination_cidr_block: Option<String>,
    gateway_id: Option<String>,
    nat_gateway_id: Option<String>,
    transit_gateway_id: Option<String>,
    state: Option<String>,
}

impl From<RouteTableRecord> for RouteTable {
    fn from(record: RouteTableRecord) -> Self {
        Self {
            id: record.route_table_id,
            routes: record
                .routes
                .into_iter()
                .map(|r| Route {
                    destination_cidr: r.destination_cidr_block,
                    gateway_id: r.gateway_id,
                    nat_gateway_id: r.nat_gateway_id,
                    transit_gateway_id: r.transit_gateway_id,
                    state: r.state,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubnets {
    #[serde(default)]
    subnets: Vec<SubnetRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetRecord {
    subnet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecurityGroups {
    #[serde(default)]
    security_groups: Vec<SecurityGroupRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupRecord {
    group_id: String,
}
