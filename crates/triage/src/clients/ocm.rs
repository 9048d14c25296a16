//! Cluster management (OCM) REST client.
//!
//! Covers the parts of the API used by investigations:
//! - cluster records and machine pools
//! - limited support reasons (support restrictions)
//! - service logs (advisories and restriction/state history)
//! - subscriptions and access protection lookups

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::api::{self, ApiError};
use super::{
    Advisory, AdvisoryEntry, AdvisoryFilter, AdvisorySeverity, Cluster, ClusterManager,
    ClusterState, NodeCount, Product, Restriction, StateTransition,
};

/// Default cluster management API URL.
const DEFAULT_OCM_URL: &str = "https://api.openshift.com";

/// Service log search matching hibernation and resume entries.
const STATE_HISTORY_SEARCH: &str = "summary ilike '%hibernat%' or summary ilike '%resum%'";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OcmConfig {
    pub base_url: String,
    /// Bearer access token.
    pub token: String,
    pub timeout_secs: u64,
}

impl OcmConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OCM_URL.to_string(),
            token: token.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Cluster management API client.
pub struct OcmClient {
    client: Client,
    config: OcmConfig,
}

impl OcmClient {
    pub fn new(config: OcmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(api::check(response, path).await?.json().await?)
    }

    async fn list_service_logs(
        &self,
        cluster: &Cluster,
        search: Option<String>,
    ) -> Result<Vec<ServiceLogRecord>, ApiError> {
        let path = format!("/api/service_logs/v1/clusters/{}/cluster_logs", cluster.external_id);
        let mut request = self
            .request(Method::GET, &path)
            .query(&[("orderBy", "timestamp asc"), ("size", "500")]);
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }
        let response = request.send().await?;
        let list: ItemList<ServiceLogRecord> = api::check(response, &path).await?.json().await?;
        Ok(list.items)
    }
}

/// Build a service log search expression for `filter`.
fn search_expression(filter: &AdvisoryFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(log_type) = &filter.log_type {
        clauses.push(format!("log_type = '{log_type}'"));
    }
    if let Some(since) = filter.since {
        clauses.push(format!("timestamp >= '{}'", since.to_rfc3339()));
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" and "))
    }
}

/// Derive hibernation state changes from service log summaries.
fn transition_from_log(record: &ServiceLogRecord) -> Option<StateTransition> {
    let summary = record.summary.to_lowercase();
    let state = if summary.contains("resumed") || summary.contains("resuming") {
        ClusterState::Resuming
    } else if summary.contains("hibernat") {
        ClusterState::Hibernating
    } else {
        return None;
    };
    Some(StateTransition {
        state,
        timestamp: record.timestamp,
    })
}

#[async_trait]
impl ClusterManager for OcmClient {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        let raw: ClusterRecord = self
            .get_json(&format!("/api/clusters_mgmt/v1/clusters/{cluster_id}"))
            .await
            .with_context(|| format!("failed to fetch cluster {cluster_id}"))?;
        Ok(raw.into_cluster())
    }

    async fn get_expected_node_count(&self, cluster: &Cluster) -> Result<NodeCount> {
        let pools_path = if cluster.hypershift {
            format!("/api/clusters_mgmt/v1/clusters/{}/node_pools", cluster.id)
        } else {
            format!("/api/clusters_mgmt/v1/clusters/{}/machine_pools", cluster.id)
        };
        let pools: ItemList<MachinePoolRecord> = self
            .get_json(&pools_path)
            .await
            .with_context(|| format!("failed to list machine pools of {}", cluster.id))?;

        let mut count = NodeCount::default();
        if !cluster.hypershift {
            let raw: ClusterRecord = self
                .get_json(&format!("/api/clusters_mgmt/v1/clusters/{}", cluster.id))
                .await?;
            let fixed = raw.nodes.as_ref().map_or(0, |n| n.master + n.infra);
            count.min += fixed;
            count.max += fixed;
        }
        for pool in pools.items {
            match (pool.replicas, pool.autoscaling) {
                (_, Some(scaling)) => {
                    count.min += scaling.min_replicas;
                    count.max += scaling.max_replicas;
                }
                (Some(replicas), None) => {
                    count.min += replicas;
                    count.max += replicas;
                }
                (None, None) => {}
            }
        }
        debug!(cluster_id = %cluster.id, min = count.min, max = count.max, "Expected node count");
        Ok(count)
    }

    async fn list_restrictions(&self, cluster_id: &str) -> Result<Vec<Restriction>> {
        let list: ItemList<RestrictionRecord> = self
            .get_json(&format!(
                "/api/clusters_mgmt/v1/clusters/{cluster_id}/limited_support_reasons"
            ))
            .await
            .with_context(|| format!("failed to list restrictions of {cluster_id}"))?;
        Ok(list
            .items
            .into_iter()
            .map(|r| Restriction {
                id: Some(r.id),
                summary: r.summary,
                details: r.details,
            })
            .collect())
    }

    async fn post_restriction(&self, cluster_id: &str, restriction: &Restriction) -> Result<()> {
        let path = format!("/api/clusters_mgmt/v1/clusters/{cluster_id}/limited_support_reasons");
        let body = NewRestriction {
            summary: &restriction.summary,
            details: &restriction.details,
            detection_type: "auto",
        };
        let response = self.request(Method::POST, &path).json(&body).send().await?;
        api::check(response, &path)
            .await
            .with_context(|| format!("failed to post restriction on {cluster_id}"))?;
        info!(cluster_id, summary = %restriction.summary, "Posted restriction");
        Ok(())
    }

    async fn delete_restriction(&self, cluster_id: &str, restriction_id: &str) -> Result<()> {
        let path = format!(
            "/api/clusters_mgmt/v1/clusters/{cluster_id}/limited_support_reasons/{restriction_id}"
        );
        let response = self.request(Method::DELETE, &path).send().await?;
        api::check(response, &path)
            .await
            .with_context(|| format!("failed to delete restriction {restriction_id}"))?;
        info!(cluster_id, restriction_id, "Deleted restriction");
        Ok(())
    }

    async fn post_advisory(&self, cluster: &Cluster, advisory: &Advisory) -> Result<()> {
        let path = "/api/service_logs/v1/cluster_logs";
        let body = NewServiceLog {
            cluster_id: &cluster.id,
            cluster_uuid: &cluster.external_id,
            severity: advisory.severity,
            service_name: &advisory.service_name,
            summary: &advisory.summary,
            description: &advisory.description,
            internal_only: advisory.internal_only,
        };
        let response = self.request(Method::POST, path).json(&body).send().await?;
        api::check(response, path)
            .await
            .with_context(|| format!("failed to post advisory on {}", cluster.id))?;
        info!(cluster_id = %cluster.id, summary = %advisory.summary, "Posted advisory");
        Ok(())
    }

    async fn list_advisories(
        &self,
        cluster: &Cluster,
        filter: &AdvisoryFilter,
    ) -> Result<Vec<AdvisoryEntry>> {
        let records = self
            .list_service_logs(cluster, search_expression(filter))
            .await
            .with_context(|| format!("failed to list advisories of {}", cluster.id))?;
        Ok(records
            .into_iter()
            .map(|r| AdvisoryEntry {
                id: r.id,
                username: r.username,
                log_type: r.log_type,
                summary: r.summary,
                description: r.description,
                timestamp: r.timestamp,
            })
            .collect())
    }

    async fn list_state_transitions(&self, cluster: &Cluster) -> Result<Vec<StateTransition>> {
        let records = self
            .list_service_logs(cluster, Some(STATE_HISTORY_SEARCH.to_string()))
            .await
            .with_context(|| format!("failed to list state history of {}", cluster.id))?;
        Ok(records.iter().filter_map(transition_from_log).collect())
    }

    async fn get_organization_id(&self, cluster: &Cluster) -> Result<String> {
        let subscription_id = cluster
            .subscription_id
            .as_deref()
            .ok_or_else(|| ApiError::NotFound(format!("subscription of cluster {}", cluster.id)))?;
        let sub: SubscriptionRecord = self
            .get_json(&format!("/api/accounts_mgmt/v1/subscriptions/{subscription_id}"))
            .await?;
        Ok(sub.organization_id)
    }

    async fn is_access_protected(&self, cluster: &Cluster) -> Result<bool> {
        let response = self
            .request(Method::GET, "/api/access_transparency/v1/access_protection")
            .query(&[("clusterId", cluster.id.as_str())])
            .send()
            .await?;
        let status: AccessProtectionRecord = api::check(response, "access_protection")
            .await?
            .json()
            .await?;
        Ok(status.enabled)
    }
}

// =============================================================================
// API types (internal)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemList<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Enabled {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct NodesRecord {
    #[serde(default)]
    master: u32,
    #[serde(default)]
    infra: u32,
}

#[derive(Debug, Deserialize)]
struct AwsRecord {
    #[serde(default)]
    subnet_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterRecord {
    id: String,
    #[serde(default)]
    external_id: String,
    #[serde(default)]
    name: String,
    state: ClusterState,
    product: Option<IdRef>,
    ccs: Option<Enabled>,
    cloud_provider: Option<IdRef>,
    region: Option<IdRef>,
    hypershift: Option<Enabled>,
    infra_id: Option<String>,
    aws: Option<AwsRecord>,
    subscription: Option<IdRef>,
    nodes: Option<NodesRecord>,
}

impl ClusterRecord {
    fn into_cluster(self) -> Cluster {
        let product = match self.product.as_ref().map(|p| p.id.as_str()) {
            Some("osd") => Product::Osd,
            Some("rosa") => Product::Rosa,
            _ => Product::Unknown,
        };
        Cluster {
            id: self.id,
            external_id: self.external_id,
            name: self.name,
            state: self.state,
            product,
            ccs: self.ccs.is_some_and(|c| c.enabled),
            cloud_provider: self.cloud_provider.map(|c| c.id).unwrap_or_default(),
            region: self.region.map(|r| r.id).unwrap_or_default(),
            hypershift: self.hypershift.is_some_and(|h| h.enabled),
            infra_id: self.infra_id.filter(|id| !id.is_empty()),
            subnet_ids: self.aws.map(|a| a.subnet_ids).unwrap_or_default(),
            subscription_id: self.subscription.map(|s| s.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutoscalingRecord {
    min_replicas: u32,
    max_replicas: u32,
}

#[derive(Debug, Deserialize)]
struct MachinePoolRecord {
    replicas: Option<u32>,
    autoscaling: Option<AutoscalingRecord>,
}

#[derive(Debug, Deserialize)]
struct RestrictionRecord {
    id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    details: String,
}

#[derive(Debug, Serialize)]
struct NewRestriction<'a> {
    summary: &'a str,
    details: &'a str,
    detection_type: &'a str,
}

#[derive(Debug, Serialize)]
struct NewServiceLog<'a> {
    cluster_id: &'a str,
    cluster_uuid: &'a str,
    severity: AdvisorySeverity,
    service_name: &'a str,
    summary: &'a str,
    description: &'a str,
    internal_only: bool,
}

#[derive(Debug, Deserialize)]
struct ServiceLogRecord {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    log_type: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRecord {
    organization_id: String,
}

#[derive(Debug, Deserialize)]
struct AccessProtectionRecord {
    #[serde(default)]
    enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OcmClient {
        OcmClient::new(OcmConfig::new("secret").with_base_url(server.uri())).unwrap()
    }

    fn cluster_json() -> serde_json::Value {
        json!({
            "id": "c1",
            "external_id": "uuid-1",
            "name": "prod",
            "state": "ready",
            "product": {"id": "rosa"},
            "ccs": {"enabled": true},
            "cloud_provider": {"id": "aws"},
            "region": {"id": "eu-west-1"},
            "hypershift": {"enabled": false},
            "infra_id": "prod-x7k2p",
            "aws": {"subnet_ids": ["subnet-a"]},
            "subscription": {"id": "sub-1"},
            "nodes": {"master": 3, "infra": 2}
        })
    }

    #[tokio::test]
    async fn test_get_cluster_maps_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clusters_mgmt/v1/clusters/c1"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster_json()))
            .mount(&server)
            .await;

        let cluster = client(&server).get_cluster("c1").await.unwrap();
        assert_eq!(cluster.product, Product::Rosa);
        assert_eq!(cluster.state, ClusterState::Ready);
        assert!(cluster.ccs);
        assert_eq!(cluster.region, "eu-west-1");
        assert_eq!(cluster.infra_id.as_deref(), Some("prod-x7k2p"));
        assert_eq!(cluster.subnet_ids, vec!["subnet-a"]);
    }

    #[tokio::test]
    async fn test_get_cluster_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).get_cluster("missing").await.unwrap_err();
        assert!(err
            .chain()
            .any(|e| matches!(e.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_expected_node_count_sums_pools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clusters_mgmt/v1/clusters/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/clusters_mgmt/v1/clusters/c1/machine_pools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": "worker", "replicas": 3},
                    {"id": "scaled", "autoscaling": {"min_replicas": 2, "max_replicas": 6}}
                ]
            })))
            .mount(&server)
            .await;

        let ocm = client(&server);
        let cluster = ocm.get_cluster("c1").await.unwrap();
        let count = ocm.get_expected_node_count(&cluster).await.unwrap();
        assert_eq!(count, NodeCount { min: 10, max: 14 });
    }

    #[tokio::test]
    async fn test_post_restriction_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clusters_mgmt/v1/clusters/c1/limited_support_reasons"))
            .and(body_json(json!({
                "summary": "s",
                "details": "d",
                "detection_type": "auto"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .post_restriction("c1", &Restriction::new("s", "d"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_advisories_sends_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/service_logs/v1/clusters/uuid-1/cluster_logs"))
            .and(query_param("search", "log_type = 'cluster-state-updates'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "log-1",
                    "username": "service-account-cluster-triage",
                    "log_type": "cluster-state-updates",
                    "summary": "Cluster infrastructure stopped",
                    "description": "...",
                    "timestamp": "2024-05-01T10:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let ocm = client(&server);
        let cluster = fixture_cluster();
        let filter = AdvisoryFilter {
            log_type: Some("cluster-state-updates".to_string()),
            since: None,
        };
        let entries = ocm.list_advisories(&cluster, &filter).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].username, "service-account-cluster-triage");
    }

    #[tokio::test]
    async fn test_list_restrictions_without_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clusters_mgmt/v1/clusters/c1/limited_support_reasons"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "LimitedSupportReasonList"})))
            .mount(&server)
            .await;

        let restrictions = client(&server).list_restrictions("c1").await.unwrap();
        assert!(restrictions.is_empty());
    }

    #[test]
    fn test_search_expression() {
        assert_eq!(search_expression(&AdvisoryFilter::default()), None);
        let since = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let filter = AdvisoryFilter {
            log_type: Some("cluster-state-updates".to_string()),
            since: Some(since),
        };
        assert_eq!(
            search_expression(&filter).unwrap(),
            "log_type = 'cluster-state-updates' and timestamp >= '2024-05-01T00:00:00+00:00'"
        );
    }

    #[test]
    fn test_transition_from_log() {
        let record = |summary: &str| ServiceLogRecord {
            id: "x".to_string(),
            username: String::new(),
            log_type: String::new(),
            summary: summary.to_string(),
            description: String::new(),
            timestamp: Utc::now(),
        };
        assert_eq!(
            transition_from_log(&record("Cluster is hibernating")).unwrap().state,
            ClusterState::Hibernating
        );
        assert_eq!(
            transition_from_log(&record("Cluster resumed from hibernation")).unwrap().state,
            ClusterState::Resuming
        );
        assert!(transition_from_log(&record("Upgrade scheduled")).is_none());
    }

    fn fixture_cluster() -> Cluster {
        serde_json::from_value::<ClusterRecord>(cluster_json())
            .unwrap()
            .into_cluster()
    }
}
