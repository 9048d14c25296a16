//! In-memory collaborators and fixtures for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::alert::{AlertEvent, AlertStatus};
use crate::clients::{
    Advisory, AdvisoryEntry, AdvisoryFilter, AnalysisAgent, AnalysisRequest, AuditEvent,
    CloudProvider, CloudProviderFactory, Cluster, ClusterDeployment, ClusterManager,
    ClusterState, DeploymentLookup, EgressTarget, IncidentPager, Instance, InstanceState,
    NetworkVerifier, NodeCount, Product, Restriction, RouteTable, StateTransition,
    VerifierOutcome, RESTRICTION_CHANGE_LOG_TYPE,
};
use crate::config::TriageConfig;
use crate::metrics::AtomicMetrics;
use crate::resolver::{AlertContext, Requirements, Resolver, Services};
use crate::retry::{Backoff, RetryPolicy};
use crate::runner::Triage;

// ============================================================================
// Fixtures
// ============================================================================

pub fn cluster() -> Cluster {
    Cluster {
        id: "c1".to_string(),
        external_id: "uuid-1".to_string(),
        name: "prod".to_string(),
        state: ClusterState::Ready,
        product: Product::Rosa,
        ccs: true,
        cloud_provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        hypershift: false,
        infra_id: Some("prod-x7k2p".to_string()),
        subnet_ids: Vec::new(),
        subscription_id: Some("sub-1".to_string()),
    }
}

pub fn alert(title: &str) -> AlertEvent {
    AlertEvent {
        incident_id: "Q1".to_string(),
        title: title.to_string(),
        status: AlertStatus::Triggered,
        cluster_id: "c1".to_string(),
    }
}

pub fn resolved_alert() -> AlertEvent {
    AlertEvent {
        status: AlertStatus::Resolved,
        ..alert("cluster has gone missing")
    }
}

pub fn instance(id: &str, state: InstanceState) -> Instance {
    Instance {
        id: id.to_string(),
        state,
        instance_type: Some("m5.xlarge".to_string()),
    }
}

/// A `StopInstances` event with a 1.08 payload.
pub fn stop_event(event_id: &str, username: &str, issuer_username: &str) -> AuditEvent {
    let payload = json!({
        "eventVersion": "1.08",
        "userIdentity": {
            "type": "AssumedRole",
            "userName": username,
            "sessionContext": {
                "sessionIssuer": {"type": "Role", "userName": issuer_username}
            }
        }
    });
    AuditEvent {
        event_id: event_id.to_string(),
        event_name: "StopInstances".to_string(),
        event_time: Utc::now(),
        username: Some(username.to_string()),
        payload: payload.to_string(),
    }
}

pub fn history_entry(username: &str, summary: &str, timestamp: DateTime<Utc>) -> AdvisoryEntry {
    AdvisoryEntry {
        id: format!("log-{}", timestamp.timestamp()),
        username: username.to_string(),
        log_type: RESTRICTION_CHANGE_LOG_TYPE.to_string(),
        summary: summary.to_string(),
        description: String::new(),
        timestamp,
    }
}

/// Take one pending failure from `counter`, if any.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// Cluster management
// ============================================================================

pub struct FakeClusterManager {
    cluster: Mutex<Option<Cluster>>,
    restrictions: Mutex<Vec<Restriction>>,
    advisories: Mutex<Vec<Advisory>>,
    history: Mutex<Vec<AdvisoryEntry>>,
    transitions: Mutex<Vec<StateTransition>>,
    deleted: Mutex<Vec<String>>,
    access_protected: Mutex<bool>,
    node_count: NodeCount,
    next_id: AtomicU32,
    cluster_fetches: AtomicU32,
    cluster_failures: AtomicU32,
    post_failures: AtomicU32,
}

impl FakeClusterManager {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster: Mutex::new(Some(cluster)),
            restrictions: Mutex::default(),
            advisories: Mutex::default(),
            history: Mutex::default(),
            transitions: Mutex::default(),
            deleted: Mutex::default(),
            access_protected: Mutex::new(false),
            node_count: NodeCount { min: 5, max: 8 },
            next_id: AtomicU32::new(1),
            cluster_fetches: AtomicU32::new(0),
            cluster_failures: AtomicU32::new(0),
            post_failures: AtomicU32::new(0),
        }
    }

    pub fn update_cluster(&self, update: impl FnOnce(&mut Cluster)) {
        if let Some(cluster) = self.cluster.lock().unwrap().as_mut() {
            update(cluster);
        }
    }

    pub fn remove_cluster(&self) {
        *self.cluster.lock().unwrap() = None;
    }

    pub fn fail_cluster_fetches(&self, times: u32) {
        self.cluster_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_restriction_posts(&self, times: u32) {
        self.post_failures.store(times, Ordering::SeqCst);
    }

    pub fn cluster_fetches(&self) -> u32 {
        self.cluster_fetches.load(Ordering::SeqCst)
    }

    pub fn add_restriction(&self, mut restriction: Restriction) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        restriction.id = Some(format!("lsr-{id}"));
        self.restrictions.lock().unwrap().push(restriction);
    }

    pub fn restrictions(&self) -> Vec<Restriction> {
        self.restrictions.lock().unwrap().clone()
    }

    pub fn advisories(&self) -> Vec<Advisory> {
        self.advisories.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn add_history(&self, entry: AdvisoryEntry) {
        self.history.lock().unwrap().push(entry);
    }

    /// Hibernated three days ago, resumed `ago` before now.
    pub fn set_transitions_resumed(&self, ago: chrono::Duration) {
        let now = Utc::now();
        *self.transitions.lock().unwrap() = vec![
            StateTransition {
                state: ClusterState::Hibernating,
                timestamp: now - chrono::Duration::days(3),
            },
            StateTransition {
                state: ClusterState::Resuming,
                timestamp: now - ago,
            },
        ];
    }

    pub fn set_access_protected(&self, enabled: bool) {
        *self.access_protected.lock().unwrap() = enabled;
    }
}

#[async_trait]
impl ClusterManager for FakeClusterManager {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.cluster_fetches.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.cluster_failures) {
            bail!("cluster management API unavailable");
        }
        self.cluster
            .lock()
            .unwrap()
            .clone()
            .filter(|c| c.id == cluster_id)
            .ok_or_else(|| anyhow!("cluster {cluster_id} not found"))
    }

    async fn get_expected_node_count(&self, _cluster: &Cluster) -> Result<NodeCount> {
        Ok(self.node_count)
    }

    async fn list_restrictions(&self, _cluster_id: &str) -> Result<Vec<Restriction>> {
        Ok(self.restrictions())
    }

    async fn post_restriction(&self, _cluster_id: &str, restriction: &Restriction) -> Result<()> {
        if take_failure(&self.post_failures) {
            bail!("restriction endpoint unavailable");
        }
        self.add_restriction(restriction.clone());
        Ok(())
    }

    async fn delete_restriction(&self, _cluster_id: &str, restriction_id: &str) -> Result<()> {
        self.restrictions
            .lock()
            .unwrap()
            .retain(|r| r.id.as_deref() != Some(restriction_id));
        self.deleted.lock().unwrap().push(restriction_id.to_string());
        Ok(())
    }

    async fn post_advisory(&self, _cluster: &Cluster, advisory: &Advisory) -> Result<()> {
        self.advisories.lock().unwrap().push(advisory.clone());
        Ok(())
    }

    async fn list_advisories(
        &self,
        _cluster: &Cluster,
        filter: &AdvisoryFilter,
    ) -> Result<Vec<AdvisoryEntry>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.log_type.as_deref().map_or(true, |t| e.log_type == t))
            .cloned()
            .collect())
    }

    async fn list_state_transitions(&self, _cluster: &Cluster) -> Result<Vec<StateTransition>> {
        Ok(self.transitions.lock().unwrap().clone())
    }

    async fn get_organization_id(&self, _cluster: &Cluster) -> Result<String> {
        Ok("org-1".to_string())
    }

    async fn is_access_protected(&self, _cluster: &Cluster) -> Result<bool> {
        Ok(*self.access_protected.lock().unwrap())
    }
}

// ============================================================================
// Incident paging
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerCall {
    Note(String),
    Escalate(String),
    Silence(String),
}

#[derive(Default)]
pub struct FakePager {
    calls: Mutex<Vec<PagerCall>>,
}

impl FakePager {
    pub fn calls(&self) -> Vec<PagerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PagerCall::Note(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn escalated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PagerCall::Escalate(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn silenced(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PagerCall::Silence(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl IncidentPager for FakePager {
    async fn add_note(&self, _incident_id: &str, note: &str) -> Result<()> {
        self.calls.lock().unwrap().push(PagerCall::Note(note.to_string()));
        Ok(())
    }

    async fn escalate(&self, _incident_id: &str, reason: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(PagerCall::Escalate(reason.to_string()));
        Ok(())
    }

    async fn silence(&self, _incident_id: &str, reason: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(PagerCall::Silence(reason.to_string()));
        Ok(())
    }

    async fn get_cluster_id(&self, _incident_id: &str) -> Result<String> {
        Ok("c1".to_string())
    }
}

// ============================================================================
// Cloud provider
// ============================================================================

pub struct FakeCloud {
    non_running: Mutex<Vec<Instance>>,
    running: Mutex<usize>,
    events: Mutex<Vec<AuditEvent>>,
    subnets: Mutex<Vec<String>>,
    route_tables: Mutex<Vec<RouteTable>>,
    instance_failures: AtomicU32,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            non_running: Mutex::default(),
            running: Mutex::new(6),
            events: Mutex::default(),
            subnets: Mutex::new(vec!["subnet-a".to_string()]),
            route_tables: Mutex::default(),
            instance_failures: AtomicU32::new(0),
        }
    }
}

impl FakeCloud {
    pub fn set_non_running(&self, instances: Vec<Instance>) {
        *self.non_running.lock().unwrap() = instances;
    }

    pub fn set_running(&self, count: usize) {
        *self.running.lock().unwrap() = count;
    }

    pub fn set_events(&self, events: Vec<AuditEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_subnets(&self, subnets: Vec<String>) {
        *self.subnets.lock().unwrap() = subnets;
    }

    pub fn set_route_tables(&self, tables: Vec<RouteTable>) {
        *self.route_tables.lock().unwrap() = tables;
    }

    /// Fail the next `times` non-running instance queries.
    pub fn fail_instance_queries(&self, times: u32) {
        self.instance_failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn list_non_running_instances(&self, _infra_id: &str) -> Result<Vec<Instance>> {
        if take_failure(&self.instance_failures) {
            bail!("RequestLimitExceeded");
        }
        Ok(self.non_running.lock().unwrap().clone())
    }

    async fn list_running_instances(&self, _infra_id: &str) -> Result<Vec<Instance>> {
        let count = *self.running.lock().unwrap();
        Ok((0..count)
            .map(|n| instance(&format!("i-run-{n}"), InstanceState::Running))
            .collect())
    }

    async fn lookup_stop_events(
        &self,
        _instance_ids: &[String],
        _since: DateTime<Utc>,
        _max_results: usize,
    ) -> Result<Vec<AuditEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn route_tables(&self, _subnet_id: &str) -> Result<Vec<RouteTable>> {
        Ok(self.route_tables.lock().unwrap().clone())
    }

    async fn subnet_ids(&self, _infra_id: &str) -> Result<Vec<String>> {
        Ok(self.subnets.lock().unwrap().clone())
    }

    async fn security_group_id(&self, infra_id: &str) -> Result<String> {
        Ok(format!("sg-{infra_id}"))
    }
}

pub struct FakeCloudFactory {
    cloud: Arc<FakeCloud>,
    failure: Mutex<Option<String>>,
    builds: AtomicU32,
}

impl FakeCloudFactory {
    pub fn new(cloud: Arc<FakeCloud>) -> Self {
        Self {
            cloud,
            failure: Mutex::new(None),
            builds: AtomicU32::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProviderFactory for FakeCloudFactory {
    async fn for_cluster(&self, _cluster: &Cluster) -> Result<Arc<dyn CloudProvider>> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            bail!(message);
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.cloud) as Arc<dyn CloudProvider>)
    }
}

// ============================================================================
// Deployments, verifier, analysis
// ============================================================================

pub struct FakeDeployments;

#[async_trait]
impl DeploymentLookup for FakeDeployments {
    async fn get_cluster_deployment(&self, cluster_id: &str) -> Result<ClusterDeployment> {
        Ok(ClusterDeployment {
            name: "prod".to_string(),
            namespace: format!("uhc-production-{cluster_id}"),
            infra_id: "prod-x7k2p".to_string(),
            installed: true,
            power_state: Some("Running".to_string()),
        })
    }
}

pub struct FakeVerifier {
    outcome: Mutex<Result<VerifierOutcome, String>>,
    calls: AtomicU32,
}

impl Default for FakeVerifier {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(Ok(VerifierOutcome::Success)),
            calls: AtomicU32::new(0),
        }
    }
}

impl FakeVerifier {
    pub fn set(&self, outcome: Result<VerifierOutcome, String>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkVerifier for FakeVerifier {
    async fn verify_egress(&self, _target: &EgressTarget) -> Result<VerifierOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

pub struct FakeAnalysis {
    reply: Result<String, String>,
    delay: Duration,
}

#[async_trait]
impl AnalysisAgent for FakeAnalysis {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Fakes wired together the way the binary wires the real clients.
pub struct Harness {
    pub cluster_manager: Arc<FakeClusterManager>,
    pub pager: Arc<FakePager>,
    pub cloud: Arc<FakeCloud>,
    pub cloud_factory: Arc<FakeCloudFactory>,
    pub verifier: Arc<FakeVerifier>,
    pub analysis: Option<Arc<FakeAnalysis>>,
    pub metrics: Arc<AtomicMetrics>,
    pub config: TriageConfig,
}

impl Harness {
    pub fn new() -> Self {
        let cloud = Arc::new(FakeCloud::default());
        Self {
            cluster_manager: Arc::new(FakeClusterManager::new(cluster())),
            pager: Arc::new(FakePager::default()),
            cloud_factory: Arc::new(FakeCloudFactory::new(Arc::clone(&cloud))),
            cloud,
            verifier: Arc::new(FakeVerifier::default()),
            analysis: None,
            metrics: Arc::new(AtomicMetrics::new()),
            config: TriageConfig {
                retry: RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)),
                ..TriageConfig::default()
            },
        }
    }

    pub fn with_analysis(mut self, reply: Result<String, String>, delay: Duration) -> Self {
        self.analysis = Some(Arc::new(FakeAnalysis { reply, delay }));
        self
    }

    pub fn services(&self) -> Services {
        Services {
            cluster_manager: self.cluster_manager.clone(),
            pager: self.pager.clone(),
            cloud_factory: self.cloud_factory.clone(),
            deployments: Arc::new(FakeDeployments),
            verifier: self.verifier.clone(),
            analysis: self
                .analysis
                .clone()
                .map(|a| a as Arc<dyn AnalysisAgent>),
            metrics: self.metrics.clone(),
        }
    }

    pub fn resolver(&self, alert: AlertEvent) -> Resolver {
        Resolver::new(alert, self.services(), Arc::new(self.config.clone()))
    }

    pub async fn context(&self, alert: AlertEvent, requirements: Requirements) -> AlertContext {
        match self.resolver(alert).build("test", requirements).await {
            Ok(ctx) => ctx,
            Err(e) => panic!("context resolution failed: {e:#}"),
        }
    }

    pub fn triage(&self) -> Triage {
        Triage::new(self.services(), self.config.clone())
    }
}
