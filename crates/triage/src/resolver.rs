//! Per-alert context resolution.
//!
//! An investigation declares the capabilities it needs as [`Requirements`];
//! [`Resolver::build`] fetches them and returns a populated [`AlertContext`].
//! Fetched values are memoized for the lifetime of the resolver, so retried
//! runs of the same alert do not refetch what already succeeded.
//!
//! Resolution failures are returned raw inside [`ResolveError`]. Callers decide
//! how to classify them; some inspect the message (revoked credentials look
//! different from a transient outage).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::alert::AlertEvent;
use crate::clients::{
    AnalysisAgent, CloudProvider, CloudProviderFactory, Cluster, ClusterDeployment,
    ClusterManager, DeploymentLookup, IncidentPager, NetworkVerifier,
};
use crate::config::TriageConfig;
use crate::metrics::MetricsRecorder;
use crate::notes::Notes;

/// Capabilities an investigation needs beyond the cluster record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub cluster_deployment: bool,
    pub cloud_provider: bool,
}

/// Long-lived collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub cluster_manager: Arc<dyn ClusterManager>,
    pub pager: Arc<dyn IncidentPager>,
    pub cloud_factory: Arc<dyn CloudProviderFactory>,
    pub deployments: Arc<dyn DeploymentLookup>,
    pub verifier: Arc<dyn NetworkVerifier>,
    pub analysis: Option<Arc<dyn AnalysisAgent>>,
    pub metrics: Arc<dyn MetricsRecorder>,
}

/// Which sub-resource could not be resolved. The source is kept unclassified.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not retrieve cluster {cluster_id}")]
    Cluster {
        cluster_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not retrieve cluster deployment for {cluster_id}")]
    ClusterDeployment {
        cluster_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not build cloud provider client for {cluster_id}")]
    CloudProvider {
        cluster_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ResolveError {
    /// The underlying failure, as returned by the collaborator.
    pub fn raw(&self) -> &anyhow::Error {
        match self {
            Self::Cluster { source, .. }
            | Self::ClusterDeployment { source, .. }
            | Self::CloudProvider { source, .. } => source,
        }
    }
}

/// Everything one investigation run works with. Owned by that run.
pub struct AlertContext {
    pub alert: AlertEvent,
    pub investigation: &'static str,
    pub cluster: Arc<Cluster>,
    pub cluster_deployment: Option<Arc<ClusterDeployment>>,
    cloud: Option<Arc<dyn CloudProvider>>,
    pub cluster_manager: Arc<dyn ClusterManager>,
    pub pager: Arc<dyn IncidentPager>,
    pub verifier: Arc<dyn NetworkVerifier>,
    pub analysis: Option<Arc<dyn AnalysisAgent>>,
    pub metrics: Arc<dyn MetricsRecorder>,
    pub config: Arc<TriageConfig>,
    pub notes: Notes,
}

impl AlertContext {
    /// Cloud provider client. Only present when it was requested.
    pub fn cloud_provider(&self) -> Result<Arc<dyn CloudProvider>> {
        self.cloud
            .clone()
            .ok_or_else(|| anyhow!("{} did not request a cloud provider", self.investigation))
    }

    /// Infrastructure id from the deployment record, falling back to the
    /// cluster record.
    pub fn infra_id(&self) -> Result<String> {
        self.cluster_deployment
            .as_ref()
            .map(|cd| cd.infra_id.clone())
            .or_else(|| self.cluster.infra_id.clone())
            .ok_or_else(|| anyhow!("no infrastructure id known for cluster {}", self.cluster.id))
    }
}

/// Resolves and memoizes the context of one alert.
pub struct Resolver {
    alert: AlertEvent,
    services: Services,
    config: Arc<TriageConfig>,
    cluster: OnceCell<Arc<Cluster>>,
    cluster_deployment: OnceCell<Arc<ClusterDeployment>>,
    cloud: OnceCell<Arc<dyn CloudProvider>>,
}

impl Resolver {
    pub fn new(alert: AlertEvent, services: Services, config: Arc<TriageConfig>) -> Self {
        Self {
            alert,
            services,
            config,
            cluster: OnceCell::new(),
            cluster_deployment: OnceCell::new(),
            cloud: OnceCell::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The cluster record, if it has been fetched already.
    pub fn cached_cluster(&self) -> Option<Arc<Cluster>> {
        self.cluster.get().cloned()
    }

    pub async fn cluster(&self) -> Result<Arc<Cluster>, ResolveError> {
        let cluster_id = &self.alert.cluster_id;
        self.cluster
            .get_or_try_init(|| async {
                debug!(cluster_id = %cluster_id, "Resolving cluster");
                self.services
                    .cluster_manager
                    .get_cluster(cluster_id)
                    .await
                    .map(Arc::new)
                    .map_err(|source| ResolveError::Cluster {
                        cluster_id: cluster_id.clone(),
                        source,
                    })
            })
            .await
            .cloned()
    }

    pub async fn cluster_deployment(&self) -> Result<Arc<ClusterDeployment>, ResolveError> {
        let cluster = self.cluster().await?;
        self.cluster_deployment
            .get_or_try_init(|| async {
                debug!(cluster_id = %cluster.id, "Resolving cluster deployment");
                self.services
                    .deployments
                    .get_cluster_deployment(&cluster.id)
                    .await
                    .map(Arc::new)
                    .map_err(|source| ResolveError::ClusterDeployment {
                        cluster_id: cluster.id.clone(),
                        source,
                    })
            })
            .await
            .cloned()
    }

    pub async fn cloud_provider(&self) -> Result<Arc<dyn CloudProvider>, ResolveError> {
        let cluster = self.cluster().await?;
        self.cloud
            .get_or_try_init(|| async {
                debug!(cluster_id = %cluster.id, "Resolving cloud provider");
                self.services
                    .cloud_factory
                    .for_cluster(&cluster)
                    .await
                    .map_err(|source| ResolveError::CloudProvider {
                        cluster_id: cluster.id.clone(),
                        source,
                    })
            })
            .await
            .cloned()
    }

    /// Resolve everything `requirements` asks for into a fresh context.
    pub async fn build(
        &self,
        investigation: &'static str,
        requirements: Requirements,
    ) -> Result<AlertContext, ResolveError> {
        let cluster = self.cluster().await?;
        let cluster_deployment = if requirements.cluster_deployment {
            Some(self.cluster_deployment().await?)
        } else {
            None
        };
        let cloud = if requirements.cloud_provider {
            Some(self.cloud_provider().await?)
        } else {
            None
        };

        Ok(AlertContext {
            alert: self.alert.clone(),
            investigation,
            cluster,
            cluster_deployment,
            cloud,
            cluster_manager: Arc::clone(&self.services.cluster_manager),
            pager: Arc::clone(&self.services.pager),
            verifier: Arc::clone(&self.services.verifier),
            analysis: self.services.analysis.clone(),
            metrics: Arc::clone(&self.services.metrics),
            config: Arc::clone(&self.config),
            notes: Notes::new(investigation),
        })
    }
}
