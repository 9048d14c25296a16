//! Hive `ClusterDeployment` lookup.
//!
//! `ClusterDeployment` is a Hive CRD, so it is read as a [`DynamicObject`] and
//! the handful of fields triage needs are pulled out of `data`.

use anyhow::Result;
use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use thiserror::Error;
use tracing::debug;

use super::{ClusterDeployment, DeploymentLookup};

/// Label carrying the cluster management id on a `ClusterDeployment`.
const CLUSTER_ID_LABEL: &str = "api.openshift.com/id";

/// Errors from `ClusterDeployment` lookups.
#[derive(Debug, Error)]
pub enum HiveError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("no ClusterDeployment labelled for cluster {0}")]
    NotFound(String),

    #[error("{count} ClusterDeployments labelled for cluster {cluster_id}")]
    Ambiguous { cluster_id: String, count: usize },

    #[error("ClusterDeployment {name} has no {field}")]
    MissingField { name: String, field: &'static str },
}

fn cluster_deployment_api() -> ApiResource {
    ApiResource {
        group: "hive.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "hive.openshift.io/v1".to_string(),
        kind: "ClusterDeployment".to_string(),
        plural: "clusterdeployments".to_string(),
    }
}

/// Reads `ClusterDeployment` records from the Hive shard.
pub struct HiveClient {
    client: Client,
}

impl HiveClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

/// Extract the fields triage uses from a raw `ClusterDeployment`.
fn deployment_from_object(object: &DynamicObject) -> Result<ClusterDeployment, HiveError> {
    let name = object
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let spec = object.data.get("spec");

    let infra_id = spec
        .and_then(|s| s.get("clusterMetadata"))
        .and_then(|m| m.get("infraID"))
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HiveError::MissingField {
            name: name.clone(),
            field: "spec.clusterMetadata.infraID",
        })?
        .to_string();

    let installed = spec
        .and_then(|s| s.get("installed"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let power_state = spec
        .and_then(|s| s.get("powerState"))
        .and_then(|v| v.as_str())
        .map(ToString::to_string);

    Ok(ClusterDeployment {
        name,
        namespace: object.metadata.namespace.clone().unwrap_or_default(),
        infra_id,
        installed,
        power_state,
    })
}

#[async_trait]
impl DeploymentLookup for HiveClient {
    async fn get_cluster_deployment(&self, cluster_id: &str) -> Result<ClusterDeployment> {
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &cluster_deployment_api());
        let list = api
            .list(&ListParams::default().labels(&format!("{CLUSTER_ID_LABEL}={cluster_id}")))
            .await
            .map_err(HiveError::from)?;

        let object = match list.items.as_slice() {
            [] => return Err(HiveError::NotFound(cluster_id.to_string()).into()),
            [single] => single,
            items => {
                return Err(HiveError::Ambiguous {
                    cluster_id: cluster_id.to_string(),
                    count: items.len(),
                }
                .into())
            }
        };

        let deployment = deployment_from_object(object)?;
        debug!(
            cluster_id,
            namespace = %deployment.namespace,
            infra_id = %deployment.infra_id,
            "Found ClusterDeployment"
        );
        Ok(deployment)
    }
}
