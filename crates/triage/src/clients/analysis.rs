//! AI-assisted analysis endpoint.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api;

/// Context sent to the analysis agent.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub cluster_id: String,
    pub external_id: String,
    pub organization_id: Option<String>,
    pub alert_title: String,
    /// Notes gathered before the analysis call.
    pub notes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    summary: String,
}

/// Produces a free-text investigation summary for an alert.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String>;
}

/// Analysis agent reachable over HTTP.
pub struct HttpAnalysisAgent {
    client: Client,
    url: String,
}

impl HttpAnalysisAgent {
    /// Create a new agent client.
    ///
    /// No client-side timeout is set: callers bound the call themselves.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AnalysisAgent for HttpAnalysisAgent {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        debug!(cluster_id = %request.cluster_id, "Requesting analysis");
        let response = self.client.post(&self.url).json(request).send().await?;
        let response = api::check(response, "analysis").await?;
        let body: AnalysisResponse = response.json().await?;
        Ok(body.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            cluster_id: "c1".to_string(),
            external_id: "uuid".to_string(),
            organization_id: None,
            alert_title: "api down".to_string(),
            notes: vec![],
        }
    }

    #[tokio::test]
    async fn test_analyze_returns_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"cluster_id": "c1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"summary": "etcd is unhealthy"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let agent = HttpAnalysisAgent::new(server.uri()).unwrap();
        assert_eq!(agent.analyze(&request()).await.unwrap(), "etcd is unhealthy");
    }

    #[tokio::test]
    async fn test_analyze_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let agent = HttpAnalysisAgent::new(server.uri()).unwrap();
        let err = agent.analyze(&request()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
