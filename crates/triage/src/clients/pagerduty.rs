//! `PagerDuty` integration for incident handling.
//!
//! Uses the `PagerDuty` REST API v2 to annotate the incident that triggered a
//! run and to route it: escalating moves the incident to the human escalation
//! policy, silencing moves it to a policy that never pages.
//!
//! # Configuration
//!
//! - `PAGERDUTY_TOKEN`: REST API token
//! - `PAGERDUTY_FROM`: email of the account acting on incidents
//! - `PAGERDUTY_ESCALATION_POLICY`: policy id used to page a human
//! - `PAGERDUTY_SILENT_POLICY`: policy id used to suppress paging

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::api::{self, ApiError};
use super::IncidentPager;
use crate::alert::AlertStatus;

/// `PagerDuty` REST API endpoint.
const DEFAULT_API_URL: &str = "https://api.pagerduty.com";

/// `PagerDuty` client configuration.
#[derive(Debug, Clone)]
pub struct PagerDutyConfig {
    pub api_url: String,
    pub token: String,
    pub from_email: String,
    pub escalation_policy_id: String,
    pub silent_policy_id: String,
}

impl PagerDutyConfig {
    pub fn new(
        token: impl Into<String>,
        from_email: impl Into<String>,
        escalation_policy_id: impl Into<String>,
        silent_policy_id: impl Into<String>,
    ) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            from_email: from_email.into(),
            escalation_policy_id: escalation_policy_id.into(),
            silent_policy_id: silent_policy_id.into(),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// `PagerDuty` REST client.
#[derive(Debug, Clone)]
pub struct PagerDutyClient {
    config: PagerDutyConfig,
    client: reqwest::Client,
}

impl PagerDutyClient {
    pub fn new(config: PagerDutyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.api_url, path))
            .header("Authorization", format!("Token token={}", self.config.token))
            .header("Accept", "application/vnd.pagerduty+json;version=2")
            .header("From", &self.config.from_email)
    }

    async fn move_to_policy(&self, incident_id: &str, policy_id: &str) -> Result<(), ApiError> {
        let body = json!({
            "incident": {
                "type": "incident_reference",
                "escalation_policy": {
                    "id": policy_id,
                    "type": "escalation_policy_reference",
                }
            }
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/incidents/{incident_id}"))
            .json(&body)
            .send()
            .await?;
        api::check(response, incident_id).await?;
        Ok(())
    }
}

#[async_trait]
impl IncidentPager for PagerDutyClient {
    async fn add_note(&self, incident_id: &str, note: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("/incidents/{incident_id}/notes"))
            .json(&json!({ "note": { "content": note } }))
            .send()
            .await?;
        api::check(response, incident_id).await?;
        debug!(incident_id, "Added note to incident");
        Ok(())
    }

    async fn escalate(&self, incident_id: &str, reason: &str) -> Result<()> {
        self.move_to_policy(incident_id, &self.config.escalation_policy_id)
            .await
            .with_context(|| format!("failed to escalate incident {incident_id}"))?;
        info!(incident_id, reason, "Escalated incident");
        Ok(())
    }

    async fn silence(&self, incident_id: &str, reason: &str) -> Result<()> {
        self.move_to_policy(incident_id, &self.config.silent_policy_id)
            .await
            .with_context(|| format!("failed to silence incident {incident_id}"))?;
        info!(incident_id, reason, "Silenced incident");
        Ok(())
    }

    async fn get_cluster_id(&self, incident_id: &str) -> Result<String> {
        let response = self
            .request(reqwest::Method::GET, &format!("/incidents/{incident_id}/alerts"))
            .send()
            .await?;
        let alerts: AlertsResponse = api::check(response, incident_id).await?.json().await?;

        alerts
            .alerts
            .iter()
            .find_map(|a| a.body.as_ref()?.details.as_ref()?.cluster_id.clone())
            .ok_or_else(|| {
                ApiError::Unexpected(format!("no cluster_id in alerts of incident {incident_id}"))
                    .into()
            })
    }
}

// =============================================================================
// API types (internal)
// =============================================================================

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    alerts: Vec<IncidentAlert>,
}

#[derive(Debug, Deserialize)]
struct IncidentAlert {
    body: Option<AlertBody>,
}

#[derive(Debug, Deserialize)]
struct AlertBody {
    details: Option<AlertDetails>,
}

#[derive(Debug, Deserialize)]
struct AlertDetails {
    cluster_id: Option<String>,
}

// =============================================================================
// Webhooks
// =============================================================================

/// `PagerDuty` v3 webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerDutyWebhookPayload {
    pub event: PagerDutyWebhookEvent,
}

/// `PagerDuty` webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerDutyWebhookEvent {
    /// Event type (incident.triggered, incident.resolved, etc.)
    pub event_type: String,
    pub data: WebhookIncident,
}

/// Incident described by a webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookIncident {
    pub id: String,
    pub title: String,
}

impl PagerDutyWebhookPayload {
    /// Status implied by the event type, if it is one triage acts on.
    pub fn alert_status(&self) -> Option<AlertStatus> {
        match self.event.event_type.as_str() {
            "incident.triggered" | "incident.reopened" => Some(AlertStatus::Triggered),
            "incident.resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }
}
