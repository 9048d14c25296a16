//! Alert handling loop.
//!
//! [`Triage::handle`] dispatches an alert to its investigation, retries the
//! whole run on infrastructure failures and applies the resulting
//! [`Conclusion`]. Anything that cannot be concluded automatically is noted on
//! the incident and escalated.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::actions::{Conclusion, Executor};
use crate::alert::AlertEvent;
use crate::clients::Cluster;
use crate::config::TriageConfig;
use crate::error::{as_infrastructure, is_infrastructure};
use crate::investigations::{ccam, Investigation, Registry};
use crate::notes::Notes;
use crate::resolver::{AlertContext, Requirements, Resolver, Services};

/// Name used for alerts no investigation matched.
pub const UNMATCHED: &str = "unmatched";

/// How a handled alert ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The investigation concluded and every action was applied.
    Concluded,
    /// No investigation matched the alert; it was escalated.
    Unmatched,
    /// The investigation kept failing; it was escalated.
    InvestigationFailed,
    /// Applying the conclusion failed; it was escalated.
    ExecutionFailed,
}

/// Result of handling one alert.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub investigation: &'static str,
    pub status: OutcomeStatus,
    /// What was actually applied to the incident.
    pub conclusion: Conclusion,
}

/// Dispatches alerts to investigations.
pub struct Triage {
    services: Services,
    config: Arc<TriageConfig>,
    registry: Registry,
}

impl Triage {
    pub fn new(services: Services, config: TriageConfig) -> Self {
        let registry = Registry::standard(config.experimental_enabled);
        Self {
            services,
            config: Arc::new(config),
            registry,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Investigate `alert` and apply the conclusion.
    ///
    /// Only fails when the incident could not even be escalated.
    pub async fn handle(&self, alert: AlertEvent) -> Result<Outcome> {
        info!(
            incident_id = %alert.incident_id,
            cluster_id = %alert.cluster_id,
            title = %alert.title,
            status = ?alert.status,
            "Handling alert"
        );

        let Some(investigation) = self.registry.find(&alert.title) else {
            return self.unmatched(&alert).await;
        };
        let name = investigation.name();
        self.services.metrics.alert_handled(name);
        info!(incident_id = %alert.incident_id, investigation = name, "Dispatching investigation");

        let resolver = Resolver::new(alert.clone(), self.services.clone(), Arc::clone(&self.config));
        let metrics = Arc::clone(&self.services.metrics);
        let attempt = self
            .config
            .retry
            .with_retries_if(
                name,
                |e| {
                    let retry = is_infrastructure(e);
                    if retry {
                        metrics.infrastructure_retry(name);
                    }
                    retry
                },
                || self.investigate(investigation, &resolver),
            )
            .await;

        let (ctx, conclusion) = match attempt {
            Ok(concluded) => concluded,
            Err(e) => return self.investigation_failed(&alert, name, &resolver, &e).await,
        };

        info!(
            incident_id = %alert.incident_id,
            investigation = name,
            actions = ?conclusion.shape(),
            "Investigation concluded"
        );
        match Executor::for_context(&ctx).execute(&conclusion).await {
            Ok(()) => Ok(Outcome {
                investigation: name,
                status: OutcomeStatus::Concluded,
                conclusion,
            }),
            Err(e) => self.execution_failed(&ctx, &e).await,
        }
    }

    /// One attempt: resolve the context and walk the decision tree.
    async fn investigate(
        &self,
        investigation: Investigation,
        resolver: &Resolver,
    ) -> Result<(AlertContext, Conclusion)> {
        let name = investigation.name();
        let err = match resolver.build(name, investigation.requirements()).await {
            Ok(mut ctx) => {
                let conclusion = investigation.run(&mut ctx).await?;
                return Ok((ctx, conclusion));
            }
            Err(err) => err,
        };

        if !ccam::credentials_revoked(&err) {
            return Err(as_infrastructure(err, "could not resolve alert context"));
        }
        warn!(investigation = name, "Cloud credentials revoked: {:#}", err.raw());
        let mut ctx = resolver
            .build(name, Requirements::default())
            .await
            .map_err(|e| as_infrastructure(e, "could not resolve alert context"))?;
        let conclusion = ccam::conclude(&mut ctx, &err);
        Ok((ctx, conclusion))
    }

    async fn unmatched(&self, alert: &AlertEvent) -> Result<Outcome> {
        info!(incident_id = %alert.incident_id, title = %alert.title, "No investigation matches alert");
        self.services.metrics.alert_handled(UNMATCHED);

        let mut notes = Notes::new(UNMATCHED);
        notes.append_info(format!("No automated investigation exists for \"{}\"", alert.title));
        let conclusion = Conclusion::builder(&notes).escalate("no automated investigation available");
        self.executor(alert, UNMATCHED, None)
            .execute(&conclusion)
            .await
            .with_context(|| format!("failed to escalate incident {}", alert.incident_id))?;

        Ok(Outcome {
            investigation: UNMATCHED,
            status: OutcomeStatus::Unmatched,
            conclusion,
        })
    }

    async fn investigation_failed(
        &self,
        alert: &AlertEvent,
        investigation: &'static str,
        resolver: &Resolver,
        err: &anyhow::Error,
    ) -> Result<Outcome> {
        error!(
            incident_id = %alert.incident_id,
            investigation,
            "Investigation failed: {err:#}"
        );

        let mut notes = Notes::new(investigation);
        notes.append_warning(format!(
            "Investigation failed after {} attempts: {err:#}",
            self.config.retry.max_attempts.max(1)
        ));
        let conclusion = Conclusion::builder(&notes).escalate("automated investigation failed");
        let cluster = resolver.cached_cluster();
        self.executor(alert, investigation, cluster.as_deref())
            .execute(&conclusion)
            .await
            .with_context(|| format!("failed to escalate incident {}", alert.incident_id))?;

        Ok(Outcome {
            investigation,
            status: OutcomeStatus::InvestigationFailed,
            conclusion,
        })
    }

    async fn execution_failed(&self, ctx: &AlertContext, err: &anyhow::Error) -> Result<Outcome> {
        error!(
            incident_id = %ctx.alert.incident_id,
            investigation = ctx.investigation,
            "Applying conclusion failed: {err:#}"
        );

        let mut notes = Notes::new(ctx.investigation);
        notes.append_warning(format!("Automated remediation failed: {err:#}"));
        let conclusion = Conclusion::builder(&notes).escalate("automated remediation failed");
        self.executor(&ctx.alert, ctx.investigation, Some(&ctx.cluster))
            .execute(&conclusion)
            .await
            .with_context(|| format!("failed to escalate incident {}", ctx.alert.incident_id))?;

        Ok(Outcome {
            investigation: ctx.investigation,
            status: OutcomeStatus::ExecutionFailed,
            conclusion,
        })
    }

    fn executor<'a>(
        &'a self,
        alert: &'a AlertEvent,
        investigation: &'a str,
        cluster: Option<&'a Cluster>,
    ) -> Executor<'a> {
        Executor {
            incident_id: &alert.incident_id,
            investigation,
            cluster,
            pager: self.services.pager.as_ref(),
            cluster_manager: self.services.cluster_manager.as_ref(),
            metrics: self.services.metrics.as_ref(),
            retry: &self.config.retry,
        }
    }
}
