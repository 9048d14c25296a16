//! Remediation actions and their execution.
//!
//! A decision tree returns a [`Conclusion`]: the rendered note, any side
//! actions (restriction, advisory) and exactly one terminal action
//! (escalate or silence). [`ConclusionBuilder`] only hands out a
//! `Conclusion` from its terminal methods, so a conclusion without a
//! terminal action cannot be built.

use anyhow::{bail, Context as _, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::clients::{
    Advisory, AdvisorySeverity, Cluster, ClusterManager, IncidentPager, Restriction,
};
use crate::metrics::MetricsRecorder;
use crate::notes::Notes;
use crate::resolver::AlertContext;
use crate::retry::RetryPolicy;

/// Restriction to set on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestrictionAction {
    pub summary: String,
    pub details: String,
    /// Short label used in notes and logs.
    pub context_label: String,
}

impl RestrictionAction {
    pub fn new(
        summary: impl Into<String>,
        details: impl Into<String>,
        context_label: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            details: details.into(),
            context_label: context_label.into(),
        }
    }

    pub fn build(&self) -> Restriction {
        Restriction::new(&self.summary, &self.details)
    }
}

/// Customer-facing advisory to attach to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvisoryAction {
    pub severity: AdvisorySeverity,
    pub summary: String,
    pub description: String,
    /// Routing tag for the advisory system.
    pub service_tag: String,
}

impl AdvisoryAction {
    pub fn build(&self) -> Advisory {
        Advisory {
            severity: self.severity,
            summary: self.summary.clone(),
            description: self.description.clone(),
            service_name: self.service_tag.clone(),
            internal_only: false,
        }
    }
}

/// One remediation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Note { text: String },
    Escalate { reason: String },
    Silence { reason: String },
    Restrict(RestrictionAction),
    Advise(AdvisoryAction),
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalate { .. } | Self::Silence { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Note { .. } => "note",
            Self::Escalate { .. } => "escalate",
            Self::Silence { .. } => "silence",
            Self::Restrict(_) => "restrict",
            Self::Advise(_) => "advise",
        }
    }
}

/// Ordered actions produced by one decision tree run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conclusion {
    actions: Vec<Action>,
    restriction_set: bool,
    advisory_sent: bool,
}

impl Conclusion {
    /// Start a conclusion carrying the current contents of `notes`.
    pub fn builder(notes: &Notes) -> ConclusionBuilder {
        ConclusionBuilder {
            note: notes.render(),
            side_actions: Vec::new(),
        }
    }

    /// Note, side actions, then the terminal action.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn terminal(&self) -> &Action {
        // Builders always push the terminal action last.
        &self.actions[self.actions.len() - 1]
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self.terminal(), Action::Escalate { .. })
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.terminal(), Action::Silence { .. })
    }

    pub fn restriction_set(&self) -> bool {
        self.restriction_set
    }

    pub fn advisory_sent(&self) -> bool {
        self.advisory_sent
    }

    /// Action kinds in order, e.g. `["note", "restrict", "silence"]`.
    pub fn shape(&self) -> Vec<&'static str> {
        self.actions.iter().map(Action::label).collect()
    }
}

/// Collects side actions until a terminal action is chosen.
#[derive(Debug)]
#[must_use = "a conclusion needs a terminal action"]
pub struct ConclusionBuilder {
    note: String,
    side_actions: Vec<Action>,
}

impl ConclusionBuilder {
    pub fn restrict(mut self, restriction: RestrictionAction) -> Self {
        self.side_actions.push(Action::Restrict(restriction));
        self
    }

    pub fn advise(mut self, advisory: AdvisoryAction) -> Self {
        self.side_actions.push(Action::Advise(advisory));
        self
    }

    /// Hand the incident to a human.
    pub fn escalate(self, reason: impl Into<String>) -> Conclusion {
        self.finish(Action::Escalate {
            reason: reason.into(),
        })
    }

    /// Suppress paging for the incident.
    pub fn silence(self, reason: impl Into<String>) -> Conclusion {
        self.finish(Action::Silence {
            reason: reason.into(),
        })
    }

    fn finish(self, terminal: Action) -> Conclusion {
        let restriction_set = self
            .side_actions
            .iter()
            .any(|a| matches!(a, Action::Restrict(_)));
        let advisory_sent = self
            .side_actions
            .iter()
            .any(|a| matches!(a, Action::Advise(_)));

        let mut actions = Vec::with_capacity(self.side_actions.len() + 2);
        actions.push(Action::Note { text: self.note });
        actions.extend(self.side_actions);
        actions.push(terminal);

        Conclusion {
            actions,
            restriction_set,
            advisory_sent,
        }
    }
}

/// Post `restriction` unless one with the same summary and details exists.
///
/// Returns whether a new restriction was posted.
pub async fn ensure_restriction(
    cluster_manager: &dyn ClusterManager,
    cluster_id: &str,
    restriction: &Restriction,
) -> Result<bool> {
    let existing = cluster_manager.list_restrictions(cluster_id).await?;
    if existing.iter().any(|r| r.same_reason(restriction)) {
        debug!(cluster_id, summary = %restriction.summary, "Restriction already set");
        return Ok(false);
    }
    cluster_manager.post_restriction(cluster_id, restriction).await?;
    Ok(true)
}

/// Applies a [`Conclusion`] to the incident and the cluster.
pub struct Executor<'a> {
    pub incident_id: &'a str,
    pub investigation: &'a str,
    /// Needed for restrictions and advisories.
    pub cluster: Option<&'a Cluster>,
    pub pager: &'a dyn IncidentPager,
    pub cluster_manager: &'a dyn ClusterManager,
    pub metrics: &'a dyn MetricsRecorder,
    pub retry: &'a RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn for_context(ctx: &'a AlertContext) -> Self {
        Self {
            incident_id: &ctx.alert.incident_id,
            investigation: ctx.investigation,
            cluster: Some(&ctx.cluster),
            pager: ctx.pager.as_ref(),
            cluster_manager: ctx.cluster_manager.as_ref(),
            metrics: ctx.metrics.as_ref(),
            retry: &ctx.config.retry,
        }
    }

    fn cluster(&self, action: &Action) -> Result<&'a Cluster> {
        match self.cluster {
            Some(cluster) => Ok(cluster),
            None => bail!("cannot {} without a resolved cluster", action.label()),
        }
    }

    /// Apply every action in order, stopping at the first failure.
    pub async fn execute(&self, conclusion: &Conclusion) -> Result<()> {
        for action in conclusion.actions() {
            self.apply(action)
                .await
                .with_context(|| format!("failed to {}", action.label()))?;
        }
        Ok(())
    }

    async fn apply(&self, action: &Action) -> Result<()> {
        match action {
            Action::Note { text } => {
                self.pager.add_note(self.incident_id, text).await?;
            }
            Action::Restrict(restriction) => {
                let cluster = self.cluster(action)?;
                let restriction = restriction.build();
                let posted = self
                    .retry
                    .with_retries("set restriction", || {
                        ensure_restriction(self.cluster_manager, &cluster.id, &restriction)
                    })
                    .await?;
                if posted {
                    self.metrics.restriction_set(self.investigation);
                }
            }
            Action::Advise(advisory) => {
                let cluster = self.cluster(action)?;
                self.cluster_manager
                    .post_advisory(cluster, &advisory.build())
                    .await?;
                self.metrics.advisory_sent(self.investigation);
            }
            Action::Escalate { reason } => {
                self.pager.escalate(self.incident_id, reason).await?;
                self.metrics.escalated(self.investigation);
            }
            Action::Silence { reason } => {
                self.pager.silence(self.incident_id, reason).await?;
                self.metrics.silenced(self.investigation);
            }
        }
        info!(
            incident_id = self.incident_id,
            investigation = self.investigation,
            action = action.label(),
            "Applied action"
        );
        Ok(())
    }
}
