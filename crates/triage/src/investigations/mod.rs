//! Investigation registry.
//!
//! Each alert type maps to one [`Investigation`]. The [`Registry`] holds them
//! in order and dispatches on the alert title: the first eligible match wins.
//! Experimental investigations are only eligible when enabled in config.

pub mod assisted;
pub mod ccam;
pub mod cpd;
pub mod egress;
pub mod unreachable;

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::actions::Conclusion;
use crate::error::is_finding;
use crate::resolver::{AlertContext, Requirements};

/// Decision tree selected for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Investigation {
    ClusterUnreachable,
    ProvisioningDelay,
    AssistedAnalysis,
}

impl Investigation {
    pub fn name(self) -> &'static str {
        match self {
            Self::ClusterUnreachable => unreachable::NAME,
            Self::ProvisioningDelay => cpd::NAME,
            Self::AssistedAnalysis => assisted::NAME,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ClusterUnreachable => {
                "Finds who stopped cluster instances and whether egress is blocked"
            }
            Self::ProvisioningDelay => "Checks customer networking of clusters stuck installing",
            Self::AssistedAnalysis => "Asks an AI agent to summarise alerts without automation",
        }
    }

    pub fn alert_title_match(self, title: &str) -> bool {
        match self {
            Self::ClusterUnreachable => title.contains(unreachable::TITLE_PATTERN),
            Self::ProvisioningDelay => title.contains(cpd::TITLE_PATTERN),
            // Catch-all; must stay last in the registry.
            Self::AssistedAnalysis => true,
        }
    }

    pub fn is_experimental(self) -> bool {
        matches!(self, Self::AssistedAnalysis)
    }

    pub fn requirements(self) -> Requirements {
        match self {
            Self::ClusterUnreachable => Requirements {
                cluster_deployment: true,
                cloud_provider: true,
            },
            Self::ProvisioningDelay => Requirements {
                cluster_deployment: false,
                cloud_provider: true,
            },
            Self::AssistedAnalysis => Requirements::default(),
        }
    }

    /// Walk the decision tree.
    ///
    /// Findings are caught here, noted and escalated. Every other error is
    /// returned so the caller can retry the run.
    pub async fn run(self, ctx: &mut AlertContext) -> Result<Conclusion> {
        let now = Utc::now();
        let result = match self {
            Self::ClusterUnreachable if ctx.alert.is_resolved() => {
                unreachable::run_resolved(ctx, now).await
            }
            Self::ClusterUnreachable => unreachable::run_triggered(ctx, now).await,
            Self::ProvisioningDelay => cpd::run(ctx).await,
            Self::AssistedAnalysis => assisted::run(ctx).await,
        };

        match result {
            Err(e) if is_finding(&e) => {
                warn!(investigation = self.name(), "Inconclusive: {e:#}");
                ctx.notes.append_warning(format!("{e:#}"));
                Ok(Conclusion::builder(&ctx.notes).escalate("investigation was inconclusive"))
            }
            other => other,
        }
    }
}

/// Ordered investigations, first match wins.
#[derive(Debug, Clone)]
pub struct Registry {
    investigations: Vec<Investigation>,
    experimental_enabled: bool,
}

impl Registry {
    pub fn new(investigations: Vec<Investigation>, experimental_enabled: bool) -> Self {
        Self {
            investigations,
            experimental_enabled,
        }
    }

    /// All investigations in dispatch order.
    pub fn standard(experimental_enabled: bool) -> Self {
        Self::new(
            vec![
                Investigation::ClusterUnreachable,
                Investigation::ProvisioningDelay,
                Investigation::AssistedAnalysis,
            ],
            experimental_enabled,
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = Investigation> + '_ {
        self.investigations.iter().copied()
    }

    /// The first eligible investigation matching `title`.
    pub fn find(&self, title: &str) -> Option<Investigation> {
        self.iter()
            .filter(|i| self.experimental_enabled || !i.is_experimental())
            .find(|i| i.alert_title_match(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::InstanceState;
    use crate::testing::{alert, instance, Harness};

    #[test]
    fn test_dispatch_by_title() {
        let registry = Registry::standard(false);
        assert_eq!(
            registry.find("[prod] cluster c1 has gone missing"),
            Some(Investigation::ClusterUnreachable)
        );
        assert_eq!(
            registry.find("ClusterProvisioningDelay - production"),
            Some(Investigation::ProvisioningDelay)
        );
        assert_eq!(registry.find("KubeAPIDown"), None);
    }

    #[test]
    fn test_experimental_gate() {
        let registry = Registry::standard(true);
        assert_eq!(registry.find("KubeAPIDown"), Some(Investigation::AssistedAnalysis));
        assert_eq!(
            registry.find("cluster has gone missing"),
            Some(Investigation::ClusterUnreachable)
        );
    }

    #[test]
    fn test_first_match_wins() {
        let registry = Registry::new(
            vec![Investigation::ProvisioningDelay, Investigation::ClusterUnreachable],
            false,
        );
        assert_eq!(
            registry.find("ClusterProvisioningDelay: cluster has gone missing"),
            Some(Investigation::ProvisioningDelay)
        );
    }

    #[test]
    fn test_metadata() {
        for investigation in Registry::standard(true).iter() {
            assert!(!investigation.name().is_empty());
            assert!(!investigation.description().is_empty());
        }
        assert!(Investigation::AssistedAnalysis.is_experimental());
        assert!(!Investigation::ClusterUnreachable.is_experimental());
    }

    #[tokio::test]
    async fn test_findings_become_escalations() {
        let harness = Harness::new();
        harness
            .cloud
            .set_non_running(vec![instance("i-1", InstanceState::Stopped)]);
        let investigation = Investigation::ClusterUnreachable;
        let mut ctx = harness
            .context(alert("cluster has gone missing"), investigation.requirements())
            .await;

        let conclusion = investigation.run(&mut ctx).await.unwrap();
        assert_eq!(conclusion.shape(), vec!["note", "escalate"]);
        assert!(ctx
            .notes
            .lines()
            .iter()
            .any(|l| l.contains("audit trail has not caught up")));
    }
}
