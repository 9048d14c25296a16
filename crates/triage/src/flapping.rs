//! Anti-flapping guard for automatic restriction removal.
//!
//! Before lifting a restriction, recent restriction-change history written by
//! our own service accounts is counted. Too many changes in the window means
//! the restriction is oscillating and removal is skipped.
//!
//! There is no cross-process locking: two concurrent runs against one cluster
//! can both pass the check. Correctness relies on the history being
//! read-after-write consistent.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clients::{
    AdvisoryEntry, AdvisoryFilter, Cluster, ClusterManager, Restriction,
    RESTRICTION_CHANGE_LOG_TYPE,
};
use crate::config::{window_start, TriageConfig};

/// Result of a guarded removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// This many matching restrictions were deleted.
    Removed(usize),
    /// No restriction with the same summary and details was set.
    NotFound,
    /// Removal skipped; this many recent changes were found.
    Flapping(usize),
}

impl RemovalOutcome {
    pub fn removed_any(self) -> bool {
        matches!(self, Self::Removed(n) if n > 0)
    }
}

pub struct FlappingGuard<'a> {
    cluster_manager: &'a dyn ClusterManager,
    config: &'a TriageConfig,
}

impl<'a> FlappingGuard<'a> {
    pub fn new(cluster_manager: &'a dyn ClusterManager, config: &'a TriageConfig) -> Self {
        Self {
            cluster_manager,
            config,
        }
    }

    fn is_recent_change(&self, entry: &AdvisoryEntry, summary: &str, since: DateTime<Utc>) -> bool {
        self.config.is_service_account(&entry.username)
            && entry.log_type == RESTRICTION_CHANGE_LOG_TYPE
            && entry.timestamp >= since
            && entry.summary.contains(summary)
    }

    /// Number of restriction changes for `summary` inside the flapping window.
    pub async fn recent_changes(
        &self,
        cluster: &Cluster,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let since = window_start(now, self.config.flapping_window);
        let filter = AdvisoryFilter {
            log_type: Some(RESTRICTION_CHANGE_LOG_TYPE.to_string()),
            since: Some(since),
        };
        let history = self.cluster_manager.list_advisories(cluster, &filter).await?;
        Ok(history
            .iter()
            .filter(|e| self.is_recent_change(e, summary, since))
            .count())
    }

    /// Remove every restriction set for the same reason as `restriction`,
    /// unless it is flapping. Restrictions sharing only the summary are kept.
    pub async fn remove_restriction(
        &self,
        cluster: &Cluster,
        restriction: &Restriction,
        now: DateTime<Utc>,
    ) -> Result<RemovalOutcome> {
        let summary = restriction.summary.as_str();
        let changes = self.recent_changes(cluster, summary, now).await?;
        if changes >= self.config.flapping_threshold {
            warn!(
                cluster_id = %cluster.id,
                summary,
                changes,
                "Restriction is flapping, not removing"
            );
            return Ok(RemovalOutcome::Flapping(changes));
        }

        let matching: Vec<String> = self
            .cluster_manager
            .list_restrictions(&cluster.id)
            .await?
            .into_iter()
            .filter(|r| r.same_reason(restriction))
            .filter_map(|r| r.id)
            .collect();
        if matching.is_empty() {
            return Ok(RemovalOutcome::NotFound);
        }

        for restriction_id in &matching {
            self.config
                .retry
                .with_retries("remove restriction", || {
                    self.cluster_manager
                        .delete_restriction(&cluster.id, restriction_id)
                })
                .await?;
        }
        info!(cluster_id = %cluster.id, summary, count = matching.len(), "Removed restriction");
        Ok(RemovalOutcome::Removed(matching.len()))
    }
}
