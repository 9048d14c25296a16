//! Incoming alert model.

use serde::{Deserialize, Serialize};

/// Whether the alert fired or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Triggered,
    Resolved,
}

/// An alert raised against one cluster, as delivered by the paging system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub incident_id: String,
    pub title: String,
    pub status: AlertStatus,
    pub cluster_id: String,
}

impl AlertEvent {
    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }
}
