//! Hibernation history.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clients::{ClusterState, StateTransition};

/// One hibernation, from the moment the cluster went to sleep until it
/// was resumed (if it has been).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HibernationPeriod {
    pub hibernated_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

/// Pair hibernate/resume transitions into periods. Transitions must be in
/// chronological order; a resume without a preceding hibernation is ignored.
pub fn periods(transitions: &[StateTransition]) -> Vec<HibernationPeriod> {
    let mut periods: Vec<HibernationPeriod> = Vec::new();
    for transition in transitions {
        match transition.state {
            ClusterState::Hibernating => {
                let open = periods.last().is_some_and(|p| p.resumed_at.is_none());
                if !open {
                    periods.push(HibernationPeriod {
                        hibernated_at: transition.timestamp,
                        resumed_at: None,
                    });
                }
            }
            ClusterState::Resuming => {
                if let Some(last) = periods.last_mut().filter(|p| p.resumed_at.is_none()) {
                    last.resumed_at = Some(transition.timestamp);
                }
            }
            _ => {}
        }
    }
    periods
}

/// Whether the latest resume happened no more than `window` before `now`.
pub fn recently_resumed(periods: &[HibernationPeriod], now: DateTime<Utc>, window: Duration) -> bool {
    let Some(resumed_at) = periods.iter().rev().find_map(|p| p.resumed_at) else {
        return false;
    };
    match (now - resumed_at).to_std() {
        Ok(elapsed) => elapsed <= window,
        // Resume timestamp in the future: clock skew, count it as recent.
        Err(_) => true,
    }
}
