//! "Cluster has gone missing" investigation.
//!
//! Triggered alerts walk this tree:
//!
//! 1. Look for non-running instances. None found means nobody we can blame
//!    stopped anything (terminated instances may already have expired).
//! 2. Identify who stopped them from the audit trail. An unauthorized actor
//!    restricts the cluster and silences the alert.
//! 3. Add a side note when the cluster was resumed from hibernation recently.
//! 4. Verify network egress. A blocked monitor host restricts and silences;
//!    any other blocked endpoint sends an advisory and escalates.
//!
//! Everything else escalates with the notes gathered on the way.
//!
//! Resolved alerts lift the restrictions this tree sets, through the
//! anti-flapping guard, once the expected nodes are running again.

pub mod audit;
pub mod hibernation;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use self::audit::{judge_events, AllowLists};
use super::egress::{self, EgressCheck};
use crate::actions::{Conclusion, RestrictionAction};
use crate::clients::{Instance, NodeCount};
use crate::config::window_start;
use crate::error::Classify as _;
use crate::flapping::{FlappingGuard, RemovalOutcome};
use crate::resolver::AlertContext;

pub const NAME: &str = "ClusterHasGoneMissing";
pub const TITLE_PATTERN: &str = "has gone missing";

pub const STOPPED_INFRASTRUCTURE_SUMMARY: &str = "Cluster is in Limited Support due to stopped instances";
pub const EGRESS_BLOCKED_SUMMARY: &str = "Cluster is in Limited Support due to blocked egress";

/// Restriction for instances stopped by the customer.
pub fn stopped_infrastructure() -> RestrictionAction {
    RestrictionAction::new(
        STOPPED_INFRASTRUCTURE_SUMMARY,
        "Your cluster is no longer reachable because some of its instances were stopped \
         outside of the platform. Restart the stopped instances to restore support.",
        "customer stopped infrastructure",
    )
}

/// Restriction for clusters that cannot reach the monitoring endpoint.
pub fn egress_blocked() -> RestrictionAction {
    RestrictionAction::new(
        EGRESS_BLOCKED_SUMMARY,
        "Your cluster cannot reach the monitoring endpoint it requires. Allow egress to the \
         required endpoints in your firewall configuration to restore support.",
        "egress blocked",
    )
}

/// What the instance checks found. Lives only inside one run.
#[derive(Debug, Default)]
pub struct InstanceInvestigationOutput {
    pub non_running: Vec<Instance>,
    pub running: usize,
    pub expected: Option<NodeCount>,
    pub actor: Option<String>,
    pub user_authorized: bool,
    pub caveat: Option<String>,
}

/// Steps 1 and 2: instances and the actor who stopped them.
async fn investigate_instances(
    ctx: &AlertContext,
    now: DateTime<Utc>,
) -> Result<InstanceInvestigationOutput> {
    let cloud = ctx.cloud_provider()?;
    let infra_id = ctx.infra_id()?;

    let non_running = cloud
        .list_non_running_instances(&infra_id)
        .await
        .infrastructure("could not retrieve non-running instances")?;
    let running = cloud
        .list_running_instances(&infra_id)
        .await
        .infrastructure("could not retrieve running instances")?
        .len();
    let expected = ctx
        .cluster_manager
        .get_expected_node_count(&ctx.cluster)
        .await
        .infrastructure("could not retrieve expected node count")?;

    let mut output = InstanceInvestigationOutput {
        running,
        expected: Some(expected),
        ..Default::default()
    };

    if non_running.is_empty() {
        output.user_authorized = true;
        output.caveat = Some(
            "No non-running instances found; terminated instances may have already expired"
                .to_string(),
        );
        return Ok(output);
    }

    let ids: Vec<String> = non_running.iter().map(|i| i.id.clone()).collect();
    let events = cloud
        .lookup_stop_events(
            &ids,
            window_start(now, ctx.config.audit_lookback),
            ctx.config.audit_max_results,
        )
        .await
        .infrastructure("could not retrieve stop events")?;
    let verdict = judge_events(&events, &AllowLists::default(), ctx.cluster.ccs)?;
    debug!(
        cluster_id = %ctx.cluster.id,
        actor = %verdict.actor.username,
        authorized = verdict.authorized,
        "Identified actor"
    );

    output.non_running = non_running;
    output.actor = Some(verdict.actor.username);
    output.user_authorized = verdict.authorized;
    Ok(output)
}

/// Step 3. Never blocks the tree: lookup failures become a note.
async fn hibernation_note(ctx: &mut AlertContext, now: DateTime<Utc>) {
    match ctx.cluster_manager.list_state_transitions(&ctx.cluster).await {
        Ok(transitions) => {
            let periods = hibernation::periods(&transitions);
            if hibernation::recently_resumed(&periods, now, ctx.config.recent_resume_window) {
                ctx.notes.append_warning(
                    "Cluster was resumed from hibernation recently; expired certificates \
                     may prevent it from checking in until they are renewed",
                );
            }
        }
        Err(e) => ctx
            .notes
            .append_warning(format!("Could not check hibernation history: {e:#}")),
    }
}

pub async fn run_triggered(ctx: &mut AlertContext, now: DateTime<Utc>) -> Result<Conclusion> {
    let output = investigate_instances(ctx, now).await?;

    if let Some(expected) = output.expected {
        ctx.notes.append_info(format!(
            "Running instances: {} (expected {} to {})",
            output.running, expected.min, expected.max
        ));
    }
    if let Some(caveat) = &output.caveat {
        ctx.notes.append_info(caveat);
    }

    if !output.user_authorized {
        let actor = output.actor.as_deref().unwrap_or("unknown");
        let stopped: Vec<&str> = output.non_running.iter().map(|i| i.id.as_str()).collect();
        ctx.notes.append_warning(format!(
            "Instances {} were stopped by '{actor}', who is not authorized to do so",
            stopped.join(", ")
        ));
        ctx.notes
            .append_automation("Setting restriction: customer stopped infrastructure");
        return Ok(Conclusion::builder(&ctx.notes)
            .restrict(stopped_infrastructure())
            .silence("customer stopped cluster infrastructure"));
    }
    if let Some(actor) = &output.actor {
        ctx.notes
            .append_success(format!("Instances were stopped by authorized account '{actor}'"));
    }

    hibernation_note(ctx, now).await;

    match egress::check(ctx).await {
        EgressCheck::Passed => {
            ctx.notes.append_success("Network egress verification passed");
        }
        EgressCheck::Blocked(failures) if failures.contains(&ctx.config.monitor_host) => {
            ctx.notes.append_warning(format!(
                "Network egress verification failed, monitoring host is blocked: {failures}"
            ));
            ctx.notes.append_automation("Setting restriction: egress blocked");
            return Ok(Conclusion::builder(&ctx.notes)
                .restrict(egress_blocked())
                .silence("cluster blocks egress to the monitoring host"));
        }
        EgressCheck::Blocked(failures) => {
            ctx.notes
                .append_warning(format!("Network egress verification failed: {failures}"));
            ctx.notes.append_automation("Sending network misconfiguration advisory");
            let advisory = egress::blocked_egress_advisory(ctx.cluster.product, &failures);
            return Ok(Conclusion::builder(&ctx.notes)
                .advise(advisory)
                .escalate("cluster blocks required egress endpoints"));
        }
        EgressCheck::ToolingError(e) => {
            ctx.notes
                .append_warning(format!("Network egress verification could not run: {e:#}"));
        }
    }

    Ok(Conclusion::builder(&ctx.notes).escalate("no automated remediation available"))
}

pub async fn run_resolved(ctx: &mut AlertContext, now: DateTime<Utc>) -> Result<Conclusion> {
    let cloud = ctx.cloud_provider()?;
    let infra_id = ctx.infra_id()?;

    let running = cloud
        .list_running_instances(&infra_id)
        .await
        .infrastructure("could not retrieve running instances")?
        .len();
    let expected = ctx
        .cluster_manager
        .get_expected_node_count(&ctx.cluster)
        .await
        .infrastructure("could not retrieve expected node count")?;

    let expected_min = expected.min as usize;
    if running < expected_min {
        ctx.notes.append_warning(format!(
            "Alert resolved but only {running} of at least {expected_min} instances are running"
        ));
        return Ok(Conclusion::builder(&ctx.notes).escalate("cluster has not fully recovered"));
    }
    ctx.notes
        .append_success(format!("{running} instances are running again"));

    let guard = FlappingGuard::new(ctx.cluster_manager.as_ref(), &ctx.config);
    let mut flapping = false;
    for restriction in [stopped_infrastructure().build(), egress_blocked().build()] {
        let summary = restriction.summary.as_str();
        let outcome = guard
            .remove_restriction(&ctx.cluster, &restriction, now)
            .await
            .infrastructure("could not remove restriction")?;
        match outcome {
            RemovalOutcome::Removed(_) => {
                ctx.metrics.restriction_removed(NAME);
                ctx.notes
                    .append_automation(format!("Removed restriction '{summary}'"));
            }
            RemovalOutcome::Flapping(changes) => {
                flapping = true;
                ctx.notes.append_warning(format!(
                    "Restriction '{summary}' changed {changes} times recently; not removing it"
                ));
            }
            RemovalOutcome::NotFound => {}
        }
    }

    if flapping {
        info!(cluster_id = %ctx.cluster.id, "Restriction flapping, escalating");
        return Ok(Conclusion::builder(&ctx.notes).escalate("restriction is flapping"));
    }
    Ok(Conclusion::builder(&ctx.notes).silence("cluster recovered"))
}
