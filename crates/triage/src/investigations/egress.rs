//! Network egress verification shared by investigations.

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::actions::AdvisoryAction;
use crate::clients::{AdvisorySeverity, EgressTarget, Product, VerifierOutcome};
use crate::resolver::AlertContext;

/// Firewall prerequisite documentation per product.
const ROSA_FIREWALL_DOCS: &str = "https://docs.openshift.com/rosa/rosa_install_access_delete_clusters/rosa_getting_started_iam/rosa-aws-prereqs.html#osd-aws-privatelink-firewall-prerequisites_prerequisites";
const OSD_FIREWALL_DOCS: &str = "https://docs.openshift.com/dedicated/osd_planning/aws-ccs.html#osd-aws-privatelink-firewall-prerequisites_aws-ccs";

/// Service tag routing advisories that ask the customer to act.
pub const MANUAL_ACTION_SERVICE: &str = "SREManualAction";

/// Result of an egress check.
#[derive(Debug)]
pub enum EgressCheck {
    Passed,
    /// The verifier reported unreachable endpoints.
    Blocked(String),
    /// The verifier could not produce a verdict.
    ToolingError(anyhow::Error),
}

pub fn firewall_docs(product: Product) -> &'static str {
    match product {
        Product::Rosa => ROSA_FIREWALL_DOCS,
        Product::Osd | Product::Unknown => OSD_FIREWALL_DOCS,
    }
}

/// Advisory telling the customer which endpoints their network blocks.
pub fn blocked_egress_advisory(product: Product, failures: &str) -> AdvisoryAction {
    AdvisoryAction {
        severity: AdvisorySeverity::Warning,
        summary: "Action required: Network misconfiguration".to_string(),
        description: format!(
            "Your cluster requires you to take action. The cluster is unable to reach the \
             following required endpoints: {failures}. Please review your firewall and proxy \
             configuration against {}.",
            firewall_docs(product)
        ),
        service_tag: MANUAL_ACTION_SERVICE.to_string(),
    }
}

async fn target(ctx: &AlertContext) -> Result<EgressTarget> {
    let cloud = ctx.cloud_provider()?;
    let infra_id = ctx.infra_id()?;

    let subnet_ids = if ctx.cluster.subnet_ids.is_empty() {
        cloud.subnet_ids(&infra_id).await?
    } else {
        ctx.cluster.subnet_ids.clone()
    };
    if subnet_ids.is_empty() {
        bail!("no subnets found for {infra_id}");
    }

    let security_group_id = match cloud.security_group_id(&infra_id).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(cluster_id = %ctx.cluster.id, "No security group for egress check: {e:#}");
            None
        }
    };

    Ok(EgressTarget {
        cluster_id: ctx.cluster.id.clone(),
        region: ctx.cluster.region.clone(),
        subnet_ids,
        security_group_id,
        hosted_control_plane: ctx.cluster.hypershift,
    })
}

/// Run the egress verifier against the cluster's subnets.
pub async fn check(ctx: &AlertContext) -> EgressCheck {
    let result = async {
        let target = target(ctx).await?;
        ctx.verifier.verify_egress(&target).await
    }
    .await;

    match result {
        Ok(VerifierOutcome::Success) => EgressCheck::Passed,
        Ok(VerifierOutcome::Failure(failures)) => {
            debug!(cluster_id = %ctx.cluster.id, %failures, "Egress blocked");
            EgressCheck::Blocked(failures)
        }
        Err(e) => EgressCheck::ToolingError(e),
    }
}
