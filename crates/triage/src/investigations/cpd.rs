//! "ClusterProvisioningDelay" investigation.
//!
//! A cluster that is still installing long after creation usually has a
//! network problem in a customer-provided VPC. Checks, in order:
//! - the cluster already finished installing: silence
//! - customer subnets without a usable default route: advisory + escalate
//! - network egress verification, same degradation rules as elsewhere

use anyhow::Result;

use super::egress::{self, EgressCheck, MANUAL_ACTION_SERVICE};
use crate::actions::{AdvisoryAction, Conclusion};
use crate::clients::{AdvisorySeverity, ClusterState, RouteTable};
use crate::error::Classify as _;
use crate::resolver::AlertContext;

pub const NAME: &str = "ClusterProvisioningDelay";
pub const TITLE_PATTERN: &str = "ClusterProvisioningDelay";

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Whether any table routes `0.0.0.0/0` through an internet, NAT or
/// transit gateway.
pub fn has_default_route(tables: &[RouteTable]) -> bool {
    tables.iter().flat_map(|t| &t.routes).any(|route| {
        let usable_target = route.gateway_id.as_deref().is_some_and(|g| g.starts_with("igw-"))
            || route.nat_gateway_id.is_some()
            || route.transit_gateway_id.is_some();
        route.destination_cidr.as_deref() == Some(DEFAULT_ROUTE)
            && route.state.as_deref() != Some("blackhole")
            && usable_target
    })
}

fn missing_route_advisory(subnets: &[String]) -> AdvisoryAction {
    AdvisoryAction {
        severity: AdvisorySeverity::Warning,
        summary: "Installation blocked: Missing route to internet".to_string(),
        description: format!(
            "Your cluster's installation is blocked because subnets {} have no default route \
             to an internet, NAT or transit gateway. Add a 0.0.0.0/0 route to the subnets' \
             route tables so that installation can continue.",
            subnets.join(", ")
        ),
        service_tag: MANUAL_ACTION_SERVICE.to_string(),
    }
}

pub async fn run(ctx: &mut AlertContext) -> Result<Conclusion> {
    if ctx.cluster.state == ClusterState::Ready {
        ctx.notes
            .append_success("Cluster finished installing; the alert is stale");
        return Ok(Conclusion::builder(&ctx.notes).silence("cluster is ready"));
    }
    ctx.notes
        .append_info(format!("Cluster is in state '{}'", ctx.cluster.state));

    match ctx.cluster_manager.is_access_protected(&ctx.cluster).await {
        Ok(true) => ctx
            .notes
            .append_info("Access protection is enabled; cluster access needs customer approval"),
        Ok(false) => {}
        Err(e) => ctx
            .notes
            .append_warning(format!("Could not check access protection: {e:#}")),
    }

    if !ctx.cluster.subnet_ids.is_empty() {
        let cloud = ctx.cloud_provider()?;
        let mut missing = Vec::new();
        for subnet in &ctx.cluster.subnet_ids {
            let tables = cloud
                .route_tables(subnet)
                .await
                .infrastructure(format!("could not retrieve route tables of {subnet}"))?;
            if !has_default_route(&tables) {
                missing.push(subnet.clone());
            }
        }
        if !missing.is_empty() {
            ctx.notes.append_warning(format!(
                "Subnets without a default route: {}",
                missing.join(", ")
            ));
            return Ok(Conclusion::builder(&ctx.notes)
                .advise(missing_route_advisory(&missing))
                .escalate("customer subnets have no route to the internet"));
        }
        ctx.notes.append_success("All customer subnets have a default route");
    }

    match egress::check(ctx).await {
        EgressCheck::Passed => {
            ctx.notes.append_success("Network egress verification passed");
        }
        EgressCheck::Blocked(failures) => {
            ctx.notes
                .append_warning(format!("Network egress verification failed: {failures}"));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Route, VerifierOutcome};
    use crate::resolver::Requirements;
    use crate::testing::{alert, Harness};

    const REQUIREMENTS: Requirements = Requirements {
        cluster_deployment: false,
        cloud_provider: true,
    };

    fn table(route: Route) -> RouteTable {
        RouteTable {
            id: "rtb-1".to_string(),
            routes: vec![route],
        }
    }

    fn default_route() -> Route {
        Route {
            destination_cidr: Some(DEFAULT_ROUTE.to_string()),
            state: Some("active".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_route_detection() {
        let via_igw = Route {
            gateway_id: Some("igw-1".to_string()),
            ..default_route()
        };
        let via_nat = Route {
            nat_gateway_id: Some("nat-1".to_string()),
            ..default_route()
        };
        let blackholed = Route {
            state: Some("blackhole".to_string()),
            ..via_nat.clone()
        };
        let local_only = Route {
            destination_cidr: Some("10.0.0.0/16".to_string()),
            gateway_id: Some("local".to_string()),
            ..Default::default()
        };

        assert!(has_default_route(&[table(via_igw)]));
        assert!(has_default_route(&[table(via_nat)]));
        assert!(!has_default_route(&[table(blackholed)]));
        assert!(!has_default_route(&[table(local_only)]));
        assert!(!has_default_route(&[]));
    }

    #[tokio::test]
    async fn test_ready_cluster_is_silenced() {
        let harness = Harness::new();
        harness.cluster_manager.update_cluster(|c| c.state = ClusterState::Ready);
        let mut ctx = harness.context(alert(NAME), REQUIREMENTS).await;

        let conclusion = run(&mut ctx).await.unwrap();
        assert_eq!(conclusion.shape(), vec!["note", "silence"]);
    }

    #[tokio::test]
    async fn test_subnet_without_route_advises() {
        let harness = Harness::new();
        harness.cluster_manager.update_cluster(|c| {
            c.state = ClusterState::Installing;
            c.subnet_ids = vec!["subnet-a".to_string()];
        });
        harness.cloud.set_route_tables(vec![]);
        let mut ctx = harness.context(alert(NAME), REQUIREMENTS).await;

        let conclusion = run(&mut ctx).await.unwrap();
        assert_eq!(conclusion.shape(), vec!["note", "advise", "escalate"]);
        assert_eq!(harness.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_monitor_host_is_not_special_cased() {
        let harness = Harness::new();
        harness
            .cluster_manager
            .update_cluster(|c| c.state = ClusterState::Installing);
        harness
            .verifier
            .set(Ok(VerifierOutcome::Failure("nosnch.in:443".to_string())));
        let mut ctx = harness.context(alert(NAME), REQUIREMENTS).await;

        let conclusion = run(&mut ctx).await.unwrap();
        assert_eq!(conclusion.shape(), vec!["note", "advise", "escalate"]);
        assert!(!conclusion.restriction_set());
    }

    #[tokio::test]
    async fn test_passing_checks_escalate() {
        let harness = Harness::new();
        harness
            .cluster_manager
            .update_cluster(|c| c.state = ClusterState::Installing);
        harness.cluster_manager.set_access_protected(true);
        let mut ctx = harness.context(alert(NAME), REQUIREMENTS).await;

        let conclusion = run(&mut ctx).await.unwrap();
        assert_eq!(conclusion.shape(), vec!["note", "escalate"]);
        assert!(ctx.notes.lines().iter().any(|l| l.contains("Access protection")));
    }
}
