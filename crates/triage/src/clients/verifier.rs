//! Network egress verification.
//!
//! The verifier probes the endpoints a cluster needs to reach from inside its
//! own subnets. A `Failure` outcome means the probe ran and some endpoints are
//! blocked; an `Err` means the tooling itself did not work.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::command;

/// Marker the verifier prints in front of every unreachable endpoint.
const EGRESS_FAILURE_MARKER: &str = "egressURL error";

/// Where to run the egress probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressTarget {
    pub cluster_id: String,
    pub region: String,
    pub subnet_ids: Vec<String>,
    pub security_group_id: Option<String>,
    pub hosted_control_plane: bool,
}

/// Result of a completed probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierOutcome {
    Success,
    /// Blocked endpoints, one per line.
    Failure(String),
}

#[async_trait]
pub trait NetworkVerifier: Send + Sync {
    async fn verify_egress(&self, target: &EgressTarget) -> Result<VerifierOutcome>;
}

/// Runs an external egress verifier binary.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    binary: PathBuf,
    profile: Option<String>,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            profile: None,
            timeout: command::DEFAULT_TIMEOUT,
        }
    }

    /// Per-subnet limit after which a probe is killed and reported as a tooling error.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cloud credentials profile passed through to the verifier.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    fn args_for(&self, target: &EgressTarget, subnet_id: &str) -> Vec<String> {
        let mut args = vec![
            "egress".to_string(),
            "--subnet-id".to_string(),
            subnet_id.to_string(),
            "--region".to_string(),
            target.region.clone(),
        ];
        if let Some(sg) = &target.security_group_id {
            args.push("--security-group-id".to_string());
            args.push(sg.clone());
        }
        if target.hosted_control_plane {
            args.push("--platform".to_string());
            args.push("hostedcluster".to_string());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }
}

/// Collect the blocked-endpoint lines of verifier output.
pub(crate) fn parse_failures(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(EGRESS_FAILURE_MARKER))
        .map(ToString::to_string)
        .collect()
}

#[async_trait]
impl NetworkVerifier for CommandVerifier {
    async fn verify_egress(&self, target: &EgressTarget) -> Result<VerifierOutcome> {
        if target.subnet_ids.is_empty() {
            anyhow::bail!("no subnets to verify egress from for cluster {}", target.cluster_id);
        }

        let mut failures = Vec::new();
        for subnet_id in &target.subnet_ids {
            let output = command::capture(&self.binary, self.args_for(target, subnet_id), self.timeout).await?;
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            let blocked = parse_failures(&combined);

            debug!(
                cluster_id = %target.cluster_id,
                subnet_id = %subnet_id,
                success = output.success,
                blocked = blocked.len(),
                "Egress verifier finished"
            );

            if blocked.is_empty() && !output.success {
                anyhow::bail!(
                    "egress verifier exited with {:?} without a verdict: {}",
                    output.code,
                    output.stderr
                );
            }
            failures.extend(blocked);
        }

        if failures.is_empty() {
            info!(cluster_id = %target.cluster_id, "Egress verification passed");
            Ok(VerifierOutcome::Success)
        } else {
            info!(
                cluster_id = %target.cluster_id,
                blocked = failures.len(),
                "Egress verification found blocked endpoints"
            );
            Ok(VerifierOutcome::Failure(failures.join("\n")))
        }
    }
}
