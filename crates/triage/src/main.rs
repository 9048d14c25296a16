//! Cluster triage CLI.
//!
//! Handles one alert delivered as a paging webhook payload and prints the
//! outcome. Collaborator endpoints and credentials come from flags or the
//! environment.

#![allow(clippy::doc_markdown)]

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use triage::actions::Action;
use triage::clients::analysis::HttpAnalysisAgent;
use triage::clients::aws::AwsCliFactory;
use triage::clients::hive::HiveClient;
use triage::clients::ocm::{OcmClient, OcmConfig};
use triage::clients::pagerduty::{PagerDutyClient, PagerDutyConfig, PagerDutyWebhookPayload};
use triage::clients::verifier::CommandVerifier;
use triage::clients::{AnalysisAgent, IncidentPager};
use triage::{
    AlertEvent, AtomicMetrics, Outcome, OutcomeStatus, Registry, Services, Triage, TriageConfig,
};

/// Automated triage of cluster fleet alerts
#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Investigates cluster alerts and remediates or escalates them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Allow experimental investigations to be dispatched
    #[arg(long, env = "TRIAGE_EXPERIMENTAL_ENABLED", global = true)]
    experimental: bool,

    /// Attempts per investigation run, including the first
    #[arg(
        long,
        env = "TRIAGE_RETRY_ATTEMPTS",
        default_value = "3",
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    retry_attempts: u32,

    /// Seconds to wait for AI-assisted analysis
    #[arg(long, env = "TRIAGE_ANALYSIS_TIMEOUT", default_value = "300", global = true)]
    analysis_timeout: u64,

    /// Seconds before an external tool (cloud CLI, egress verifier) is killed
    #[arg(long, env = "TRIAGE_COMMAND_TIMEOUT", default_value = "300", global = true)]
    command_timeout: u64,
}

impl Cli {
    fn triage_config(&self) -> TriageConfig {
        let mut config = TriageConfig {
            experimental_enabled: self.experimental,
            analysis_timeout: Duration::from_secs(self.analysis_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            ..TriageConfig::default()
        };
        config.retry.max_attempts = self.retry_attempts;
        config
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one alert from a webhook payload
    Run(RunArgs),

    /// List registered investigations in dispatch order
    Investigations,
}

#[derive(Args)]
struct RunArgs {
    /// Webhook payload file, or `-` for stdin
    #[arg(long, default_value = "-")]
    payload: PathBuf,

    /// Cluster management API URL
    #[arg(long, env = "OCM_URL", default_value = "https://api.openshift.com")]
    ocm_url: String,

    /// Cluster management API access token
    #[arg(long, env = "OCM_TOKEN", hide_env_values = true)]
    ocm_token: String,

    /// Paging API token
    #[arg(long, env = "PAGERDUTY_TOKEN", hide_env_values = true)]
    pagerduty_token: String,

    /// Email the paging API acts as
    #[arg(long, env = "PAGERDUTY_FROM")]
    pagerduty_from: String,

    /// Escalation policy for incidents that need a human
    #[arg(long, env = "PAGERDUTY_ESCALATION_POLICY")]
    pagerduty_escalation_policy: String,

    /// Escalation policy for silenced incidents
    #[arg(long, env = "PAGERDUTY_SILENT_POLICY")]
    pagerduty_silent_policy: String,

    /// Cloud credentials profile
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Cloud CLI binary
    #[arg(long, env = "AWS_CLI_BIN", default_value = "aws")]
    aws_cli_bin: PathBuf,

    /// Egress verifier binary
    #[arg(long, env = "NETWORK_VERIFIER_BIN", default_value = "osd-network-verifier")]
    network_verifier_bin: PathBuf,

    /// AI-assisted analysis endpoint
    #[arg(long, env = "ANALYSIS_URL")]
    analysis_url: Option<String>,

    /// Print the outcome as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = cli.triage_config();

    match cli.command {
        Commands::Run(args) => run(args, config).await,
        Commands::Investigations => {
            list_investigations(&Registry::standard(config.experimental_enabled));
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,triage=debug")
        } else {
            EnvFilter::new("warn,triage=info")
        }
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn read_payload(path: &Path) -> Result<PagerDutyWebhookPayload> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Failed to parse webhook payload")
}

async fn run(args: RunArgs, config: TriageConfig) -> Result<()> {
    let payload = read_payload(&args.payload)?;
    let Some(status) = payload.alert_status() else {
        info!(event_type = %payload.event.event_type, "Ignoring webhook event");
        println!("{} {}", "Ignored:".yellow(), payload.event.event_type);
        return Ok(());
    };

    let pager = Arc::new(PagerDutyClient::new(PagerDutyConfig::new(
        args.pagerduty_token,
        args.pagerduty_from,
        args.pagerduty_escalation_policy,
        args.pagerduty_silent_policy,
    ))?);
    let cluster_manager =
        Arc::new(OcmClient::new(OcmConfig::new(args.ocm_token).with_base_url(args.ocm_url))?);
    let deployments = Arc::new(
        HiveClient::try_default()
            .await
            .context("Failed to connect to the Hive cluster")?,
    );
    let mut verifier =
        CommandVerifier::new(args.network_verifier_bin).with_timeout(config.command_timeout);
    if let Some(profile) = &args.aws_profile {
        verifier = verifier.with_profile(profile.clone());
    }
    let analysis = match args.analysis_url {
        Some(url) => Some(Arc::new(HttpAnalysisAgent::new(url)?) as Arc<dyn AnalysisAgent>),
        None => None,
    };
    let metrics = Arc::new(AtomicMetrics::new());

    let incident_id = payload.event.data.id.clone();
    let cluster_id = pager
        .get_cluster_id(&incident_id)
        .await
        .with_context(|| format!("Failed to find the cluster of incident {incident_id}"))?;
    let alert = AlertEvent {
        incident_id,
        title: payload.event.data.title.clone(),
        status,
        cluster_id,
    };

    let services = Services {
        cluster_manager,
        pager,
        cloud_factory: Arc::new(
            AwsCliFactory::new(args.aws_cli_bin, args.aws_profile)
                .with_timeout(config.command_timeout),
        ),
        deployments,
        verifier: Arc::new(verifier),
        analysis,
        metrics: metrics.clone(),
    };
    let outcome = Triage::new(services, config).handle(alert).await?;

    if args.json {
        let report = serde_json::json!({
            "outcome": outcome,
            "metrics": metrics.snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome.status {
        OutcomeStatus::Concluded | OutcomeStatus::Unmatched => Ok(()),
        status => bail!("alert was escalated after a failure ({status:?})"),
    }
}

fn print_outcome(outcome: &Outcome) {
    let status = match outcome.status {
        OutcomeStatus::Concluded => "concluded".green(),
        OutcomeStatus::Unmatched => "unmatched".yellow(),
        OutcomeStatus::InvestigationFailed => "investigation failed".red(),
        OutcomeStatus::ExecutionFailed => "execution failed".red(),
    };
    println!("{} {}", outcome.investigation.bold(), status);

    for action in outcome.conclusion.actions() {
        match action {
            Action::Note { text } => {
                println!("  {}", "note".cyan());
                for line in text.lines() {
                    println!("    {line}");
                }
            }
            Action::Restrict(r) => println!("  {} {}", "restrict".magenta(), r.summary),
            Action::Advise(a) => println!("  {} {}", "advise".magenta(), a.summary),
            Action::Escalate { reason } => println!("  {} {}", "escalate".red(), reason),
            Action::Silence { reason } => println!("  {} {}", "silence".green(), reason),
        }
    }
}

fn list_investigations(registry: &Registry) {
    for investigation in registry.iter() {
        let name = if investigation.is_experimental() {
            format!("{} (experimental)", investigation.name()).yellow()
        } else {
            investigation.name().bold()
        };
        println!("{name}");
        println!("  {}", investigation.description().dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from([
            "triage",
            "--experimental",
            "--retry-attempts",
            "5",
            "--analysis-timeout",
            "45",
            "--command-timeout",
            "90",
            "investigations",
        ])
        .unwrap();
        let config = cli.triage_config();
        assert!(config.experimental_enabled);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.analysis_timeout, Duration::from_secs(45));
        assert_eq!(config.command_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        assert!(Cli::try_parse_from(["triage", "--retry-attempts", "0", "investigations"]).is_err());
    }
}
