//! Experimental AI-assisted analysis for alerts without a dedicated tree.

use anyhow::Result;
use tokio::time::timeout;
use tracing::warn;

use crate::actions::Conclusion;
use crate::clients::AnalysisRequest;
use crate::resolver::AlertContext;

pub const NAME: &str = "AssistedAnalysis";

pub async fn run(ctx: &mut AlertContext) -> Result<Conclusion> {
    let Some(agent) = ctx.analysis.clone() else {
        ctx.notes
            .append_warning("AI-assisted analysis is not configured");
        return Ok(Conclusion::builder(&ctx.notes).escalate("no automated analysis available"));
    };

    let organization_id = match ctx.cluster_manager.get_organization_id(&ctx.cluster).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(cluster_id = %ctx.cluster.id, "Organization lookup failed: {e:#}");
            None
        }
    };
    let request = AnalysisRequest {
        cluster_id: ctx.cluster.id.clone(),
        external_id: ctx.cluster.external_id.clone(),
        organization_id,
        alert_title: ctx.alert.title.clone(),
        notes: ctx.notes.lines().to_vec(),
    };

    let limit = ctx.config.analysis_timeout;
    match timeout(limit, agent.analyze(&request)).await {
        Ok(Ok(summary)) => ctx.notes.append_info(format!("AI-assisted analysis:\n{summary}")),
        Ok(Err(e)) => ctx
            .notes
            .append_warning(format!("AI-assisted analysis failed: {e:#}")),
        Err(_) => ctx.notes.append_warning(format!(
            "AI-assisted analysis timed out after {}s",
            limit.as_secs()
        )),
    }

    Ok(Conclusion::builder(&ctx.notes).escalate("AI-assisted analysis needs human review"))
}
