//! Audit trail actor decoding and authorization.

use anyhow::anyhow;
use serde::Deserialize;

use crate::clients::AuditEvent;
use crate::error::{as_finding, Classify as _};

/// Oldest audit schema whose session issuer fields we understand.
const MIN_MINOR_VERSION: u32 = 8;

/// The identity behind a stop/terminate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub username: String,
    /// User name of the role the actor assumed, if any.
    pub issuer_username: String,
    /// `IAMUser`, `AssumedRole`, ...
    pub identity_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditPayload {
    event_version: String,
    #[serde(default)]
    user_identity: UserIdentity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdentity {
    #[serde(rename = "type", default)]
    identity_type: String,
    user_name: Option<String>,
    session_context: Option<SessionContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionContext {
    session_issuer: Option<SessionIssuer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIssuer {
    user_name: Option<String>,
}

/// Check that an `eventVersion` is `1.x` with `x >= 8`.
fn check_version(version: &str) -> anyhow::Result<()> {
    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| anyhow!("malformed audit event version '{version}'"))?;
    let major: u32 = major
        .parse()
        .map_err(|_| anyhow!("malformed audit event version '{version}'"))?;
    let minor: u32 = minor
        .parse()
        .map_err(|_| anyhow!("malformed audit event version '{version}'"))?;

    if major != 1 || minor < MIN_MINOR_VERSION {
        return Err(anyhow!(
            "unsupported audit event version {version}, need 1.{MIN_MINOR_VERSION} or newer"
        ));
    }
    Ok(())
}

/// Decode who issued `event`. Unreadable or unsupported payloads are Findings.
pub fn decode_actor(event: &AuditEvent) -> anyhow::Result<Actor> {
    let payload: AuditPayload = serde_json::from_str(&event.payload)
        .finding(format!("could not parse audit event {}", event.event_id))?;
    check_version(&payload.event_version)
        .map_err(|e| as_finding(e, format!("cannot decode audit event {}", event.event_id)))?;

    let identity = payload.user_identity;
    let issuer_username = identity
        .session_context
        .and_then(|c| c.session_issuer)
        .and_then(|i| i.user_name)
        .unwrap_or_default();
    let username = event
        .username
        .clone()
        .or(identity.user_name)
        .unwrap_or_default();

    Ok(Actor {
        username,
        issuer_username,
        identity_type: identity.identity_type,
    })
}

/// Substring allow-lists for actors permitted to stop cluster instances.
#[derive(Debug, Clone)]
pub struct AllowLists {
    pub users: Vec<String>,
    pub roles: Vec<String>,
    /// Role accepted only on non-CCS clusters, where we own the account.
    pub non_ccs_roles: Vec<String>,
}

impl Default for AllowLists {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(ToString::to_string).collect()
        };
        Self {
            users: owned(&[
                "openshift-machine-api-aws",
                "osdCcsAdmin",
                "osdManagedAdmin",
                "RH-SRE-",
            ]),
            roles: owned(&[
                "openshift-machine-api-aws",
                "-Installer-Role",
                "-Support-Role",
                "ManagedOpenShift-Support-",
            ]),
            non_ccs_roles: owned(&["OrganizationAccountAccessRole"]),
        }
    }
}

impl AllowLists {
    fn patterns(&self, ccs: bool) -> impl Iterator<Item = &str> {
        let conditional: &[String] = if ccs { &[] } else { &self.non_ccs_roles };
        self.users
            .iter()
            .chain(&self.roles)
            .chain(conditional)
            .map(String::as_str)
    }

    /// True when the username or issuer username contains an allowed pattern.
    /// Matching is case-sensitive.
    pub fn is_authorized(&self, username: &str, issuer_username: &str, ccs: bool) -> bool {
        self.patterns(ccs)
            .any(|pattern| username.contains(pattern) || issuer_username.contains(pattern))
    }
}

/// Actor chosen to represent a set of stop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorVerdict {
    pub actor: Actor,
    pub authorized: bool,
}

/// Decode every event in order. The first unauthorized actor wins; if all
/// are authorized, the last one is reported.
pub fn judge_events(
    events: &[AuditEvent],
    allow: &AllowLists,
    ccs: bool,
) -> anyhow::Result<ActorVerdict> {
    let mut last = None;
    for event in events {
        let actor = decode_actor(event)?;
        let authorized = allow.is_authorized(&actor.username, &actor.issuer_username, ccs);
        if !authorized {
            return Ok(ActorVerdict { actor, authorized });
        }
        last = Some(ActorVerdict { actor, authorized });
    }
    last.ok_or_else(|| {
        as_finding(
            anyhow!("no stop or terminate events found"),
            "events may be too old or the audit trail has not caught up yet",
        )
    })
}
