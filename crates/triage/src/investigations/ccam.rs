//! Cloud credentials are missing.
//!
//! When the cloud provider client cannot be built because the customer
//! revoked our access, retrying is pointless: restrict and silence instead.

use crate::actions::{Conclusion, RestrictionAction};
use crate::resolver::{AlertContext, ResolveError};

pub const CREDENTIALS_INVALID_SUMMARY: &str = "Cluster is in Limited Support due to invalid cloud credentials";

/// Messages the cloud provider returns when our credentials were revoked.
const REVOKED_MARKERS: [&str; 3] = [
    "InvalidClientTokenId",
    "AccessDenied",
    "could not assume support role",
];

pub fn credentials_invalid() -> RestrictionAction {
    RestrictionAction::new(
        CREDENTIALS_INVALID_SUMMARY,
        "The platform can no longer access your cloud account because the credentials or \
         roles it uses were removed or altered. Restore them to restore support.",
        "cloud credentials are invalid",
    )
}

/// Whether a resolution failure shows revoked cloud credentials.
pub fn credentials_revoked(err: &ResolveError) -> bool {
    if !matches!(err, ResolveError::CloudProvider { .. }) {
        return false;
    }
    let message = format!("{:#}", err.raw());
    REVOKED_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Conclusion for a cluster whose cloud credentials were revoked.
pub fn conclude(ctx: &mut AlertContext, err: &ResolveError) -> Conclusion {
    ctx.notes
        .append_warning(format!("Cloud credentials are invalid: {:#}", err.raw()));
    ctx.notes
        .append_automation("Setting restriction: cloud credentials are invalid");
    Conclusion::builder(&ctx.notes)
        .restrict(credentials_invalid())
        .silence("customer revoked cloud credentials")
}
