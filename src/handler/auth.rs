// SPDX-License-Identifier: GPL-2.0-or-later

//! Authentication is left to whatever sits in front of this router
//! (DESIGN.md); this extractor only reads the principal the gateway is
//! expected to have already verified and attached as a header. Absent the
//! header (a gateway that hasn't been wired up yet, or a direct local call),
//! falls back to `Principal::system()` rather than rejecting the request.

use axum::{extract::FromRequestParts, http::request::Parts};
use common::Principal;
use std::convert::Infallible;

const PRINCIPAL_HEADER: &str = "x-principal";

pub struct AuthPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Principal::new)
            .unwrap_or_else(Principal::system);
        Ok(Self(principal))
    }
}

/// Appends one row to the audit trail (§C.1). Best-effort: a store hiccup
/// here is logged but never fails the request that triggered it — the
/// action already happened.
pub(crate) async fn record(state: &crate::state::AppState, principal: &Principal, camera_id: Option<common::CameraId>, message: impl Into<String>) {
    let message = message.into();
    let entry = metastore::AuditEntry {
        at: common::time::UnixNano::now(),
        level: common::LogLevel::Info,
        source: common::LogSource::try_from("handler").expect("literal source name fits"),
        camera_id,
        principal: principal.as_str().to_owned(),
        message: common::LogMessage::try_from(message).expect("audit message within length limit"),
    };
    if let Err(e) = state.store.audit_append(entry).await {
        state.logger.log(common::LogEntry::new(
            common::LogLevel::Warning,
            "handler",
            None,
            format!("audit append failed: {e}"),
        ));
    }
}
