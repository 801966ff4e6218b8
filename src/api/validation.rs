//! Purpose: Request checks shared by the read endpoints.
//! Exports: `validate_actor`, `remote_limit`, `resolve_profile`, `is_requester_subject`.
//! Role: Parameter validation before I/O, plus the common actor lookups.
//! Invariants: `validate_actor` and `remote_limit` never touch the store or the network.
#![allow(clippy::result_large_err)]

use super::store::{ActorRow, ApiResult, Store};
use crate::core::error::{Error, ErrorKind};
use crate::core::paginate::{PageLimits, resolve_limit};

pub fn validate_actor(actor: &str) -> ApiResult<()> {
    if actor.is_empty() {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("actor must not be empty")
            .with_hint("Pass a DID or a handle."));
    }
    if actor.chars().any(char::is_whitespace) {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("invalid actor {actor:?}")));
    }
    Ok(())
}

/// Validates and clamps a limit bound for the aggregator; the cursor stays opaque.
pub fn remote_limit(limit: Option<i64>, limits: PageLimits) -> ApiResult<Option<i64>> {
    let Some(limit) = limit else {
        return Ok(None);
    };
    let clamped = resolve_limit(Some(limit), limits)?;
    Ok(Some(i64::try_from(clamped).unwrap_or(i64::MAX)))
}

/// Looks up the actor a direct query names; soft-deleted actors are visible to roles only.
pub async fn resolve_profile(
    store: &dyn Store,
    actor: &str,
    is_role: bool,
) -> ApiResult<ActorRow> {
    let row = store.actor(actor, true).await?.ok_or_else(|| {
        Error::new(ErrorKind::NotFound)
            .with_message("Profile not found")
            .with_actor(actor)
    })?;
    if row.taken_down && !is_role {
        return Err(Error::new(ErrorKind::AccountTakedown)
            .with_message("Account has been taken down")
            .with_actor(actor));
    }
    Ok(row)
}

/// True when `actor` (a DID or handle) names the requester.
pub async fn is_requester_subject(store: &dyn Store, requester: &str, actor: &str) -> bool {
    if actor == requester {
        return true;
    }
    if actor.starts_with("did:") {
        return false;
    }
    match store.actor(actor, true).await {
        Ok(row) => row.is_some_and(|row| row.did == requester),
        Err(err) => {
            tracing::warn!(
                requester,
                actor,
                error = %err,
                "handle lookup failed; skipping overlay"
            );
            false
        }
    }
}
