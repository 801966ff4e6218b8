//! Purpose: `app.bsky.actor.getProfile` read path.
//! Exports: `get_profile`.
//! Role: Transport-independent handler; the HTTP layer only parses params and renders output.
#![allow(clippy::result_large_err)]

use super::auth::Credentials;
use super::context::{AppContext, XrpcOutput};
use super::hydrate::{load_viewer, profile_detailed};
use super::overlay::{ProfileMunge, handle_read_after_write};
use super::proxy::{ProxyRouter, ReadPath};
use super::store::ApiResult;
use super::validation::{resolve_profile, validate_actor};
use super::views::{ProfileParams, ProfileViewDetailed};
use axum::http::HeaderMap;

pub async fn get_profile(
    ctx: &AppContext,
    credentials: &Credentials,
    headers: &HeaderMap,
    params: ProfileParams,
) -> ApiResult<XrpcOutput<ProfileViewDetailed>> {
    let requester = credentials.require_access()?;
    validate_actor(&params.actor)?;
    let path = ProxyRouter::route(ctx, headers);
    tracing::debug!(path = path.label(), actor = %params.actor, "getProfile");
    match path {
        ReadPath::Remote(aggregator) => {
            let auth = ProxyRouter::auth_headers(ctx, credentials, headers)?;
            let res = aggregator.get_profile(&params, &auth).await?;
            if res.data.did == requester {
                return Ok(handle_read_after_write(ctx, requester, res, &ProfileMunge)
                    .await
                    .into());
            }
            Ok(XrpcOutput::new(res.data))
        }
        ReadPath::Local => local_profile(ctx, credentials, &params).await.map(XrpcOutput::new),
    }
}

async fn local_profile(
    ctx: &AppContext,
    credentials: &Credentials,
    params: &ProfileParams,
) -> ApiResult<ProfileViewDetailed> {
    let store = ctx.store();
    let row = resolve_profile(store, &params.actor, false).await?;

    let subjects = [row.did.clone()];
    let (counts, viewer) = tokio::join!(
        store.profile_counts(&row.did),
        load_viewer(store, credentials, &subjects)
    );
    Ok(profile_detailed(&row, counts?, viewer?.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::get_profile;
    use crate::api::auth::{Credentials, ServiceAuth};
    use crate::api::context::{AppContext, ReadConfig};
    use crate::api::memory::MemoryStore;
    use crate::api::testing::{StaticAggregator, recent};
    use crate::api::views::{ProfileParams, ProfileViewDetailed};
    use crate::core::error::ErrorKind;
    use axum::http::HeaderMap;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> Arc<MemoryStore> {
        let fixture = json!({
            "actors": [
                {"did": "did:ex:alice", "handle": "alice.test", "displayName": "Alice"},
                {"did": "did:ex:bob", "handle": "bob.test"},
                {"did": "did:ex:gone", "handle": "gone.test", "takenDown": true}
            ],
            "follows": [
                {"uri": "at://alice/follow/1", "cid": "f1", "creator": "did:ex:alice",
                 "subject": "did:ex:bob", "createdAt": "2023-06-01T00:00:01Z"}
            ],
            "mutes": [{"creator": "did:ex:alice", "subject": "did:ex:bob"}],
            "pending": {
                "did:ex:alice": {
                    "profile": {
                        "uri": "at://did:ex:alice/app.bsky.actor.profile/self",
                        "cid": "cid-profile",
                        "indexedAt": recent(2),
                        "record": {"displayName": "Alice Fresh"}
                    }
                }
            }
        });
        Arc::new(MemoryStore::from_json(&fixture.to_string()).expect("fixture"))
    }

    fn alice() -> Credentials {
        Credentials::Access {
            did: "did:ex:alice".to_string(),
        }
    }

    fn params(actor: &str) -> ProfileParams {
        ProfileParams {
            actor: actor.to_string(),
        }
    }

    #[tokio::test]
    async fn local_profile_carries_counts_and_viewer_state() {
        let store = store();
        let ctx = AppContext::new(ReadConfig::default(), store.clone(), store);
        let out = get_profile(&ctx, &alice(), &HeaderMap::new(), params("bob.test"))
            .await
            .expect("profile");
        assert_eq!(out.body.followers_count, 1);
        let viewer = out.body.viewer.expect("viewer");
        assert!(viewer.muted);
        assert_eq!(viewer.following.as_deref(), Some("at://alice/follow/1"));
        assert_eq!(out.upstream_lag_ms, None);
    }

    #[tokio::test]
    async fn local_profile_errors() {
        let store = store();
        let ctx = AppContext::new(ReadConfig::default(), store.clone(), store);
        let headers = HeaderMap::new();
        let missing = get_profile(&ctx, &alice(), &headers, params("nobody.test"))
            .await
            .expect_err("missing");
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let gone = get_profile(&ctx, &alice(), &headers, params("gone.test"))
            .await
            .expect_err("takedown");
        assert_eq!(gone.kind(), ErrorKind::AccountTakedown);
    }

    #[tokio::test]
    async fn profile_requires_access_credentials() {
        let store = store();
        let aggregator = Arc::new(StaticAggregator::default());
        let config = ReadConfig {
            proxy_reads: true,
            ..ReadConfig::default()
        };
        let ctx = AppContext::new(config, store.clone(), store).with_aggregator(
            aggregator.clone(),
            ServiceAuth::new("did:web:aggregator.test", b"key".to_vec()),
        );
        let headers = HeaderMap::new();
        for credentials in [Credentials::Anonymous, Credentials::Role { admin: true }] {
            let err = get_profile(&ctx, &credentials, &headers, params("bob.test"))
                .await
                .expect_err("access required");
            assert_eq!(err.kind(), ErrorKind::AuthRequired);
        }
        assert!(aggregator.calls().is_empty());
    }

    #[tokio::test]
    async fn proxied_own_profile_gets_fresh_profile_record() {
        let store = store();
        let stale = ProfileViewDetailed {
            did: "did:ex:alice".to_string(),
            handle: "alice.test".to_string(),
            display_name: Some("Alice".to_string()),
            followers_count: 7,
            indexed_at: Some(recent(600)),
            ..ProfileViewDetailed::default()
        };
        let aggregator = Arc::new(StaticAggregator::default().with_profile(stale.clone()));
        let config = ReadConfig {
            proxy_reads: true,
            ..ReadConfig::default()
        };
        let ctx = AppContext::new(config, store.clone(), store).with_aggregator(
            aggregator.clone(),
            ServiceAuth::new("did:web:aggregator.test", b"key".to_vec()),
        );

        let own = get_profile(&ctx, &alice(), &HeaderMap::new(), params("alice.test"))
            .await
            .expect("own");
        assert_eq!(own.body.display_name.as_deref(), Some("Alice Fresh"));
        assert_eq!(own.body.followers_count, 7);
        assert!(own.upstream_lag_ms.is_some());

        let bob = Credentials::Access {
            did: "did:ex:bob".to_string(),
        };
        let other = get_profile(&ctx, &bob, &HeaderMap::new(), params("alice.test"))
            .await
            .expect("other");
        assert_eq!(other.body, stale);
        assert_eq!(aggregator.calls().len(), 2);
    }
}
