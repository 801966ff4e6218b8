//! Purpose: Decide once per request whether a read is served locally or by the aggregator.
//! Exports: `ReadPath`, `ProxyRouter`, `PROXY_HOP_HEADER`.
//! Role: Read-path selection and outbound credential forwarding.
//! Invariants: The path is chosen at request start and never re-evaluated mid-request.
//! Invariants: A request that already crossed a proxy hop is never proxied again.
use super::aggregator::Aggregator;
use super::auth::{AuthHeaders, Credentials};
use super::context::AppContext;
use super::store::ApiResult;
use crate::core::error::{Error, ErrorKind};
use axum::http::HeaderMap;

/// Set on outbound proxied calls; its presence on an inbound call marks a proxy hop.
pub const PROXY_HOP_HEADER: &str = "atproto-proxy-hop";

pub enum ReadPath<'a> {
    Local,
    Remote(&'a dyn Aggregator),
}

impl ReadPath<'_> {
    pub fn is_remote(&self) -> bool {
        matches!(self, ReadPath::Remote(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadPath::Local => "local",
            ReadPath::Remote(_) => "remote",
        }
    }
}

pub struct ProxyRouter;

impl ProxyRouter {
    pub fn route<'a>(ctx: &'a AppContext, inbound: &HeaderMap) -> ReadPath<'a> {
        if !ctx.config().proxy_reads {
            return ReadPath::Local;
        }
        let Some(aggregator) = ctx.aggregator() else {
            return ReadPath::Local;
        };
        if ctx.service_auth().is_none() {
            return ReadPath::Local;
        }
        if inbound.contains_key(PROXY_HOP_HEADER) {
            tracing::debug!("inbound request already proxied; serving locally");
            return ReadPath::Local;
        }
        ReadPath::Remote(aggregator)
    }

    /// Service credential for access callers, pass-through for everyone else.
    pub fn auth_headers(
        ctx: &AppContext,
        credentials: &Credentials,
        inbound: &HeaderMap,
    ) -> ApiResult<AuthHeaders> {
        let headers = match credentials {
            Credentials::Access { did } => {
                let signer = ctx.service_auth().ok_or_else(|| {
                    Error::new(ErrorKind::Internal).with_message("no service signer configured")
                })?;
                signer.mint(did)
            }
            Credentials::Role { .. } | Credentials::Anonymous => AuthHeaders::passthru(inbound),
        };
        Ok(headers.with_proxy_hop(ctx.config().service_did.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{PROXY_HOP_HEADER, ProxyRouter};
    use crate::api::auth::{Credentials, ServiceAuth};
    use crate::api::context::{AppContext, ReadConfig};
    use crate::api::memory::MemoryStore;
    use crate::api::testing::StaticAggregator;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    fn context(proxy_reads: bool, with_aggregator: bool) -> AppContext {
        let store = Arc::new(MemoryStore::default());
        let config = ReadConfig {
            proxy_reads,
            ..ReadConfig::default()
        };
        let ctx = AppContext::new(config, store.clone(), store);
        if with_aggregator {
            ctx.with_aggregator(
                Arc::new(StaticAggregator::default()),
                ServiceAuth::new("did:web:aggregator.test", b"k".to_vec()),
            )
        } else {
            ctx
        }
    }

    #[test]
    fn routes_remote_only_when_enabled_and_configured() {
        let inbound = HeaderMap::new();
        assert!(ProxyRouter::route(&context(true, true), &inbound).is_remote());
        assert!(!ProxyRouter::route(&context(false, true), &inbound).is_remote());
        assert!(!ProxyRouter::route(&context(true, false), &inbound).is_remote());
    }

    #[test]
    fn proxied_requests_are_not_proxied_again() {
        let mut inbound = HeaderMap::new();
        inbound.insert(PROXY_HOP_HEADER, HeaderValue::from_static("did:web:pds.test"));
        assert_eq!(ProxyRouter::route(&context(true, true), &inbound).label(), "local");
    }

    #[test]
    fn access_callers_get_service_credentials() {
        let ctx = context(true, true);
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer session-token"));
        let access = Credentials::Access {
            did: "did:ex:alice".to_string(),
        };
        let minted = ProxyRouter::auth_headers(&ctx, &access, &inbound).expect("minted");
        let authorization = minted.authorization.expect("authorization");
        assert!(authorization.starts_with("Bearer iss=did:ex:alice&aud=did:web:aggregator.test"));
        assert_eq!(minted.proxy_hop.as_deref(), Some(ctx.config().service_did.as_str()));

        let role = Credentials::Role { admin: true };
        let passthru = ProxyRouter::auth_headers(&ctx, &role, &inbound).expect("passthru");
        assert_eq!(passthru.authorization.as_deref(), Some("Bearer session-token"));
    }
}
