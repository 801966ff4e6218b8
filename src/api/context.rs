//! Purpose: Immutable bundle of configuration and collaborator handles for read paths.
//! Exports: `AppContext`, `ReadConfig`, `XrpcOutput`.
//! Role: Passed explicitly into every handler; nothing here is ambient or global.
//! Invariants: Built once at startup; shared read-only across concurrent requests.
use super::aggregator::Aggregator;
use super::auth::{AccessVerifier, ServiceAuth};
use super::local::LocalRecordSource;
use super::store::Store;
use crate::core::paginate::{PageLimits, Paginator};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_OVERLAY_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug)]
pub struct ReadConfig {
    /// DID this node presents as on proxied calls.
    pub service_did: String,
    pub proxy_reads: bool,
    pub limits: PageLimits,
    /// How far back pending local records are considered possibly unindexed.
    pub overlay_window: Duration,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            service_did: "did:web:localhost".to_string(),
            proxy_reads: false,
            limits: PageLimits::default(),
            overlay_window: DEFAULT_OVERLAY_WINDOW,
        }
    }
}

#[derive(Clone)]
pub struct AppContext {
    config: ReadConfig,
    store: Arc<dyn Store>,
    local: Arc<dyn LocalRecordSource>,
    aggregator: Option<Arc<dyn Aggregator>>,
    service_auth: Option<ServiceAuth>,
    verifier: AccessVerifier,
}

impl AppContext {
    pub fn new(
        config: ReadConfig,
        store: Arc<dyn Store>,
        local: Arc<dyn LocalRecordSource>,
    ) -> Self {
        Self {
            config,
            store,
            local,
            aggregator: None,
            service_auth: None,
            verifier: AccessVerifier::default(),
        }
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>, signer: ServiceAuth) -> Self {
        self.aggregator = Some(aggregator);
        self.service_auth = Some(signer);
        self
    }

    pub fn with_verifier(mut self, verifier: AccessVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn local(&self) -> &dyn LocalRecordSource {
        self.local.as_ref()
    }

    pub fn aggregator(&self) -> Option<&dyn Aggregator> {
        self.aggregator.as_deref()
    }

    pub fn service_auth(&self) -> Option<&ServiceAuth> {
        self.service_auth.as_ref()
    }

    pub fn verifier(&self) -> &AccessVerifier {
        &self.verifier
    }

    pub fn paginator(&self) -> Paginator {
        Paginator::new(self.config.limits)
    }
}

/// Endpoint result plus the upstream lag the read-after-write overlay observed.
#[derive(Clone, Debug, PartialEq)]
pub struct XrpcOutput<T> {
    pub body: T,
    pub upstream_lag_ms: Option<i64>,
}

impl<T> XrpcOutput<T> {
    pub fn new(body: T) -> Self {
        Self {
            body,
            upstream_lag_ms: None,
        }
    }
}
