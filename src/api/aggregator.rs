//! Purpose: Remote aggregator read client (XRPC over HTTP/JSON).
//! Exports: `Aggregator`, `AggregatorResponse`, `HttpAggregator`.
//! Role: Consumed collaborator for the REMOTE read path.
//! Invariants: One shared `ureq::Agent` (bounded, reused connection pool) serves every request.
//! Invariants: Aggregator error envelopes map back onto `ErrorKind` by reason code.
//! Invariants: Transport failures surface as `Upstream`; nothing degrades to an empty page.
#![allow(clippy::result_large_err)]

use super::auth::AuthHeaders;
use super::store::ApiResult;
use super::views::{
    AuthorFeedOutput, AuthorFeedParams, FollowsOutput, FollowsParams, ListMutesOutput,
    ListMutesParams, ProfileParams, ProfileViewDetailed,
};
use crate::api::proxy::PROXY_HOP_HEADER;
use crate::core::error::{Error, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, PartialEq)]
pub struct AggregatorResponse<T> {
    pub data: T,
}

impl<T> AggregatorResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn get_profile(
        &self,
        params: &ProfileParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ProfileViewDetailed>>;

    async fn get_author_feed(
        &self,
        params: &AuthorFeedParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<AuthorFeedOutput>>;

    async fn get_follows(
        &self,
        params: &FollowsParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<FollowsOutput>>;

    async fn get_list_mutes(
        &self,
        params: &ListMutesParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ListMutesOutput>>;
}

#[derive(Clone)]
pub struct HttpAggregator {
    inner: Arc<HttpAggregatorInner>,
}

struct HttpAggregatorInner {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct XrpcErrorEnvelope {
    error: String,
    message: Option<String>,
}

impl HttpAggregator {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url)?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            inner: Arc::new(HttpAggregatorInner { base_url, agent }),
        })
    }

    pub fn with_tls_ca_file(self, path: impl AsRef<Path>, timeout: Duration) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::InvalidRequest)
                .with_message(format!("failed to read TLS CA file {}", path.display()))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::InvalidRequest)
                    .with_message(format!("failed to parse TLS CA file {}", path.display()))
                    .with_source(err)
            })?;

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::InvalidRequest).with_message(format!(
                "TLS CA file {} has no usable certificates",
                path.display()
            )));
        }
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let agent = ureq::builder()
            .tls_config(Arc::new(tls_config))
            .timeout(timeout)
            .build();
        Ok(Self {
            inner: Arc::new(HttpAggregatorInner {
                base_url: self.inner.base_url.clone(),
                agent,
            }),
        })
    }

    async fn query<P, R>(&self, nsid: &'static str, params: &P, auth: &AuthHeaders) -> ApiResult<R>
    where
        P: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let url = build_query_url(&self.inner.base_url, nsid, params)?;
        let inner = Arc::clone(&self.inner);
        let auth = auth.clone();
        tokio::task::spawn_blocking(move || inner.get_json(&url, &auth))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("aggregator request task failed")
                    .with_source(err)
            })?
    }
}

impl HttpAggregatorInner {
    fn get_json<R: DeserializeOwned>(&self, url: &Url, auth: &AuthHeaders) -> ApiResult<R> {
        let mut request = self
            .agent
            .get(url.as_str())
            .set("Accept", "application/json");
        if let Some(authorization) = &auth.authorization {
            request = request.set("Authorization", authorization);
        }
        if let Some(hop) = &auth.proxy_hop {
            request = request.set(PROXY_HOP_HEADER, hop);
        }
        match request.call() {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => {
                tracing::warn!(url = %url, error = %err, "aggregator transport failure");
                Err(Error::new(ErrorKind::Upstream)
                    .with_message("aggregator request failed")
                    .with_source(err))
            }
        }
    }
}

#[async_trait]
impl Aggregator for HttpAggregator {
    async fn get_profile(
        &self,
        params: &ProfileParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ProfileViewDetailed>> {
        self.query("app.bsky.actor.getProfile", params, auth)
            .await
            .map(AggregatorResponse::new)
    }

    async fn get_author_feed(
        &self,
        params: &AuthorFeedParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<AuthorFeedOutput>> {
        self.query("app.bsky.feed.getAuthorFeed", params, auth)
            .await
            .map(AggregatorResponse::new)
    }

    async fn get_follows(
        &self,
        params: &FollowsParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<FollowsOutput>> {
        self.query("app.bsky.graph.getFollows", params, auth)
            .await
            .map(AggregatorResponse::new)
    }

    async fn get_list_mutes(
        &self,
        params: &ListMutesParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ListMutesOutput>> {
        self.query("app.bsky.graph.getListMutes", params, auth)
            .await
            .map(AggregatorResponse::new)
    }
}

pub fn normalize_base_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message("invalid aggregator url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("aggregator url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("aggregator url must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_query_url<P: Serialize>(base_url: &Url, nsid: &str, params: &P) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::InvalidRequest).with_message("aggregator url cannot be a base")
        })?;
        path.clear();
        path.push("xrpc");
        path.push(nsid);
    }
    let value = serde_json::to_value(params).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode query params")
            .with_source(err)
    })?;
    if let Value::Object(map) = value {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(text) => {
                    pairs.append_pair(&key, &text);
                }
                other => {
                    pairs.append_pair(&key, &other.to_string());
                }
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

fn read_json_response<R: DeserializeOwned>(response: ureq::Response) -> ApiResult<R> {
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Upstream)
            .with_message("failed to read aggregator response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Upstream)
            .with_message("invalid aggregator response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    error_from_body(status, &body)
}

fn error_from_body(status: u16, body: &str) -> Error {
    if let Ok(envelope) = serde_json::from_str::<XrpcErrorEnvelope>(body) {
        let kind = ErrorKind::from_reason(&envelope.error)
            .unwrap_or_else(|| error_kind_from_status(status));
        let message = envelope
            .message
            .unwrap_or_else(|| format!("aggregator error {}", envelope.error));
        return Error::new(kind).with_message(message);
    }
    Error::new(error_kind_from_status(status))
        .with_message(format!("aggregator error status {status}"))
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 404 => ErrorKind::InvalidRequest,
        401 | 403 => ErrorKind::AuthRequired,
        _ => ErrorKind::Upstream,
    }
}
