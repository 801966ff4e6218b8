//! Purpose: Provide the HTTP/XRPC read server for pdsview.
//! Exports: `ServeConfig`, `serve`, `check`, `build_context`.
//! Role: Axum transport over the read handlers; parses query params and renders envelopes.
//! Invariants: Error envelopes are `{error, message}` with the kind's reason code and status.
//! Invariants: Loopback-only unless explicitly allowed.
//! Notes: Every handler runs under the configured request timeout; an expired or
//! disconnected request drops its future and abandons in-flight store/aggregator awaits.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pdsview::api::views::{
    AuthorFeedFilter, AuthorFeedParams, FollowsParams, ListMutesParams, ProfileParams,
};
use pdsview::api::{
    AccessVerifier, AppContext, Error, ErrorKind, HttpAggregator, MemoryStore, PageLimits,
    ReadConfig, ServiceAuth, UPSTREAM_LAG_HEADER, XrpcOutput, normalize_base_url,
    read_signing_key,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub data: Option<PathBuf>,
    pub aggregator_url: Option<String>,
    pub aggregator_did: Option<String>,
    pub aggregator_ca_file: Option<PathBuf>,
    pub proxy_reads: bool,
    pub service_did: String,
    pub signing_key_file: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub default_limit: usize,
    pub max_limit: usize,
    pub overlay_window_secs: u64,
    pub request_timeout_ms: u64,
    pub allow_non_loopback: bool,
}

struct AppState {
    ctx: AppContext,
    request_timeout: Duration,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let state = Arc::new(AppState {
        ctx: build_context(&config)?,
        request_timeout: Duration::from_millis(config.request_timeout_ms),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/xrpc/app.bsky.actor.getProfile", get(get_profile))
        .route("/xrpc/app.bsky.feed.getAuthorFeed", get(get_author_feed))
        .route("/xrpc/app.bsky.graph.getFollows", get(get_follows))
        .route("/xrpc/app.bsky.graph.getListMutes", get(get_list_mutes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        proxy_reads = config.proxy_reads,
        "pdsview listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Internal)
                        .with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

/// Validates the config and loads every collaborator without binding a socket.
pub fn check(config: &ServeConfig) -> Result<Value, Error> {
    validate_config(config)?;
    let ctx = build_context(config)?;
    Ok(json!({
        "check": {
            "bind": config.bind.to_string(),
            "service_did": ctx.config().service_did,
            "proxy_reads": ctx.config().proxy_reads,
            "aggregator_url": config.aggregator_url,
            "aggregator_did": ctx.service_auth().map(|signer| signer.audience().to_string()),
            "default_limit": ctx.config().limits.default_limit,
            "max_limit": ctx.config().limits.max_limit,
            "overlay_window_secs": ctx.config().overlay_window.as_secs(),
            "request_timeout_ms": config.request_timeout_ms,
        }
    }))
}

pub fn build_context(config: &ServeConfig) -> Result<AppContext, Error> {
    let store = Arc::new(match &config.data {
        Some(path) => MemoryStore::load(path)?,
        None => MemoryStore::default(),
    });

    let mut verifier = AccessVerifier::new();
    for (token, did) in store.sessions() {
        verifier = verifier.with_session(token, did);
    }
    if let Some(admin) = &config.admin_token {
        verifier = verifier.with_admin_token(admin.clone());
    }

    let read_config = ReadConfig {
        service_did: config.service_did.clone(),
        proxy_reads: config.proxy_reads,
        limits: PageLimits {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        },
        overlay_window: Duration::from_secs(config.overlay_window_secs),
    };
    let mut ctx = AppContext::new(read_config, store.clone(), store).with_verifier(verifier);

    if let (Some(url), Some(did), Some(key_file)) = (
        &config.aggregator_url,
        &config.aggregator_did,
        &config.signing_key_file,
    ) {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let mut aggregator = HttpAggregator::new(url, timeout)?;
        if let Some(ca_file) = &config.aggregator_ca_file {
            aggregator = aggregator.with_tls_ca_file(ca_file, timeout)?;
        }
        let signer = ServiceAuth::new(did.clone(), read_signing_key(key_file)?);
        ctx = ctx.with_aggregator(Arc::new(aggregator), signer);
    }
    Ok(ctx)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if let Some(url) = &config.aggregator_url {
        normalize_base_url(url).map_err(|err| {
            err.with_hint("Use a base URL like https://appview.example.com (no path).")
        })?;
    }

    if config.proxy_reads {
        if config.aggregator_url.is_none() || config.aggregator_did.is_none() {
            return Err(Error::new(ErrorKind::InvalidRequest)
                .with_message("proxied reads require --aggregator-url and --aggregator-did")
                .with_hint("Configure the aggregator or drop --proxy-reads to serve locally."));
        }
        if config.signing_key_file.is_none() {
            return Err(Error::new(ErrorKind::InvalidRequest)
                .with_message("proxied reads require --signing-key-file")
                .with_hint("Create a key with `pdsview serve init --key-file <path>`."));
        }
    }

    if config.max_limit == 0 {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("--max-limit must be greater than zero")
            .with_hint("Use a positive value like 100."));
    }

    if config.default_limit == 0 || config.default_limit > config.max_limit {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("--default-limit must be between 1 and --max-limit")
            .with_hint("Use a value like 50."));
    }

    if config.request_timeout_ms == 0 {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("--request-timeout-ms must be greater than zero")
            .with_hint("Use a positive value like 30000."));
    }

    if config.overlay_window_secs == 0 {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("--overlay-window-secs must be greater than zero")
            .with_hint("Use a positive value like 600."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

type Params = HashMap<String, String>;

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<Params>,
) -> Response {
    let result = async {
        let params = ProfileParams {
            actor: required(&query, "actor")?,
        };
        let credentials = state.ctx.verifier().verify(&headers)?;
        with_deadline(
            &state,
            pdsview::api::get_profile(&state.ctx, &credentials, &headers, params),
        )
        .await
    };
    xrpc_response(result.await)
}

async fn get_author_feed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<Params>,
) -> Response {
    let result = async {
        let params = AuthorFeedParams {
            actor: required(&query, "actor")?,
            limit: parse_limit(&query)?,
            cursor: query.get("cursor").cloned(),
            filter: parse_filter(&query)?,
        };
        let credentials = state.ctx.verifier().verify(&headers)?;
        with_deadline(
            &state,
            pdsview::api::get_author_feed(&state.ctx, &credentials, &headers, params),
        )
        .await
    };
    xrpc_response(result.await)
}

async fn get_follows(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<Params>,
) -> Response {
    let result = async {
        let params = FollowsParams {
            actor: required(&query, "actor")?,
            limit: parse_limit(&query)?,
            cursor: query.get("cursor").cloned(),
        };
        let credentials = state.ctx.verifier().verify(&headers)?;
        with_deadline(
            &state,
            pdsview::api::get_follows(&state.ctx, &credentials, &headers, params),
        )
        .await
    };
    xrpc_response(result.await)
}

async fn get_list_mutes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<Params>,
) -> Response {
    let result = async {
        let params = ListMutesParams {
            limit: parse_limit(&query)?,
            cursor: query.get("cursor").cloned(),
        };
        let credentials = state.ctx.verifier().verify(&headers)?;
        with_deadline(
            &state,
            pdsview::api::get_list_mutes(&state.ctx, &credentials, &headers, params),
        )
        .await
    };
    xrpc_response(result.await)
}

async fn with_deadline<T>(
    state: &AppState,
    handler: impl Future<Output = Result<XrpcOutput<T>, Error>>,
) -> Result<XrpcOutput<T>, Error> {
    match tokio::time::timeout(state.request_timeout, handler).await {
        Ok(result) => result,
        Err(_) => Err(Error::new(ErrorKind::Upstream)
            .with_message("request deadline exceeded")
            .with_hint("Raise --request-timeout-ms if the aggregator is slow.")),
    }
}

fn required(query: &Params, name: &str) -> Result<String, Error> {
    query.get(name).cloned().ok_or_else(|| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("Params must have the property \"{name}\""))
    })
}

fn parse_limit(query: &Params) -> Result<Option<i64>, Error> {
    query
        .get("limit")
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| {
                Error::new(ErrorKind::InvalidRequest)
                    .with_message(format!("limit must be an integer, got {raw:?}"))
            })
        })
        .transpose()
}

fn parse_filter(query: &Params) -> Result<Option<AuthorFeedFilter>, Error> {
    query
        .get("filter")
        .map(|raw| {
            AuthorFeedFilter::parse(raw).ok_or_else(|| {
                Error::new(ErrorKind::InvalidRequest)
                    .with_message(format!("unknown filter {raw:?}"))
            })
        })
        .transpose()
}

fn xrpc_response<T: Serialize>(result: Result<XrpcOutput<T>, Error>) -> Response {
    match result {
        Ok(output) => {
            let mut response = Json(output.body).into_response();
            if let Some(lag) = output.upstream_lag_ms {
                if let Ok(value) = HeaderValue::from_str(&lag.to_string()) {
                    response.headers_mut().insert(UPSTREAM_LAG_HEADER, value);
                }
            }
            response
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    message: String,
}

fn error_response(err: Error) -> Response {
    let kind = err.kind();
    let status =
        StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    let body = ErrorEnvelope {
        error: kind.reason(),
        message: err.message().unwrap_or(kind.reason()).to_string(),
    };
    (status, Json(body)).into_response()
}
