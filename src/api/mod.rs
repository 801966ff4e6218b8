//! Purpose: Public read-path surface for the `pdsview` server and tests.
//! Exports: Endpoint handlers, collaborator traits, the in-memory store, and wire views.
//! Role: Transport-independent; `serve` maps HTTP onto these handlers.
//! Invariants: Handlers take an explicit `AppContext`; no module keeps ambient state.
//! Invariants: Param validation happens before any store or aggregator I/O.

mod actor;
mod aggregator;
mod auth;
mod context;
mod feed;
mod graph;
mod hydrate;
mod local;
mod memory;
mod overlay;
mod proxy;
mod store;
#[cfg(test)]
mod testing;
mod validation;
pub mod views;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::paginate::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, PageLimits};
pub use actor::get_profile;
pub use aggregator::{Aggregator, AggregatorResponse, HttpAggregator, normalize_base_url};
pub use auth::{
    AccessVerifier, AuthHeaders, Credentials, SERVICE_TOKEN_TTL_SECS, ServiceAuth,
    generate_signing_key, read_signing_key,
};
pub use context::{AppContext, DEFAULT_OVERLAY_WINDOW, ReadConfig, XrpcOutput};
pub use feed::get_author_feed;
pub use graph::{get_follows, get_list_mutes};
pub use local::{LocalRecord, LocalRecordSource, LocalRecords, PostRecord, ProfileRecord};
pub use memory::{Fixture, MemoryStore};
pub use overlay::{AuthorFeedMunge, Munge, Overlaid, ProfileMunge, handle_read_after_write};
pub use proxy::{PROXY_HOP_HEADER, ProxyRouter, ReadPath};
pub use store::{
    ActorRow, ApiResult, FeedItemKind, FeedRow, FollowRow, ListRow, PostRow, ProfileCounts, Store,
    ViewerEdges, feed_keyset, follow_keyset, list_keyset,
};

/// Response header carrying the overlay's observed indexing lag in milliseconds.
pub const UPSTREAM_LAG_HEADER: &str = "atproto-upstream-lag";
