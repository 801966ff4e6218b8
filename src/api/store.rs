//! Purpose: Authoritative local store interface and the row shapes it returns.
//! Exports: `Store`, `ActorRow`, `ViewerEdges`, `FollowRow`, `FeedRow`, `FeedItemKind`, `ListRow`, keysets.
//! Role: Consumed collaborator; the in-memory implementation lives in `memory`.
//! Invariants: Row queries execute the caller's `Query` (predicates, bound, order, limit) as given.
//! Invariants: Implementations hold no per-request state; one instance serves all requests.
use crate::core::error::Error;
use crate::core::exclusion::{Blocks, Relationships};
use crate::core::keyset::TimeCidKeyset;
use crate::core::query::Query;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActorRow {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub indexed_at: Option<String>,
    pub taken_down: bool,
}

/// Record URIs of the viewer's edges toward one subject.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ViewerEdges {
    pub following: Option<String>,
    pub blocking: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProfileCounts {
    pub followers: u64,
    pub follows: u64,
    pub posts: u64,
}

/// A follow record joined with its subject's actor row.
#[derive(Clone, Debug, PartialEq)]
pub struct FollowRow {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub created_at: String,
    pub subject: ActorRow,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeedItemKind {
    Post,
    Repost,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PostRow {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub record: Value,
    pub reply_parent: Option<String>,
    pub has_media: bool,
    pub reply_count: u64,
    pub repost_count: u64,
    pub like_count: u64,
    pub indexed_at: String,
}

/// One entry of an actor's feed: their own post or a repost made by them.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedRow {
    pub kind: FeedItemKind,
    pub uri: String,
    pub cid: String,
    pub originator: String,
    pub sort_at: String,
    pub post: PostRow,
}

impl FeedRow {
    pub fn is_repost(&self) -> bool {
        self.kind == FeedItemKind::Repost
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListRow {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub name: String,
    pub purpose: String,
    pub description: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
}

pub fn follow_keyset() -> TimeCidKeyset<FollowRow> {
    TimeCidKeyset::new(|row| row.created_at.as_str(), |row| row.cid.as_str())
}

pub fn feed_keyset() -> TimeCidKeyset<FeedRow> {
    TimeCidKeyset::new(|row| row.sort_at.as_str(), |row| row.cid.as_str())
}

pub fn list_keyset() -> TimeCidKeyset<ListRow> {
    TimeCidKeyset::new(|row| row.created_at.as_str(), |row| row.cid.as_str())
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolves a DID or handle; soft-deleted actors only when asked for.
    async fn actor(&self, actor: &str, include_taken_down: bool) -> ApiResult<Option<ActorRow>>;

    async fn actors(&self, dids: &[String]) -> ApiResult<Vec<ActorRow>>;

    async fn profile_counts(&self, did: &str) -> ApiResult<ProfileCounts>;

    async fn relationships(&self, did: &str) -> ApiResult<Relationships>;

    async fn blocks_between(&self, viewer: &str, subject: &str) -> ApiResult<Blocks> {
        Ok(self.relationships(viewer).await?.blocks_with(subject))
    }

    /// Follow and block record URIs from `viewer` toward each subject that has any.
    async fn viewer_edges(
        &self,
        viewer: &str,
        subjects: &[String],
    ) -> ApiResult<HashMap<String, ViewerEdges>>;

    async fn follows(&self, query: Query<FollowRow>) -> ApiResult<Vec<FollowRow>>;

    async fn feed_items(&self, query: Query<FeedRow>) -> ApiResult<Vec<FeedRow>>;

    async fn lists(&self, query: Query<ListRow>) -> ApiResult<Vec<ListRow>>;
}
