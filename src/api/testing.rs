//! Purpose: In-process fakes shared by the unit tests of the read paths.
//! Exports: `StaticAggregator`, `FailingLocalRecords`, `feed_item`, `recent`.
//! Role: Test-only collaborators; compiled under `cfg(test)`.
use super::aggregator::{Aggregator, AggregatorResponse};
use super::auth::AuthHeaders;
use super::local::{LocalRecordSource, LocalRecords};
use super::store::ApiResult;
use super::views::{
    AuthorFeedOutput, AuthorFeedParams, FeedViewPost, FollowsOutput, FollowsParams,
    ListMutesOutput, ListMutesParams, PostView, ProfileParams, ProfileViewBasic,
    ProfileViewDetailed,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::keyset::{format_timestamp_ms, now_ms};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub nsid: &'static str,
    pub auth: AuthHeaders,
    pub cursor: Option<String>,
}

/// Aggregator that answers from canned responses and records every call.
#[derive(Default)]
pub struct StaticAggregator {
    profile: Option<ProfileViewDetailed>,
    author_feed: Option<AuthorFeedOutput>,
    follows: Option<FollowsOutput>,
    list_mutes: Option<ListMutesOutput>,
    failure: Option<ErrorKind>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StaticAggregator {
    pub fn with_profile(mut self, profile: ProfileViewDetailed) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_author_feed(mut self, feed: AuthorFeedOutput) -> Self {
        self.author_feed = Some(feed);
        self
    }

    pub fn with_follows(mut self, follows: FollowsOutput) -> Self {
        self.follows = Some(follows);
        self
    }

    pub fn with_list_mutes(mut self, lists: ListMutesOutput) -> Self {
        self.list_mutes = Some(lists);
        self
    }

    pub fn failing(mut self, kind: ErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn answer<T: Clone>(
        &self,
        nsid: &'static str,
        cursor: Option<&str>,
        auth: &AuthHeaders,
        canned: &Option<T>,
    ) -> ApiResult<AggregatorResponse<T>> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            nsid,
            auth: auth.clone(),
            cursor: cursor.map(str::to_string),
        });
        if let Some(kind) = self.failure {
            return Err(Error::new(kind).with_message(format!("{nsid} failed upstream")));
        }
        canned
            .clone()
            .map(AggregatorResponse::new)
            .ok_or_else(|| {
                Error::new(ErrorKind::Upstream).with_message(format!("no canned {nsid}"))
            })
    }
}

#[async_trait]
impl Aggregator for StaticAggregator {
    async fn get_profile(
        &self,
        _params: &ProfileParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ProfileViewDetailed>> {
        self.answer("app.bsky.actor.getProfile", None, auth, &self.profile)
    }

    async fn get_author_feed(
        &self,
        params: &AuthorFeedParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<AuthorFeedOutput>> {
        self.answer(
            "app.bsky.feed.getAuthorFeed",
            params.cursor.as_deref(),
            auth,
            &self.author_feed,
        )
    }

    async fn get_follows(
        &self,
        params: &FollowsParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<FollowsOutput>> {
        self.answer(
            "app.bsky.graph.getFollows",
            params.cursor.as_deref(),
            auth,
            &self.follows,
        )
    }

    async fn get_list_mutes(
        &self,
        params: &ListMutesParams,
        auth: &AuthHeaders,
    ) -> ApiResult<AggregatorResponse<ListMutesOutput>> {
        self.answer(
            "app.bsky.graph.getListMutes",
            params.cursor.as_deref(),
            auth,
            &self.list_mutes,
        )
    }
}

pub struct FailingLocalRecords;

#[async_trait]
impl LocalRecordSource for FailingLocalRecords {
    async fn pending_records(&self, _did: &str, _since: &str) -> ApiResult<LocalRecords> {
        Err(Error::new(ErrorKind::Internal).with_message("local record store unavailable"))
    }
}

/// RFC 3339 timestamp `secs_ago` seconds before now.
pub fn recent(secs_ago: i64) -> String {
    format_timestamp_ms(now_ms() - secs_ago * 1000).expect("timestamp")
}

pub fn feed_item(author: &ProfileViewBasic, rkey: &str, indexed_at: &str) -> FeedViewPost {
    FeedViewPost {
        post: PostView {
            uri: format!("at://{}/app.bsky.feed.post/{rkey}", author.did),
            cid: format!("cid-{rkey}"),
            author: author.clone(),
            record: json!({"text": rkey, "createdAt": indexed_at}),
            reply_count: 0,
            repost_count: 0,
            like_count: 0,
            indexed_at: indexed_at.to_string(),
        },
        reason: None,
    }
}
