//! Purpose: Not-yet-indexed local records and the view patches that apply them.
//! Exports: `LocalRecordSource`, `LocalRecords`, `LocalRecord`, `ProfileRecord`, `PostRecord`,
//! `ProfileFields`, `merge_local_posts_into_feed`.
//! Role: Consumed collaborator plus the pure helpers the read-after-write munges call.
//! Invariants: Helpers are idempotent; applying the same records twice changes nothing more.
//! Invariants: Only posts strictly newer than the page's last item are inserted.
use super::store::ApiResult;
use super::views::{FeedViewPost, PostView, ProfileViewBasic, ProfileViewDetailed};
use crate::core::keyset::{KeysetValue, timestamp_ms};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord<T> {
    pub uri: String,
    pub cid: String,
    pub indexed_at: String,
    pub record: T,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalRecords {
    pub count: usize,
    pub profile: Option<LocalRecord<ProfileRecord>>,
    /// Oldest first.
    pub posts: Vec<LocalRecord<PostRecord>>,
}

impl LocalRecords {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drops records at or before `watermark_ms`; the aggregator already has those.
    pub fn newer_than(mut self, watermark_ms: i64) -> Self {
        let fresh = |indexed_at: &str| timestamp_ms(indexed_at).is_ok_and(|at| at > watermark_ms);
        self.profile = self.profile.filter(|profile| fresh(&profile.indexed_at));
        self.posts.retain(|post| fresh(&post.indexed_at));
        self.count = self.posts.len() + usize::from(self.profile.is_some());
        self
    }

    pub fn oldest_indexed_at_ms(&self) -> Option<i64> {
        self.profile
            .iter()
            .map(|profile| profile.indexed_at.as_str())
            .chain(self.posts.iter().map(|post| post.indexed_at.as_str()))
            .filter_map(|at| timestamp_ms(at).ok())
            .min()
    }
}

#[async_trait]
pub trait LocalRecordSource: Send + Sync {
    /// Records written by `did` at or after `since` (RFC 3339) that may not be indexed yet.
    async fn pending_records(&self, did: &str, since: &str) -> ApiResult<LocalRecords>;
}

/// Profile views that carry mutable profile-record fields.
pub trait ProfileFields {
    fn apply_profile_record(&mut self, record: &ProfileRecord);

    fn with_profile_record(mut self, record: &ProfileRecord) -> Self
    where
        Self: Sized,
    {
        self.apply_profile_record(record);
        self
    }
}

impl ProfileFields for ProfileViewBasic {
    fn apply_profile_record(&mut self, record: &ProfileRecord) {
        self.display_name = record.display_name.clone();
        self.avatar = record.avatar.clone();
    }
}

impl ProfileFields for ProfileViewDetailed {
    fn apply_profile_record(&mut self, record: &ProfileRecord) {
        self.display_name = record.display_name.clone();
        self.description = record.description.clone();
        self.avatar = record.avatar.clone();
        self.banner = record.banner.clone();
    }
}

pub fn feed_item_key(item: &FeedViewPost) -> Option<KeysetValue> {
    timestamp_ms(item.sort_at())
        .ok()
        .map(|at| KeysetValue::new(at, item.post.cid.clone()))
}

pub fn format_local_post(
    post: &LocalRecord<PostRecord>,
    author: &ProfileViewBasic,
) -> Option<FeedViewPost> {
    let record = serde_json::to_value(&post.record).ok()?;
    Some(FeedViewPost {
        post: PostView {
            uri: post.uri.clone(),
            cid: post.cid.clone(),
            author: author.clone(),
            record,
            reply_count: 0,
            repost_count: 0,
            like_count: 0,
            indexed_at: post.indexed_at.clone(),
        },
        reason: None,
    })
}

/// Inserts pending posts into a descending feed page at their keyset positions.
pub fn merge_local_posts_into_feed(
    mut feed: Vec<FeedViewPost>,
    posts: &[LocalRecord<PostRecord>],
    author: &ProfileViewBasic,
) -> Vec<FeedViewPost> {
    if posts.is_empty() {
        return feed;
    }
    // Older pending posts belong to a later page of the aggregator's index.
    let floor = feed.last().and_then(feed_item_key);
    let mut present: HashSet<String> = feed.iter().map(|item| item.post.uri.clone()).collect();

    for post in posts.iter().rev() {
        if present.contains(&post.uri) {
            continue;
        }
        let Ok(at) = timestamp_ms(&post.indexed_at) else {
            continue;
        };
        let key = KeysetValue::new(at, post.cid.clone());
        if floor.as_ref().is_some_and(|floor| key <= *floor) {
            continue;
        }
        let Some(item) = format_local_post(post, author) else {
            continue;
        };
        let idx = feed
            .iter()
            .position(|existing| feed_item_key(existing).is_none_or(|existing| existing < key));
        match idx {
            Some(idx) => feed.insert(idx, item),
            None => feed.push(item),
        }
        present.insert(post.uri.clone());
    }
    feed
}

#[cfg(test)]
mod tests {
    use super::{
        LocalRecord, LocalRecords, PostRecord, ProfileFields, ProfileRecord,
        merge_local_posts_into_feed,
    };
    use crate::api::views::{FeedViewPost, PostView, ProfileViewBasic, ProfileViewDetailed};
    use serde_json::json;

    fn author() -> ProfileViewBasic {
        ProfileViewBasic {
            did: "did:ex:alice".to_string(),
            handle: "alice.test".to_string(),
            ..ProfileViewBasic::default()
        }
    }

    fn item(uri: &str, at: &str) -> FeedViewPost {
        FeedViewPost {
            post: PostView {
                uri: uri.to_string(),
                cid: format!("cid-{uri}"),
                author: author(),
                record: json!({"text": uri}),
                reply_count: 0,
                repost_count: 0,
                like_count: 0,
                indexed_at: at.to_string(),
            },
            reason: None,
        }
    }

    fn local_post(uri: &str, at: &str) -> LocalRecord<PostRecord> {
        LocalRecord {
            uri: uri.to_string(),
            cid: format!("cid-{uri}"),
            indexed_at: at.to_string(),
            record: PostRecord {
                text: uri.to_string(),
                created_at: at.to_string(),
                reply: None,
                embed: None,
            },
        }
    }

    fn uris(feed: &[FeedViewPost]) -> Vec<&str> {
        feed.iter().map(|item| item.post.uri.as_str()).collect()
    }

    #[test]
    fn local_posts_merge_in_keyset_order() {
        let feed = vec![item("p3", "2023-06-01T00:00:30Z"), item("p1", "2023-06-01T00:00:10Z")];
        let posts = vec![
            local_post("old", "2023-06-01T00:00:05Z"),
            local_post("mid", "2023-06-01T00:00:20Z"),
            local_post("new", "2023-06-01T00:00:40Z"),
        ];
        let merged = merge_local_posts_into_feed(feed, &posts, &author());
        assert_eq!(uris(&merged), vec!["new", "p3", "mid", "p1"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let feed = vec![item("p1", "2023-06-01T00:00:10Z")];
        let posts = vec![local_post("new", "2023-06-01T00:00:40Z")];
        let once = merge_local_posts_into_feed(feed, &posts, &author());
        let twice = merge_local_posts_into_feed(once.clone(), &posts, &author());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_feed_takes_all_posts_newest_first() {
        let posts = vec![
            local_post("a", "2023-06-01T00:00:01Z"),
            local_post("b", "2023-06-01T00:00:02Z"),
        ];
        let merged = merge_local_posts_into_feed(Vec::new(), &posts, &author());
        assert_eq!(uris(&merged), vec!["b", "a"]);
    }

    #[test]
    fn profile_record_replaces_mutable_fields() {
        let mut view = ProfileViewDetailed {
            did: "did:ex:alice".to_string(),
            handle: "alice.test".to_string(),
            display_name: Some("Old".to_string()),
            banner: Some("old-banner".to_string()),
            followers_count: 4,
            ..ProfileViewDetailed::default()
        };
        let record = ProfileRecord {
            display_name: Some("New".to_string()),
            description: Some("bio".to_string()),
            avatar: Some("avatar-cid".to_string()),
            banner: None,
        };
        view.apply_profile_record(&record);
        assert_eq!(view.display_name.as_deref(), Some("New"));
        assert_eq!(view.description.as_deref(), Some("bio"));
        assert_eq!(view.banner, None);
        assert_eq!(view.followers_count, 4);
    }

    #[test]
    fn watermark_drops_indexed_records() {
        let local = LocalRecords {
            count: 3,
            profile: Some(LocalRecord {
                uri: "at://did:ex:alice/app.bsky.actor.profile/self".to_string(),
                cid: "cid-profile".to_string(),
                indexed_at: "2023-06-01T00:00:01Z".to_string(),
                record: ProfileRecord::default(),
            }),
            posts: vec![
                local_post("a", "2023-06-01T00:00:01Z"),
                local_post("b", "2023-06-01T00:00:09Z"),
            ],
        };
        let fresh = local.newer_than(1_685_577_605_000);
        assert_eq!(fresh.count, 1);
        assert!(fresh.profile.is_none());
        assert_eq!(fresh.posts[0].uri, "b");
        assert_eq!(fresh.oldest_indexed_at_ms(), Some(1_685_577_609_000));
    }
}
