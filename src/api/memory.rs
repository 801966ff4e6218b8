//! Purpose: In-memory `Store` and `LocalRecordSource` loaded from a JSON fixture.
//! Exports: `MemoryStore`, `Fixture` and its record shapes.
//! Role: Backing data for `pdsview serve --data` and for tests.
//! Invariants: Tables are immutable after load; every query sees the same snapshot.
//! Invariants: Row queries hand the caller's `Query` the full candidate set to filter and bound.
use super::local::{LocalRecord, LocalRecordSource, LocalRecords, PostRecord, ProfileRecord};
use super::store::{
    ActorRow, ApiResult, FeedItemKind, FeedRow, FollowRow, ListRow, PostRow, ProfileCounts, Store,
    ViewerEdges,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::exclusion::Relationships;
use crate::core::keyset::timestamp_ms;
use crate::core::query::Query;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fixture {
    pub actors: Vec<ActorFixture>,
    pub follows: Vec<FollowFixture>,
    pub posts: Vec<PostFixture>,
    pub reposts: Vec<RepostFixture>,
    pub blocks: Vec<BlockFixture>,
    pub mutes: Vec<MuteFixture>,
    pub lists: Vec<ListFixture>,
    pub list_items: Vec<ListItemFixture>,
    pub list_mutes: Vec<ListMuteFixture>,
    /// Pending local writes keyed by author DID.
    pub pending: BTreeMap<String, PendingFixture>,
    /// Access tokens keyed by token, valued by DID.
    pub sessions: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorFixture {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub taken_down: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowFixture {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFixture {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_parent: Option<String>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub like_count: u64,
    pub indexed_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostFixture {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    /// URI of the reposted post.
    pub subject: String,
    pub indexed_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockFixture {
    pub uri: String,
    pub creator: String,
    pub subject: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MuteFixture {
    pub creator: String,
    pub subject: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFixture {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub name: String,
    #[serde(default = "default_list_purpose")]
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
}

fn default_list_purpose() -> String {
    "app.bsky.graph.defs#modlist".to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListItemFixture {
    pub list: String,
    pub subject: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMuteFixture {
    pub creator: String,
    pub list: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingFixture {
    pub profile: Option<LocalRecord<ProfileRecord>>,
    pub posts: Vec<LocalRecord<PostRecord>>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    fixture: Arc<Fixture>,
}

impl MemoryStore {
    pub fn from_fixture(fixture: Fixture) -> Self {
        Self {
            fixture: Arc::new(fixture),
        }
    }

    pub fn from_json(text: &str) -> ApiResult<Self> {
        let fixture: Fixture = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::InvalidRequest)
                .with_message("invalid data fixture")
                .with_hint("The --data file must be a JSON object of actors, follows, posts, ...")
                .with_source(err)
        })?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn load(path: &Path) -> ApiResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::InvalidRequest)
                .with_message(format!("failed to read data file {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json(&text)
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fixture
            .sessions
            .iter()
            .map(|(token, did)| (token.as_str(), did.as_str()))
    }

    fn actor_row(&self, did: &str) -> Option<ActorRow> {
        self.fixture
            .actors
            .iter()
            .find(|actor| actor.did == did)
            .map(actor_row)
    }

    fn post_row(&self, post: &PostFixture) -> PostRow {
        let reply_count = self
            .fixture
            .posts
            .iter()
            .filter(|other| other.reply_parent.as_deref() == Some(post.uri.as_str()))
            .count() as u64;
        let repost_count = self
            .fixture
            .reposts
            .iter()
            .filter(|repost| repost.subject == post.uri)
            .count() as u64;
        PostRow {
            uri: post.uri.clone(),
            cid: post.cid.clone(),
            creator: post.creator.clone(),
            record: post_record(post),
            reply_parent: post.reply_parent.clone(),
            has_media: post.has_media,
            reply_count,
            repost_count,
            like_count: post.like_count,
            indexed_at: post.indexed_at.clone(),
        }
    }

    fn feed_rows(&self) -> Vec<FeedRow> {
        let posts: HashMap<&str, PostRow> = self
            .fixture
            .posts
            .iter()
            .map(|post| (post.uri.as_str(), self.post_row(post)))
            .collect();
        let own = self.fixture.posts.iter().filter_map(|post| {
            let row = posts.get(post.uri.as_str())?;
            Some(FeedRow {
                kind: FeedItemKind::Post,
                uri: row.uri.clone(),
                cid: row.cid.clone(),
                originator: row.creator.clone(),
                sort_at: row.indexed_at.clone(),
                post: row.clone(),
            })
        });
        let reposts = self.fixture.reposts.iter().filter_map(|repost| {
            let post = posts.get(repost.subject.as_str())?;
            Some(FeedRow {
                kind: FeedItemKind::Repost,
                uri: repost.uri.clone(),
                cid: repost.cid.clone(),
                originator: repost.creator.clone(),
                sort_at: repost.indexed_at.clone(),
                post: post.clone(),
            })
        });
        own.chain(reposts).collect()
    }
}

fn actor_row(actor: &ActorFixture) -> ActorRow {
    ActorRow {
        did: actor.did.clone(),
        handle: actor.handle.clone(),
        display_name: actor.display_name.clone(),
        description: actor.description.clone(),
        avatar: actor.avatar.clone(),
        banner: actor.banner.clone(),
        indexed_at: actor.indexed_at.clone(),
        taken_down: actor.taken_down,
    }
}

fn post_record(post: &PostFixture) -> Value {
    let mut record = Map::new();
    record.insert("$type".to_string(), json!("app.bsky.feed.post"));
    record.insert("text".to_string(), json!(post.text));
    record.insert("createdAt".to_string(), json!(post.indexed_at));
    if let Some(parent) = &post.reply_parent {
        record.insert("reply".to_string(), json!({ "parent": { "uri": parent } }));
    }
    if post.has_media {
        record.insert("embed".to_string(), json!({ "$type": "app.bsky.embed.images" }));
    }
    Value::Object(record)
}

fn at_or_after(indexed_at: &str, since_ms: i64) -> bool {
    timestamp_ms(indexed_at).is_ok_and(|at| at >= since_ms)
}

#[async_trait]
impl Store for MemoryStore {
    async fn actor(&self, actor: &str, include_taken_down: bool) -> ApiResult<Option<ActorRow>> {
        Ok(self
            .fixture
            .actors
            .iter()
            .find(|row| row.did == actor || row.handle == actor)
            .filter(|row| include_taken_down || !row.taken_down)
            .map(actor_row))
    }

    async fn actors(&self, dids: &[String]) -> ApiResult<Vec<ActorRow>> {
        Ok(dids.iter().filter_map(|did| self.actor_row(did)).collect())
    }

    async fn profile_counts(&self, did: &str) -> ApiResult<ProfileCounts> {
        let fixture = &self.fixture;
        Ok(ProfileCounts {
            followers: fixture.follows.iter().filter(|f| f.subject == did).count() as u64,
            follows: fixture.follows.iter().filter(|f| f.creator == did).count() as u64,
            posts: fixture.posts.iter().filter(|p| p.creator == did).count() as u64,
        })
    }

    async fn relationships(&self, did: &str) -> ApiResult<Relationships> {
        let fixture = &self.fixture;
        let mut relationships = Relationships::default();
        for block in &fixture.blocks {
            if block.creator == did {
                relationships.blocking.insert(block.subject.clone());
            }
            if block.subject == did {
                relationships.blocked_by.insert(block.creator.clone());
            }
        }
        for mute in fixture.mutes.iter().filter(|mute| mute.creator == did) {
            relationships.muting.insert(mute.subject.clone());
        }
        for list_mute in fixture.list_mutes.iter().filter(|mute| mute.creator == did) {
            relationships.muted_lists.insert(list_mute.list.clone());
        }
        for item in &fixture.list_items {
            if relationships.muted_lists.contains(&item.list) {
                relationships.muting.insert(item.subject.clone());
            }
        }
        Ok(relationships)
    }

    async fn viewer_edges(
        &self,
        viewer: &str,
        subjects: &[String],
    ) -> ApiResult<HashMap<String, ViewerEdges>> {
        let mut edges: HashMap<String, ViewerEdges> = HashMap::new();
        for subject in subjects {
            let following = self
                .fixture
                .follows
                .iter()
                .find(|follow| follow.creator == viewer && follow.subject == *subject)
                .map(|follow| follow.uri.clone());
            let blocking = self
                .fixture
                .blocks
                .iter()
                .find(|block| block.creator == viewer && block.subject == *subject)
                .map(|block| block.uri.clone());
            if following.is_some() || blocking.is_some() {
                edges.insert(subject.clone(), ViewerEdges { following, blocking });
            }
        }
        Ok(edges)
    }

    async fn follows(&self, query: Query<FollowRow>) -> ApiResult<Vec<FollowRow>> {
        let rows = self.fixture.follows.iter().filter_map(|follow| {
            Some(FollowRow {
                uri: follow.uri.clone(),
                cid: follow.cid.clone(),
                creator: follow.creator.clone(),
                created_at: follow.created_at.clone(),
                subject: self.actor_row(&follow.subject)?,
            })
        });
        query.execute(rows)
    }

    async fn feed_items(&self, query: Query<FeedRow>) -> ApiResult<Vec<FeedRow>> {
        query.execute(self.feed_rows())
    }

    async fn lists(&self, query: Query<ListRow>) -> ApiResult<Vec<ListRow>> {
        let rows = self.fixture.lists.iter().map(|list| ListRow {
            uri: list.uri.clone(),
            cid: list.cid.clone(),
            creator: list.creator.clone(),
            name: list.name.clone(),
            purpose: list.purpose.clone(),
            description: list.description.clone(),
            created_at: list.created_at.clone(),
            indexed_at: list.indexed_at.clone(),
        });
        query.execute(rows)
    }
}

#[async_trait]
impl LocalRecordSource for MemoryStore {
    async fn pending_records(&self, did: &str, since: &str) -> ApiResult<LocalRecords> {
        let Some(pending) = self.fixture.pending.get(did) else {
            return Ok(LocalRecords::default());
        };
        let since_ms = timestamp_ms(since)?;
        let profile = pending
            .profile
            .clone()
            .filter(|profile| at_or_after(&profile.indexed_at, since_ms));
        let mut posts: Vec<_> = pending
            .posts
            .iter()
            .filter(|post| at_or_after(&post.indexed_at, since_ms))
            .cloned()
            .collect();
        posts.sort_by_key(|post| timestamp_ms(&post.indexed_at).unwrap_or(i64::MIN));
        Ok(LocalRecords {
            count: posts.len() + usize::from(profile.is_some()),
            profile,
            posts,
        })
    }
}
