//! Purpose: Turn store rows into wire views, with viewer state when a requester is known.
//! Exports: `Viewer`, `load_viewer`, profile/post view builders.
//! Role: Shared by the local read paths of every endpoint.
use super::auth::Credentials;
use super::store::{ActorRow, ApiResult, PostRow, ProfileCounts, Store, ViewerEdges};
use super::views::{PostView, ProfileView, ProfileViewBasic, ProfileViewDetailed, ViewerState};
use crate::core::exclusion::Relationships;
use std::collections::HashMap;

/// A requester's relationships plus their edges toward the subjects being rendered.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    did: String,
    relationships: Relationships,
    edges: HashMap<String, ViewerEdges>,
}

impl Viewer {
    pub fn new(did: impl Into<String>, relationships: Relationships) -> Self {
        Self {
            did: did.into(),
            relationships,
            edges: HashMap::new(),
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    pub fn add_edges(&mut self, edges: HashMap<String, ViewerEdges>) {
        self.edges.extend(edges);
    }

    /// Loads edges toward `subjects` not already known.
    pub async fn load_edges(&mut self, store: &dyn Store, subjects: &[String]) -> ApiResult<()> {
        let missing: Vec<String> = subjects
            .iter()
            .filter(|subject| !self.edges.contains_key(subject.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let edges = store.viewer_edges(&self.did, &missing).await?;
        self.add_edges(edges);
        Ok(())
    }

    pub fn state(&self, subject: &str) -> ViewerState {
        let edges = self.edges.get(subject);
        ViewerState {
            muted: self.relationships.muting.contains(subject),
            blocked_by: self.relationships.blocked_by.contains(subject),
            blocking: edges.and_then(|edges| edges.blocking.clone()),
            following: edges.and_then(|edges| edges.following.clone()),
        }
    }
}

/// Viewer for access callers, with edges toward `subjects`; none for roles and anonymous callers.
pub async fn load_viewer(
    store: &dyn Store,
    credentials: &Credentials,
    subjects: &[String],
) -> ApiResult<Option<Viewer>> {
    let Some(requester) = credentials.requester() else {
        return Ok(None);
    };
    let mut viewer = Viewer::new(requester, store.relationships(requester).await?);
    viewer.load_edges(store, subjects).await?;
    Ok(Some(viewer))
}

fn viewer_state(viewer: Option<&Viewer>, did: &str) -> Option<ViewerState> {
    viewer.map(|viewer| viewer.state(did))
}

pub fn profile_basic(row: &ActorRow, viewer: Option<&Viewer>) -> ProfileViewBasic {
    ProfileViewBasic {
        did: row.did.clone(),
        handle: row.handle.clone(),
        display_name: row.display_name.clone(),
        avatar: row.avatar.clone(),
        viewer: viewer_state(viewer, &row.did),
    }
}

pub fn profile_view(row: &ActorRow, viewer: Option<&Viewer>) -> ProfileView {
    ProfileView {
        did: row.did.clone(),
        handle: row.handle.clone(),
        display_name: row.display_name.clone(),
        description: row.description.clone(),
        avatar: row.avatar.clone(),
        indexed_at: row.indexed_at.clone(),
        viewer: viewer_state(viewer, &row.did),
    }
}

pub fn profile_detailed(
    row: &ActorRow,
    counts: ProfileCounts,
    viewer: Option<&Viewer>,
) -> ProfileViewDetailed {
    ProfileViewDetailed {
        did: row.did.clone(),
        handle: row.handle.clone(),
        display_name: row.display_name.clone(),
        description: row.description.clone(),
        avatar: row.avatar.clone(),
        banner: row.banner.clone(),
        followers_count: counts.followers,
        follows_count: counts.follows,
        posts_count: counts.posts,
        indexed_at: row.indexed_at.clone(),
        viewer: viewer_state(viewer, &row.did),
    }
}

/// Basic views keyed by DID; DIDs missing from `rows` render as bare identities.
pub fn basic_views(
    dids: &[String],
    rows: &[ActorRow],
    viewer: Option<&Viewer>,
) -> HashMap<String, ProfileViewBasic> {
    let by_did: HashMap<&str, &ActorRow> = rows.iter().map(|row| (row.did.as_str(), row)).collect();
    dids.iter()
        .map(|did| {
            let view = match by_did.get(did.as_str()) {
                Some(row) => profile_basic(row, viewer),
                None => ProfileViewBasic {
                    did: did.clone(),
                    handle: did.clone(),
                    viewer: viewer_state(viewer, did),
                    ..ProfileViewBasic::default()
                },
            };
            (did.clone(), view)
        })
        .collect()
}

pub fn post_view(row: &PostRow, author: ProfileViewBasic) -> PostView {
    PostView {
        uri: row.uri.clone(),
        cid: row.cid.clone(),
        author,
        record: row.record.clone(),
        reply_count: row.reply_count,
        repost_count: row.repost_count,
        like_count: row.like_count,
        indexed_at: row.indexed_at.clone(),
    }
}
