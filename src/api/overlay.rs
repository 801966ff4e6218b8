//! Purpose: Read-after-write overlay for aggregator responses about the requester's own data.
//! Exports: `ReadView`, `Munge`, `ViewKind`, `ProfileMunge`, `AuthorFeedMunge`, `Overlaid`,
//! `handle_read_after_write`, `apply_overlay`.
//! Role: Splices not-yet-indexed local writes into a proxied response, after the aggregator call.
//! Invariants: No pending records means the response is returned untouched after one lookup.
//! Invariants: The cursor always comes from the aggregator's page, never from overlaid items.
//! Invariants: Munges are idempotent for a fixed (response, pending records) pair.
//! Invariants: Local-record failures fail open to the un-overlaid response.
use super::aggregator::AggregatorResponse;
use super::context::{AppContext, XrpcOutput};
use super::local::{LocalRecords, ProfileFields, merge_local_posts_into_feed};
use super::store::ApiResult;
use super::views::{AuthorFeedOutput, ProfileViewBasic, ProfileViewDetailed};
use crate::core::keyset::{format_timestamp_ms, now_ms, timestamp_ms};

/// Response shapes the overlay can patch.
pub trait ReadView {
    fn cursor(&self) -> Option<&str>;

    fn set_cursor(&mut self, cursor: Option<String>);

    /// Newest `indexedAt` (epoch ms) among returned data that `did` authored.
    fn newest_indexed_by(&self, did: &str) -> Option<i64>;

    /// A basic view of `did` as the aggregator rendered it, if present.
    fn author_view(&self, did: &str) -> Option<ProfileViewBasic>;
}

impl ReadView for ProfileViewDetailed {
    fn cursor(&self) -> Option<&str> {
        None
    }

    fn set_cursor(&mut self, _cursor: Option<String>) {}

    fn newest_indexed_by(&self, did: &str) -> Option<i64> {
        if self.did != did {
            return None;
        }
        self.indexed_at
            .as_deref()
            .and_then(|at| timestamp_ms(at).ok())
    }

    fn author_view(&self, did: &str) -> Option<ProfileViewBasic> {
        (self.did == did).then(|| ProfileViewBasic {
            did: self.did.clone(),
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            viewer: self.viewer.clone(),
        })
    }
}

impl ReadView for AuthorFeedOutput {
    fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    fn set_cursor(&mut self, cursor: Option<String>) {
        self.cursor = cursor;
    }

    fn newest_indexed_by(&self, did: &str) -> Option<i64> {
        self.feed
            .iter()
            .filter_map(|item| match &item.reason {
                Some(reason) if reason.by.did == did => Some(reason.indexed_at.as_str()),
                None if item.post.author.did == did => Some(item.post.indexed_at.as_str()),
                _ => None,
            })
            .filter_map(|at| timestamp_ms(at).ok())
            .max()
    }

    fn author_view(&self, did: &str) -> Option<ProfileViewBasic> {
        self.feed.iter().find_map(|item| {
            if item.post.author.did == did {
                return Some(item.post.author.clone());
            }
            item.reason
                .as_ref()
                .filter(|reason| reason.by.did == did)
                .map(|reason| reason.by.clone())
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViewKind {
    Profile,
    AuthorFeed,
}

impl ViewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::Profile => "profile",
            ViewKind::AuthorFeed => "author_feed",
        }
    }
}

/// View-specific patch strategy applied by the overlay.
pub trait Munge: Send + Sync {
    type View: ReadView + Send;

    const KIND: ViewKind;

    fn munge(
        &self,
        original: Self::View,
        local: &LocalRecords,
        requester: &ProfileViewBasic,
    ) -> Self::View;
}

pub struct ProfileMunge;

impl Munge for ProfileMunge {
    type View = ProfileViewDetailed;

    const KIND: ViewKind = ViewKind::Profile;

    fn munge(
        &self,
        original: ProfileViewDetailed,
        local: &LocalRecords,
        _requester: &ProfileViewBasic,
    ) -> ProfileViewDetailed {
        match &local.profile {
            Some(profile) => original.with_profile_record(&profile.record),
            None => original,
        }
    }
}

pub struct AuthorFeedMunge;

impl Munge for AuthorFeedMunge {
    type View = AuthorFeedOutput;

    const KIND: ViewKind = ViewKind::AuthorFeed;

    fn munge(
        &self,
        original: AuthorFeedOutput,
        local: &LocalRecords,
        requester: &ProfileViewBasic,
    ) -> AuthorFeedOutput {
        let mut author = requester.clone();
        let mut feed = original.feed;
        // First refresh stale embedded copies of the requester's profile.
        if let Some(profile) = &local.profile {
            author.apply_profile_record(&profile.record);
            for item in &mut feed {
                if item.post.author.did == requester.did {
                    item.post.author.apply_profile_record(&profile.record);
                }
                if let Some(reason) = item.reason.as_mut().filter(|r| r.by.did == requester.did) {
                    reason.by.apply_profile_record(&profile.record);
                }
            }
        }
        let feed = merge_local_posts_into_feed(feed, &local.posts, &author);
        AuthorFeedOutput {
            feed,
            cursor: original.cursor,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Overlaid<V> {
    pub data: V,
    /// Age of the oldest applied local record; absent when nothing was applied.
    pub lag_ms: Option<i64>,
}

impl<V> Overlaid<V> {
    fn unchanged(data: V) -> Self {
        Self { data, lag_ms: None }
    }
}

impl<V> From<Overlaid<V>> for XrpcOutput<V> {
    fn from(overlaid: Overlaid<V>) -> Self {
        XrpcOutput {
            body: overlaid.data,
            upstream_lag_ms: overlaid.lag_ms,
        }
    }
}

/// Applies a munge with the cursor pinned to the original page's cursor.
pub fn apply_overlay<M: Munge>(
    munge: &M,
    original: M::View,
    local: &LocalRecords,
    requester: &ProfileViewBasic,
) -> M::View {
    if local.is_empty() {
        return original;
    }
    let cursor = original.cursor().map(str::to_string);
    let mut patched = munge.munge(original, local, requester);
    patched.set_cursor(cursor);
    patched
}

pub async fn handle_read_after_write<M: Munge>(
    ctx: &AppContext,
    requester: &str,
    res: AggregatorResponse<M::View>,
    munge: &M,
) -> Overlaid<M::View> {
    let original = res.data;
    let local = match pending_for(ctx, requester, &original).await {
        Ok(local) => local,
        Err(err) => {
            tracing::warn!(
                requester,
                view = M::KIND.as_str(),
                error = %err,
                "read-after-write lookup failed; serving aggregator response as is"
            );
            return Overlaid::unchanged(original);
        }
    };
    if local.is_empty() {
        return Overlaid::unchanged(original);
    }

    let author = match requester_view(ctx, requester, &original).await {
        Ok(author) => author,
        Err(err) => {
            tracing::warn!(
                requester,
                view = M::KIND.as_str(),
                error = %err,
                "read-after-write author lookup failed; serving aggregator response as is"
            );
            return Overlaid::unchanged(original);
        }
    };

    let lag_ms = local
        .oldest_indexed_at_ms()
        .map(|oldest| (now_ms() - oldest).max(0));
    tracing::debug!(
        requester,
        view = M::KIND.as_str(),
        pending = local.count,
        "applying read-after-write overlay"
    );
    Overlaid {
        data: apply_overlay(munge, original, &local, &author),
        lag_ms,
    }
}

async fn pending_for<V: ReadView>(
    ctx: &AppContext,
    requester: &str,
    original: &V,
) -> ApiResult<LocalRecords> {
    let window_ms = i64::try_from(ctx.config().overlay_window.as_millis()).unwrap_or(i64::MAX);
    let since = format_timestamp_ms(now_ms().saturating_sub(window_ms).max(0))?;
    let local = ctx.local().pending_records(requester, &since).await?;
    if local.is_empty() {
        return Ok(local);
    }
    Ok(match original.newest_indexed_by(requester) {
        Some(watermark) => local.newer_than(watermark),
        None => local,
    })
}

async fn requester_view<V: ReadView>(
    ctx: &AppContext,
    requester: &str,
    original: &V,
) -> ApiResult<ProfileViewBasic> {
    if let Some(view) = original.author_view(requester) {
        return Ok(view);
    }
    let row = ctx.store().actor(requester, true).await?;
    Ok(match row {
        Some(row) => ProfileViewBasic {
            did: row.did,
            handle: row.handle,
            display_name: row.display_name,
            avatar: row.avatar,
            viewer: None,
        },
        None => ProfileViewBasic {
            did: requester.to_string(),
            handle: requester.to_string(),
            ..ProfileViewBasic::default()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{
        AuthorFeedMunge, Munge, ProfileMunge, ReadView, apply_overlay, handle_read_after_write,
    };
    use crate::api::aggregator::AggregatorResponse;
    use crate::api::context::{AppContext, ReadConfig};
    use crate::api::local::{LocalRecord, LocalRecords, PostRecord, ProfileRecord};
    use crate::api::memory::MemoryStore;
    use crate::api::testing::{FailingLocalRecords, feed_item, recent};
    use crate::api::views::{AuthorFeedOutput, ProfileViewBasic, ProfileViewDetailed};
    use std::sync::Arc;

    const ALICE: &str = "did:ex:alice";

    fn alice() -> ProfileViewBasic {
        ProfileViewBasic {
            did: ALICE.to_string(),
            handle: "alice.test".to_string(),
            display_name: Some("Alice (stale)".to_string()),
            ..ProfileViewBasic::default()
        }
    }

    fn pending() -> LocalRecords {
        LocalRecords {
            count: 2,
            profile: Some(LocalRecord {
                uri: format!("at://{ALICE}/app.bsky.actor.profile/self"),
                cid: "cid-profile".to_string(),
                indexed_at: recent(5),
                record: ProfileRecord {
                    display_name: Some("Alice".to_string()),
                    avatar: Some("avatar-new".to_string()),
                    ..ProfileRecord::default()
                },
            }),
            posts: vec![LocalRecord {
                uri: format!("at://{ALICE}/app.bsky.feed.post/fresh"),
                cid: "cid-fresh".to_string(),
                indexed_at: recent(1),
                record: PostRecord {
                    text: "just posted".to_string(),
                    created_at: recent(1),
                    reply: None,
                    embed: None,
                },
            }],
        }
    }

    fn feed() -> AuthorFeedOutput {
        AuthorFeedOutput {
            feed: vec![
                feed_item(&alice(), "one", &recent(60)),
                feed_item(&alice(), "two", &recent(120)),
            ],
            cursor: Some("raw-aggregator-cursor".to_string()),
        }
    }

    #[test]
    fn author_feed_overlay_is_idempotent_and_keeps_cursor() {
        let once = apply_overlay(&AuthorFeedMunge, feed(), &pending(), &alice());
        let twice = apply_overlay(&AuthorFeedMunge, once.clone(), &pending(), &alice());
        assert_eq!(once, twice);
        assert_eq!(once.cursor(), Some("raw-aggregator-cursor"));
        assert_eq!(once.feed.len(), 3);
        assert_eq!(once.feed[0].post.cid, "cid-fresh");
        assert!(once
            .feed
            .iter()
            .all(|item| item.post.author.display_name.as_deref() == Some("Alice")));
    }

    #[test]
    fn profile_overlay_is_idempotent() {
        let original = ProfileViewDetailed {
            did: ALICE.to_string(),
            handle: "alice.test".to_string(),
            display_name: Some("Alice (stale)".to_string()),
            followers_count: 12,
            ..ProfileViewDetailed::default()
        };
        let once = apply_overlay(&ProfileMunge, original, &pending(), &alice());
        let twice = apply_overlay(&ProfileMunge, once.clone(), &pending(), &alice());
        assert_eq!(once, twice);
        assert_eq!(once.display_name.as_deref(), Some("Alice"));
        assert_eq!(once.avatar.as_deref(), Some("avatar-new"));
        assert_eq!(once.followers_count, 12);
    }

    #[test]
    fn empty_local_records_leave_response_untouched() {
        let original = feed();
        let out = apply_overlay(
            &AuthorFeedMunge,
            original.clone(),
            &LocalRecords::default(),
            &alice(),
        );
        assert_eq!(out, original);
        assert_eq!(AuthorFeedMunge::KIND.as_str(), "author_feed");
    }

    #[tokio::test]
    async fn local_source_failure_fails_open() {
        let store = Arc::new(MemoryStore::default());
        let ctx = AppContext::new(ReadConfig::default(), store, Arc::new(FailingLocalRecords));
        let original = feed();
        let out = handle_read_after_write(
            &ctx,
            ALICE,
            AggregatorResponse::new(original.clone()),
            &AuthorFeedMunge,
        )
        .await;
        assert_eq!(out.data, original);
        assert_eq!(out.lag_ms, None);
    }
}
