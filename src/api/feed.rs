//! Purpose: `app.bsky.feed.getAuthorFeed` read path.
//! Exports: `get_author_feed`.
//! Role: Local keyset pagination with block/mute exclusion, or proxied read plus overlay.
//! Invariants: Exclusion predicates are part of the store query, ahead of the bound and limit.
//! Invariants: A requester reading their own feed through the aggregator gets pending posts merged.
#![allow(clippy::result_large_err)]

use super::auth::Credentials;
use super::context::{AppContext, XrpcOutput};
use super::hydrate::{basic_views, load_viewer, post_view};
use super::overlay::{AuthorFeedMunge, handle_read_after_write};
use super::proxy::{ProxyRouter, ReadPath};
use super::store::{ApiResult, FeedRow, feed_keyset};
use super::validation::{is_requester_subject, remote_limit, resolve_profile, validate_actor};
use super::views::{
    AuthorFeedFilter, AuthorFeedOutput, AuthorFeedParams, FeedViewPost, ReasonRepost,
};
use crate::core::exclusion::{ExclusionFilter, assert_no_blocks};
use crate::core::paginate::PageParams;
use crate::core::query::{Column, Query};
use axum::http::HeaderMap;

fn post_creator(row: &FeedRow) -> &str {
    &row.post.creator
}

fn filter_predicate(filter: AuthorFeedFilter) -> fn(&FeedRow) -> bool {
    match filter {
        AuthorFeedFilter::PostsAndAuthorThreads => |_| true,
        AuthorFeedFilter::PostsWithMedia => |row| !row.is_repost() && row.post.has_media,
        AuthorFeedFilter::PostsNoReplies => {
            |row| row.is_repost() || row.post.reply_parent.is_none()
        }
    }
}

pub async fn get_author_feed(
    ctx: &AppContext,
    credentials: &Credentials,
    headers: &HeaderMap,
    mut params: AuthorFeedParams,
) -> ApiResult<XrpcOutput<AuthorFeedOutput>> {
    if !credentials.is_role() {
        credentials.require_access()?;
    }
    validate_actor(&params.actor)?;
    let path = ProxyRouter::route(ctx, headers);
    tracing::debug!(path = path.label(), actor = %params.actor, "getAuthorFeed");
    match path {
        ReadPath::Remote(aggregator) => {
            params.limit = remote_limit(params.limit, ctx.config().limits)?;
            let auth = ProxyRouter::auth_headers(ctx, credentials, headers)?;
            let res = aggregator.get_author_feed(&params, &auth).await?;
            if let Some(requester) = credentials.requester() {
                if is_requester_subject(ctx.store(), requester, &params.actor).await {
                    return Ok(handle_read_after_write(ctx, requester, res, &AuthorFeedMunge)
                        .await
                        .into());
                }
            }
            Ok(XrpcOutput::new(res.data))
        }
        ReadPath::Local => local_author_feed(ctx, credentials, params).await.map(XrpcOutput::new),
    }
}

async fn local_author_feed(
    ctx: &AppContext,
    credentials: &Credentials,
    params: AuthorFeedParams,
) -> ApiResult<AuthorFeedOutput> {
    let store = ctx.store();
    let paginator = ctx.paginator();
    let keyset = feed_keyset();
    let bounds = paginator.bounds(&keyset, &PageParams::new(params.limit, params.cursor))?;

    let author = resolve_profile(store, &params.actor, credentials.is_role()).await?;
    let author_did = author.did.clone();
    let mut query = Query::new()
        .where_(move |row: &FeedRow| row.originator == author_did)
        .where_(filter_predicate(params.filter.unwrap_or_default()));

    if let Some(requester) = credentials.requester() {
        let relationships = store.relationships(requester).await?;
        assert_no_blocks(relationships.blocks_with(&author.did), &params.actor)?;
        let exclusion = ExclusionFilter::new(relationships);
        let creator: Column<FeedRow> = post_creator;
        query = query
            .where_predicate(exclusion.exclude_blocked(vec![creator]))
            .where_predicate(exclusion.exclude_muted_posts(vec![creator], FeedRow::is_repost));
    }

    let rows = store
        .feed_items(paginator.apply(query, keyset, &bounds))
        .await?;
    let page = paginator.finish(rows, &keyset, &bounds)?;

    let mut dids: Vec<String> = Vec::new();
    for row in &page.items {
        for did in [&row.post.creator, &row.originator] {
            if !dids.contains(did) {
                dids.push(did.clone());
            }
        }
    }
    let (actors, viewer) = tokio::join!(
        store.actors(&dids),
        load_viewer(store, credentials, &dids)
    );
    let viewer = viewer?;
    let profiles = basic_views(&dids, &actors?, viewer.as_ref());

    let feed = page
        .items
        .iter()
        .filter_map(|row| {
            let author = profiles.get(&row.post.creator)?.clone();
            let reason = if row.is_repost() {
                Some(ReasonRepost {
                    by: profiles.get(&row.originator)?.clone(),
                    indexed_at: row.sort_at.clone(),
                })
            } else {
                None
            };
            Some(FeedViewPost {
                post: post_view(&row.post, author),
                reason,
            })
        })
        .collect();
    Ok(AuthorFeedOutput {
        feed,
        cursor: page.cursor,
    })
}
