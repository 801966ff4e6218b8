//! Purpose: `app.bsky.graph.getFollows` and `app.bsky.graph.getListMutes` read paths.
//! Exports: `get_follows`, `get_list_mutes`.
//! Role: Keyset-paginated graph listings; proxied responses pass through without overlay.
//! Invariants: Follows exclude taken-down subjects and subjects in a block with either party.
#![allow(clippy::result_large_err)]

use super::auth::Credentials;
use super::context::{AppContext, XrpcOutput};
use super::hydrate::{Viewer, load_viewer, profile_view};
use super::proxy::{ProxyRouter, ReadPath};
use super::store::{ActorRow, ApiResult, FollowRow, ListRow, follow_keyset, list_keyset};
use super::validation::{remote_limit, resolve_profile, validate_actor};
use super::views::{
    FollowsOutput, FollowsParams, ListMutesOutput, ListMutesParams, ListView, ProfileView,
};
use crate::core::exclusion::{ExclusionFilter, assert_no_blocks};
use crate::core::paginate::PageParams;
use crate::core::query::{Column, Query};
use axum::http::HeaderMap;
use std::collections::HashMap;

fn follow_subject(row: &FollowRow) -> &str {
    &row.subject.did
}

pub async fn get_follows(
    ctx: &AppContext,
    credentials: &Credentials,
    headers: &HeaderMap,
    mut params: FollowsParams,
) -> ApiResult<XrpcOutput<FollowsOutput>> {
    let requester = credentials.require_access()?;
    validate_actor(&params.actor)?;
    let path = ProxyRouter::route(ctx, headers);
    tracing::debug!(path = path.label(), actor = %params.actor, "getFollows");
    match path {
        ReadPath::Remote(aggregator) => {
            params.limit = remote_limit(params.limit, ctx.config().limits)?;
            let auth = ProxyRouter::auth_headers(ctx, credentials, headers)?;
            let res = aggregator.get_follows(&params, &auth).await?;
            Ok(XrpcOutput::new(res.data))
        }
        ReadPath::Local => local_follows(ctx, requester, params).await.map(XrpcOutput::new),
    }
}

async fn local_follows(
    ctx: &AppContext,
    requester: &str,
    params: FollowsParams,
) -> ApiResult<FollowsOutput> {
    let store = ctx.store();
    let paginator = ctx.paginator();
    let keyset = follow_keyset();
    let bounds = paginator.bounds(&keyset, &PageParams::new(params.limit, params.cursor))?;

    let creator = resolve_profile(store, &params.actor, false).await?;
    let relationships = store.relationships(requester).await?;
    assert_no_blocks(relationships.blocks_with(&creator.did), &params.actor)?;
    let mut viewer = Viewer::new(requester, relationships);

    let subject: Column<FollowRow> = follow_subject;
    let exclusion = ExclusionFilter::new(viewer.relationships().clone());
    let creator_exclusion = ExclusionFilter::new(store.relationships(&creator.did).await?);
    let creator_did = creator.did.clone();
    let query = Query::new()
        .where_(move |row: &FollowRow| row.creator == creator_did)
        .where_(|row: &FollowRow| !row.subject.taken_down)
        .where_predicate(exclusion.exclude_blocked(vec![subject]))
        .where_predicate(creator_exclusion.exclude_blocked(vec![subject]));

    let creator_subjects = [creator.did.clone()];
    let (rows, creator_edges) = tokio::join!(
        store.follows(paginator.apply(query, keyset, &bounds)),
        store.viewer_edges(requester, &creator_subjects)
    );
    let page = paginator.finish(rows?, &keyset, &bounds)?;

    let subject_dids: Vec<String> = page.items.iter().map(|row| row.subject.did.clone()).collect();
    viewer.add_edges(creator_edges?);
    viewer.load_edges(store, &subject_dids).await?;

    Ok(FollowsOutput {
        subject: profile_view(&creator, Some(&viewer)),
        follows: page
            .items
            .iter()
            .map(|row| profile_view(&row.subject, Some(&viewer)))
            .collect(),
        cursor: page.cursor,
    })
}

pub async fn get_list_mutes(
    ctx: &AppContext,
    credentials: &Credentials,
    headers: &HeaderMap,
    mut params: ListMutesParams,
) -> ApiResult<XrpcOutput<ListMutesOutput>> {
    let requester = credentials.require_access()?;
    let path = ProxyRouter::route(ctx, headers);
    tracing::debug!(path = path.label(), requester, "getListMutes");
    match path {
        ReadPath::Remote(aggregator) => {
            params.limit = remote_limit(params.limit, ctx.config().limits)?;
            let auth = ProxyRouter::auth_headers(ctx, credentials, headers)?;
            let res = aggregator.get_list_mutes(&params, &auth).await?;
            Ok(XrpcOutput::new(res.data))
        }
        ReadPath::Local => local_list_mutes(ctx, credentials, params).await.map(XrpcOutput::new),
    }
}

async fn local_list_mutes(
    ctx: &AppContext,
    credentials: &Credentials,
    params: ListMutesParams,
) -> ApiResult<ListMutesOutput> {
    let store = ctx.store();
    let paginator = ctx.paginator();
    let keyset = list_keyset();
    let bounds = paginator.bounds(&keyset, &PageParams::new(params.limit, params.cursor))?;

    let Some(mut viewer) = load_viewer(store, credentials, &[]).await? else {
        return Ok(ListMutesOutput {
            lists: Vec::new(),
            cursor: None,
        });
    };
    let muted = viewer.relationships().muted_lists.clone();
    let query = Query::new().where_(move |row: &ListRow| muted.contains(&row.uri));
    let rows = store.lists(paginator.apply(query, keyset, &bounds)).await?;
    let page = paginator.finish(rows, &keyset, &bounds)?;

    let mut creators: Vec<String> = Vec::new();
    for row in &page.items {
        if !creators.contains(&row.creator) {
            creators.push(row.creator.clone());
        }
    }
    let (actors, edges) = tokio::join!(
        store.actors(&creators),
        store.viewer_edges(viewer.did(), &creators)
    );
    viewer.add_edges(edges?);
    let actors: HashMap<String, ActorRow> = actors?
        .into_iter()
        .map(|row| (row.did.clone(), row))
        .collect();

    let lists = page
        .items
        .into_iter()
        .map(|row| {
            let creator = match actors.get(&row.creator) {
                Some(actor) => profile_view(actor, Some(&viewer)),
                None => ProfileView {
                    did: row.creator.clone(),
                    handle: row.creator.clone(),
                    viewer: Some(viewer.state(&row.creator)),
                    ..ProfileView::default()
                },
            };
            ListView {
                uri: row.uri,
                cid: row.cid,
                creator,
                name: row.name,
                purpose: row.purpose,
                description: row.description,
                indexed_at: row.indexed_at,
            }
        })
        .collect();
    Ok(ListMutesOutput {
        lists,
        cursor: page.cursor,
    })
}
