//! Purpose: Block and mute exclusion predicates that compose into bounded range queries.
//! Exports: `Relationships`, `Blocks`, `ExclusionFilter`, `assert_no_blocks`.
//! Role: Read-time filtering; listings filter rows, direct queries fail outright.
//! Invariants: Predicates are pushed into the query so exclusions never shrink a page.
//! Invariants: Blocks are bidirectional; mutes are requester-scoped and spare repost wrappers.
use crate::core::error::{Error, ErrorKind};
use crate::core::query::{Column, Predicate};
use std::collections::HashSet;
use std::sync::Arc;

/// Block and mute edges touching one identity, as loaded from the store.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Relationships {
    /// Identities this actor blocks.
    pub blocking: HashSet<String>,
    /// Identities that block this actor.
    pub blocked_by: HashSet<String>,
    /// Identities muted directly or through a muted list.
    pub muting: HashSet<String>,
    /// URIs of lists this actor has muted.
    pub muted_lists: HashSet<String>,
}

impl Relationships {
    pub fn blocks_with(&self, other: &str) -> Blocks {
        Blocks {
            blocking: self.blocking.contains(other),
            blocked_by: self.blocked_by.contains(other),
        }
    }

    pub fn is_blocked_either_way(&self, other: &str) -> bool {
        self.blocking.contains(other) || self.blocked_by.contains(other)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Blocks {
    pub blocking: bool,
    pub blocked_by: bool,
}

/// Fails a direct relationship query when either side blocks the other.
pub fn assert_no_blocks(blocks: Blocks, actor: &str) -> Result<(), Error> {
    if blocks.blocking {
        return Err(Error::new(ErrorKind::BlockedActor)
            .with_message(format!("Requester has blocked actor: {actor}"))
            .with_actor(actor));
    }
    if blocks.blocked_by {
        return Err(Error::new(ErrorKind::BlockedByActor)
            .with_message(format!("Requester is blocked by actor: {actor}"))
            .with_actor(actor));
    }
    Ok(())
}

/// Predicate factory over one viewer's relationships.
#[derive(Clone, Debug)]
pub struct ExclusionFilter {
    relationships: Arc<Relationships>,
}

impl ExclusionFilter {
    pub fn new(relationships: Relationships) -> Self {
        Self {
            relationships: Arc::new(relationships),
        }
    }

    /// Keeps rows whose subject columns are all clear of blocks with the viewer.
    pub fn exclude_blocked<R: 'static>(&self, subject_columns: Vec<Column<R>>) -> Predicate<R> {
        let relationships = Arc::clone(&self.relationships);
        Box::new(move |row: &R| {
            subject_columns
                .iter()
                .all(|column| !relationships.is_blocked_either_way(column(row)))
        })
    }

    /// Drops posts whose creator the viewer muted; repost wrappers always pass.
    pub fn exclude_muted_posts<R: 'static>(
        &self,
        creator_columns: Vec<Column<R>>,
        is_repost: fn(&R) -> bool,
    ) -> Predicate<R> {
        let relationships = Arc::clone(&self.relationships);
        Box::new(move |row: &R| {
            is_repost(row)
                || creator_columns
                    .iter()
                    .all(|column| !relationships.muting.contains(column(row)))
        })
    }
}
