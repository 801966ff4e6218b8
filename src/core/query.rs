//! Purpose: Describe a bounded range query that a row store executes.
//! Exports: `Query`, `Predicate`, `Column`, `Direction`.
//! Role: Narrow stand-in for a relational query builder; the store owns the rows.
//! Invariants: Predicates run before the keyset bound and the limit, never after.
//! Invariants: Results are strictly ordered by the keyset; rows on the bound are excluded.
use crate::core::error::Error;
use crate::core::keyset::{Keyset, KeysetValue};

pub type Predicate<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;
pub type Column<R> = fn(&R) -> &str;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Direction {
    #[default]
    Descending,
    Ascending,
}

pub struct Query<R> {
    predicates: Vec<Predicate<R>>,
    order: Option<(Box<dyn Keyset<R>>, Direction)>,
    after: Option<KeysetValue>,
    limit: Option<usize>,
}

impl<R> Query<R> {
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
            order: None,
            after: None,
            limit: None,
        }
    }

    pub fn where_(mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Box::new(predicate));
        self
    }

    pub fn where_predicate(mut self, predicate: Predicate<R>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, keyset: impl Keyset<R> + 'static, direction: Direction) -> Self {
        self.order = Some((Box::new(keyset), direction));
        self
    }

    pub fn after(mut self, value: Option<KeysetValue>) -> Self {
        self.after = value;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &R) -> bool {
        self.predicates.iter().all(|predicate| predicate(row))
    }

    pub fn execute(&self, rows: impl IntoIterator<Item = R>) -> Result<Vec<R>, Error> {
        let candidates = rows.into_iter().filter(|row| self.matches(row));
        let Some((keyset, direction)) = &self.order else {
            let mut out: Vec<R> = candidates.collect();
            if let Some(limit) = self.limit {
                out.truncate(limit);
            }
            return Ok(out);
        };

        let mut keyed = Vec::new();
        for row in candidates {
            let key = keyset.key(&row)?;
            let in_range = match (&self.after, direction) {
                (None, _) => true,
                (Some(bound), Direction::Descending) => key < *bound,
                (Some(bound), Direction::Ascending) => key > *bound,
            };
            if in_range {
                keyed.push((key, row));
            }
        }
        match direction {
            Direction::Descending => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
            Direction::Ascending => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
        }
        if let Some(limit) = self.limit {
            keyed.truncate(limit);
        }
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl<R> Default for Query<R> {
    fn default() -> Self {
        Self::new()
    }
}
