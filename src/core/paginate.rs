//! Purpose: Apply a keyset to range queries and derive the next-page cursor.
//! Exports: `PageLimits`, `PageParams`, `PageBounds`, `Page`, `Paginator`.
//! Role: Pagination engine shared by every listing read path.
//! Invariants: Params are validated (limit, cursor) before any I/O is issued.
//! Invariants: A limit above the configured maximum is clamped, never rejected.
//! Invariants: `cursor` is present iff the page holds exactly `limit` rows.
//! Notes: A collection whose size is a multiple of the limit yields one empty trailing page.
use crate::core::error::{Error, ErrorKind};
use crate::core::keyset::{Keyset, KeysetValue};
use crate::core::query::{Direction, Query};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl PageParams {
    pub fn new(limit: Option<i64>, cursor: Option<String>) -> Self {
        Self { limit, cursor }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageBounds {
    pub limit: usize,
    pub after: Option<KeysetValue>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

pub fn resolve_limit(limit: Option<i64>, limits: PageLimits) -> Result<usize, Error> {
    let Some(limit) = limit else {
        return Ok(limits.default_limit.min(limits.max_limit));
    };
    if limit <= 0 {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("limit must be positive, got {limit}"))
            .with_hint(format!("Use a limit between 1 and {}.", limits.max_limit)));
    }
    Ok(usize::try_from(limit)
        .unwrap_or(usize::MAX)
        .min(limits.max_limit))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Paginator {
    limits: PageLimits,
    direction: Direction,
}

impl Paginator {
    pub fn new(limits: PageLimits) -> Self {
        Self {
            limits,
            direction: Direction::Descending,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Validates request params into bounds; runs before any store call.
    pub fn bounds<R>(
        &self,
        keyset: &impl Keyset<R>,
        params: &PageParams,
    ) -> Result<PageBounds, Error> {
        let limit = resolve_limit(params.limit, self.limits)?;
        let after = params
            .cursor
            .as_deref()
            .map(|cursor| keyset.unpack(cursor))
            .transpose()?;
        Ok(PageBounds { limit, after })
    }

    pub fn apply<R, K>(&self, query: Query<R>, keyset: K, bounds: &PageBounds) -> Query<R>
    where
        K: Keyset<R> + 'static,
    {
        query
            .order_by(keyset, self.direction)
            .after(bounds.after.clone())
            .limit(bounds.limit)
    }

    pub fn finish<R>(
        &self,
        rows: Vec<R>,
        keyset: &impl Keyset<R>,
        bounds: &PageBounds,
    ) -> Result<Page<R>, Error> {
        let cursor = if rows.len() == bounds.limit {
            keyset.pack_from_result(&rows)?
        } else {
            None
        };
        Ok(Page {
            items: rows,
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PageLimits, PageParams, Paginator, resolve_limit};
    use crate::core::error::ErrorKind;
    use crate::core::keyset::{KeysetValue, TimeCidKeyset};
    use crate::core::query::{Direction, Query};

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        at: String,
        cid: String,
    }

    fn keyset() -> TimeCidKeyset<Row> {
        TimeCidKeyset::new(|row| row.at.as_str(), |row| row.cid.as_str())
    }

    fn snapshot(count: usize, distinct_times: usize) -> Vec<Row> {
        (0..count)
            .map(|idx| Row {
                at: format!("2023-03-01T00:00:{:02}Z", idx % distinct_times),
                cid: format!("bafy{idx:03}"),
            })
            .collect()
    }

    fn walk(rows: &[Row], limit: i64, direction: Direction) -> Vec<Row> {
        let paginator = Paginator::new(PageLimits::default()).with_direction(direction);
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let params = PageParams::new(Some(limit), cursor.clone());
            let bounds = paginator.bounds(&keyset(), &params).expect("bounds");
            let query = paginator.apply(Query::new(), keyset(), &bounds);
            let page_rows = query.execute(rows.iter().cloned()).expect("execute");
            let page = paginator.finish(page_rows, &keyset(), &bounds).expect("finish");
            assert!(page.items.len() <= limit as usize);
            out.extend(page.items);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        out
    }

    #[test]
    fn following_cursors_reproduces_snapshot_without_gaps() {
        for count in [0, 1, 7, 20] {
            let rows = snapshot(count, 3);
            let mut expected = rows.clone();
            expected.sort_by(|a, b| {
                (b.at.as_str(), b.cid.as_str()).cmp(&(a.at.as_str(), a.cid.as_str()))
            });
            for limit in [1, 2, 3, 5, 20, 25] {
                let walked = walk(&rows, limit, Direction::Descending);
                assert_eq!(walked, expected, "count={count} limit={limit}");
            }
        }
    }

    #[test]
    fn shared_timestamps_page_in_tie_break_order_both_ways() {
        let rows = snapshot(9, 1);
        let desc: Vec<_> = walk(&rows, 2, Direction::Descending)
            .into_iter()
            .map(|row| row.cid)
            .collect();
        let asc: Vec<_> = walk(&rows, 4, Direction::Ascending)
            .into_iter()
            .map(|row| row.cid)
            .collect();
        let mut reversed = asc.clone();
        reversed.reverse();
        assert_eq!(desc, reversed);
        assert_eq!(asc.first().map(String::as_str), Some("bafy000"));
        assert_eq!(walk(&rows, 2, Direction::Descending).len(), 9);
    }

    #[test]
    fn exact_multiple_yields_empty_trailing_page() {
        let rows = snapshot(4, 4);
        let paginator = Paginator::new(PageLimits::default());
        let params = PageParams::new(Some(4), None);
        let bounds = paginator.bounds(&keyset(), &params).expect("bounds");
        let fetched = paginator
            .apply(Query::new(), keyset(), &bounds)
            .execute(rows.clone())
            .expect("rows");
        let first = paginator.finish(fetched, &keyset(), &bounds).expect("page");
        let cursor = first.cursor.expect("full page carries a cursor");

        let bounds = paginator
            .bounds(&keyset(), &PageParams::new(Some(4), Some(cursor)))
            .expect("bounds");
        let rows = paginator.apply(Query::new(), keyset(), &bounds).execute(rows).expect("rows");
        let second = paginator.finish(rows, &keyset(), &bounds).expect("page");
        assert!(second.items.is_empty());
        assert_eq!(second.cursor, None);
    }

    #[test]
    fn cursor_past_end_is_empty_page() {
        let rows = snapshot(3, 3);
        let paginator = Paginator::new(PageLimits::default());
        let params = PageParams::new(Some(10), Some(KeysetValue::new(0, "bafy").pack()));
        let bounds = paginator.bounds(&keyset(), &params).expect("bounds");
        let rows = paginator.apply(Query::new(), keyset(), &bounds).execute(rows).expect("rows");
        let page = paginator.finish(rows, &keyset(), &bounds).expect("page");
        assert!(page.items.is_empty());
        assert_eq!(page.cursor, None);
    }

    #[test]
    fn limit_validation() {
        let limits = PageLimits {
            default_limit: 50,
            max_limit: 100,
        };
        assert_eq!(resolve_limit(None, limits).expect("default"), 50);
        assert_eq!(resolve_limit(Some(7), limits).expect("seven"), 7);
        assert_eq!(resolve_limit(Some(10_000), limits).expect("clamped"), 100);
        for bad in [0, -1] {
            let err = resolve_limit(Some(bad), limits).expect_err("non-positive");
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        }
    }

    #[test]
    fn malformed_cursor_fails_before_query() {
        let paginator = Paginator::new(PageLimits::default());
        let params = PageParams::new(Some(10), Some("not-a-cursor".to_string()));
        let err = paginator.bounds(&keyset(), &params).expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::MalformedCursor);
    }
}
