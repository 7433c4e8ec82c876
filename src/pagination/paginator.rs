//! Bidirectional keyset pagination over any key-ordered source.

use serde::Deserialize;
use std::future::Future;
use tracing::error;

use super::cursor;

/// Page size used when neither `first` nor `last` is given.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Items that can be paged by an `i32` key.
pub trait Keyed {
    fn key(&self) -> i32;
}

/// Which way a window extends from its boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A fetch request handed to a [`KeysetSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub direction: Direction,
    /// Exclusive key boundary. `None` starts at the beginning (forward) or end (backward).
    pub boundary: Option<i32>,
    pub limit: u32,
}

/// An ordered, filterable sequence source.
///
/// For a forward window, return up to `limit` items with key greater than the
/// boundary in ascending key order. For a backward window, return up to
/// `limit` items with key less than the boundary in descending key order.
pub trait KeysetSource: Sync {
    type Item: Keyed + Send;
    type Error: std::fmt::Display + Send;

    fn fetch(
        &self,
        window: Window,
    ) -> impl Future<Output = Result<Vec<Self::Item>, Self::Error>> + Send;

    /// Number of items matching the source's own filters, ignoring any window.
    fn count(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}

/// Query parameters for cursor pagination.
///
/// `first`/`after` page forward and `last`/`before` page backward. If both
/// directions are present, forward wins and `last`/`before` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPaginationParameters {
    pub first: Option<i64>,
    pub after: Option<String>,
    pub last: Option<i64>,
    pub before: Option<String>,
    #[serde(default)]
    pub include_total: bool,
}

impl CursorPaginationParameters {
    pub fn direction(&self) -> Direction {
        let forward = self.first.is_some() || self.after.is_some();
        let backward = self.last.is_some() || self.before.is_some();
        if backward && !forward {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }
}

/// One page of results, always in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
    pub has_previous: bool,
    pub total_count: Option<u64>,
    /// Cursor of the first item, for paging backward with `before`.
    pub start_cursor: Option<String>,
    /// Cursor of the last item, for paging forward with `after`.
    pub end_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Convert the items while keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_next: self.has_next,
            has_previous: self.has_previous,
            total_count: self.total_count,
            start_cursor: self.start_cursor,
            end_cursor: self.end_cursor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("invalid cursor")]
    InvalidCursor,
    #[error("data source unavailable")]
    Unavailable,
}

impl From<cursor::InvalidCursor> for PaginationError {
    fn from(_: cursor::InvalidCursor) -> Self {
        Self::InvalidCursor
    }
}

/// Stateless keyset paginator.
#[derive(Debug, Clone, Copy)]
pub struct KeysetPaginator {
    default_page_size: u32,
    max_page_size: u32,
}

impl Default for KeysetPaginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl KeysetPaginator {
    pub fn new(default_page_size: u32, max_page_size: u32) -> Self {
        Self {
            default_page_size,
            max_page_size,
        }
    }

    /// Fetch one page from `source`.
    ///
    /// The flag for the requested direction is exact: one extra item is
    /// fetched to decide it. The opposite flag is `true` when a cursor was
    /// supplied for the requested direction and the page is non-empty; it
    /// does not probe the source.
    pub async fn page<S>(
        &self,
        source: &S,
        params: &CursorPaginationParameters,
    ) -> Result<Page<S::Item>, PaginationError>
    where
        S: KeysetSource + ?Sized,
    {
        let first = self.validate_size("first", params.first)?;
        let last = self.validate_size("last", params.last)?;
        let direction = params.direction();

        let (limit, position) = match direction {
            Direction::Forward => (first, params.after.as_deref()),
            Direction::Backward => (last, params.before.as_deref()),
        };
        let limit = limit.unwrap_or(self.default_page_size);
        let boundary = position.map(cursor::decode).transpose()?;

        let mut items = source
            .fetch(Window {
                direction,
                boundary,
                limit: limit + 1,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch page");
                PaginationError::Unavailable
            })?;

        let has_more = items.len() > limit as usize;
        items.truncate(limit as usize);
        if direction == Direction::Backward {
            items.reverse();
        }

        let came_from_cursor = boundary.is_some() && !items.is_empty();
        let (has_next, has_previous) = match direction {
            Direction::Forward => (has_more, came_from_cursor),
            Direction::Backward => (came_from_cursor, has_more),
        };

        let total_count = if params.include_total {
            Some(source.count().await.map_err(|e| {
                error!(error = %e, "Failed to count items");
                PaginationError::Unavailable
            })?)
        } else {
            None
        };

        Ok(Page {
            start_cursor: items.first().map(|item| cursor::encode(item.key())),
            end_cursor: items.last().map(|item| cursor::encode(item.key())),
            items,
            has_next,
            has_previous,
            total_count,
        })
    }

    fn validate_size(
        &self,
        name: &str,
        value: Option<i64>,
    ) -> Result<Option<u32>, PaginationError> {
        match value {
            None => Ok(None),
            Some(n) if n <= 0 => Err(PaginationError::InvalidArgument(format!(
                "{} must be a positive number",
                name
            ))),
            Some(n) if n > i64::from(self.max_page_size) => {
                Err(PaginationError::InvalidArgument(format!(
                    "{} cannot be greater than {}",
                    name, self.max_page_size
                )))
            }
            Some(n) => Ok(Some(n as u32)),
        }
    }
}

/// In-memory source over a vector, sorted by key on construction.
#[derive(Debug, Clone)]
pub struct MemorySource<T> {
    items: Vec<T>,
}

impl<T: Keyed> MemorySource<T> {
    pub fn new(mut items: Vec<T>) -> Self {
        items.sort_by_key(|item| item.key());
        Self { items }
    }
}

impl<T> KeysetSource for MemorySource<T>
where
    T: Keyed + Clone + Send + Sync,
{
    type Item = T;
    type Error = std::convert::Infallible;

    async fn fetch(&self, window: Window) -> Result<Vec<T>, Self::Error> {
        let limit = window.limit as usize;
        let items = match window.direction {
            Direction::Forward => self
                .items
                .iter()
                .filter(|item| window.boundary.is_none_or(|b| item.key() > b))
                .take(limit)
                .cloned()
                .collect(),
            Direction::Backward => self
                .items
                .iter()
                .rev()
                .filter(|item| window.boundary.is_none_or(|b| item.key() < b))
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(items)
    }

    async fn count(&self) -> Result<u64, Self::Error> {
        Ok(self.items.len() as u64)
    }
}
