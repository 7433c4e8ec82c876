//! JSON shape of a paginated listing.

use serde::Serialize;

use crate::pagination::Page;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    /// Echo back as `before` to fetch the preceding page
    pub previous_cursor: Option<String>,
    /// Echo back as `after` to fetch the following page
    pub next_cursor: Option<String>,
    pub has_previous: bool,
    pub has_next: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> PageResponse<T> {
    pub fn from_page<S>(page: Page<S>, f: impl FnMut(S) -> T) -> Self {
        let page = page.map(f);
        Self {
            items: page.items,
            previous_cursor: page.start_cursor,
            next_cursor: page.end_cursor,
            has_previous: page.has_previous,
            has_next: page.has_next,
            total_count: page.total_count,
        }
    }
}
