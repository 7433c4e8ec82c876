//! Keyset (cursor) pagination.
//!
//! Pages are addressed by opaque cursors derived from an entity's `i32` key
//! rather than offsets, so concurrent inserts and deletes never shift or
//! duplicate items between pages.

pub mod cursor;
mod paginator;

pub use cursor::InvalidCursor;
pub use paginator::{
    CursorPaginationParameters, DEFAULT_PAGE_SIZE, Direction, Keyed, KeysetPaginator,
    KeysetSource, MAX_PAGE_SIZE, MemorySource, Page, PaginationError, Window,
};
