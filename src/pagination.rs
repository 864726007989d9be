//! Page window arithmetic shared by every listing.
//!
//! Out-of-range requests are clamped instead of rejected; the returned
//! window always says which page was actually served.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    /// 1-based page actually served.
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub offset: u64,
    pub has_prev: bool,
    pub has_next: bool,
    /// True when `page` differs from the requested page.
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageWindow,
}

/// Compute the window for `requested_page` over `total_count` rows.
///
/// There is always at least one page, even when `total_count` is zero.
/// A zero `page_size` is treated as one.
pub fn paginate(total_count: u64, page_size: u32, requested_page: u32) -> PageWindow {
    let page_size = page_size.max(1);
    let pages = total_count.div_ceil(u64::from(page_size)).max(1);
    let total_pages = u32::try_from(pages).unwrap_or(u32::MAX);
    let page = requested_page.clamp(1, total_pages);

    PageWindow {
        page,
        page_size,
        total_pages,
        total_count,
        offset: u64::from(page - 1) * u64::from(page_size),
        has_prev: page > 1,
        has_next: page < total_pages,
        clamped: page != requested_page,
    }
}
