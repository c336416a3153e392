//! Page requests and paged results
//!
//! Paging metadata travels next to the items rather than inside them; callers
//! that speak HTTP put [`PaginationHeader::to_header_value`] in a response
//! header.

use serde::{Deserialize, Serialize};

use crate::error::{MessagingError, Result};

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page_number: usize,
    page_size: usize,
}

impl PageRequest {
    /// Validate caller-supplied paging values.
    ///
    /// Non-positive values are rejected. A page size above `max_page_size`
    /// is capped to it.
    pub fn new(page_number: i64, page_size: i64, max_page_size: usize) -> Result<Self> {
        if page_number < 1 {
            return Err(MessagingError::InvalidPageNumber(page_number));
        }
        if page_size < 1 {
            return Err(MessagingError::InvalidPageSize(page_size));
        }

        let page_size = usize::try_from(page_size)
            .unwrap_or(usize::MAX)
            .min(max_page_size.max(1));
        let page_number =
            usize::try_from(page_number).map_err(|_| MessagingError::InvalidPageNumber(page_number))?;

        Ok(Self {
            page_number,
            page_size,
        })
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of rows to skip
    pub fn offset(&self) -> usize {
        (self.page_number - 1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the metadata needed to fetch the others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
}

impl<T> PagedList<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_count: usize) -> Self {
        Self {
            items,
            current_page: request.page_number(),
            page_size: request.page_size(),
            total_count,
            total_pages: total_count.div_ceil(request.page_size()),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedList<U> {
        PagedList {
            items: self.items.into_iter().map(f).collect(),
            current_page: self.current_page,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn header(&self) -> PaginationHeader {
        PaginationHeader {
            current_page: self.current_page,
            items_per_page: self.page_size,
            total_items: self.total_count,
            total_pages: self.total_pages,
        }
    }
}

/// Paging metadata in the shape the web client reads from the
/// `Pagination` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationHeader {
    pub current_page: usize,
    pub items_per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl PaginationHeader {
    pub const NAME: &'static str = "Pagination";

    pub fn to_header_value(&self) -> String {
        // A struct of plain integers always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}
