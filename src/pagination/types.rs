//! Pagination types

use serde::{Deserialize, Serialize};

/// Position within a paginated listing
///
/// The cursor is persisted alongside extraction checkpoints so a resumed
/// run can re-issue the request for the first unfetched page. Every field
/// a strategy needs to build request parameters lives here, never in
/// transient paginator state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Next page number to fetch (page-number style)
    #[serde(default)]
    pub page: u32,
    /// Next record offset to fetch (offset style)
    #[serde(default)]
    pub offset: u64,
    /// Opaque continuation token (cursor style)
    #[serde(default)]
    pub cursor: Option<String>,
    /// Records fetched so far across all pages
    #[serde(default)]
    pub total_fetched: u64,
    /// Whether the listing is exhausted
    #[serde(default)]
    pub done: bool,
}

impl PageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Outcome of processing one page of results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    /// More pages remain; the cursor has been advanced
    Continue,
    /// The listing is exhausted
    Done,
}

impl NextPage {
    pub fn is_done(&self) -> bool {
        matches!(self, NextPage::Done)
    }
}

/// How a listing endpoint pages its results
///
/// Offset style sends a record offset and limit (Zephyr's startAt and
/// maxResults). Page style sends a 1-based page number and size (qTest's
/// page and pageSize). Cursor style threads an opaque token returned by
/// each response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum PaginationConfig {
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
        /// Optional path to a total-record count in the response body;
        /// when present, extraction stops once that many records are seen
        #[serde(default)]
        total_path: Option<String>,
    },
    Page {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_size_param")]
        size_param: String,
        #[serde(default = "default_start_page")]
        start_page: u32,
        #[serde(default = "default_page_size")]
        page_size: u32,
    },
    Cursor {
        cursor_param: String,
        /// Path to the continuation token in the response body
        cursor_path: String,
        #[serde(default)]
        size_param: Option<String>,
        #[serde(default)]
        page_size: Option<u32>,
    },
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig::Offset {
            offset_param: default_offset_param(),
            limit_param: default_limit_param(),
            page_size: default_page_size(),
            total_path: None,
        }
    }
}

impl PaginationConfig {
    /// Page size requested per listing call
    pub fn page_size(&self) -> u32 {
        match self {
            PaginationConfig::Offset { page_size, .. }
            | PaginationConfig::Page { page_size, .. } => *page_size,
            PaginationConfig::Cursor { page_size, .. } => {
                page_size.unwrap_or_else(default_page_size)
            }
        }
    }
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_size_param() -> String {
    "pageSize".to_string()
}

fn default_start_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}
