//! Pagination strategy implementations
//!
//! Request parameters are derived purely from the persisted cursor, so a
//! resumed extraction continues from the exact page the checkpoint recorded.

use super::types::{NextPage, PageCursor, PaginationConfig};
use crate::json;
use serde_json::Value;
use std::collections::HashMap;

impl PaginationConfig {
    /// Query parameters for the next listing request
    pub fn params(&self, cursor: &PageCursor) -> HashMap<String, String> {
        let mut params = HashMap::new();
        match self {
            PaginationConfig::Offset {
                offset_param,
                limit_param,
                page_size,
                ..
            } => {
                params.insert(offset_param.clone(), cursor.offset.to_string());
                params.insert(limit_param.clone(), page_size.to_string());
            }
            PaginationConfig::Page {
                page_param,
                size_param,
                start_page,
                page_size,
            } => {
                let page = cursor.page.max(*start_page);
                params.insert(page_param.clone(), page.to_string());
                params.insert(size_param.clone(), page_size.to_string());
            }
            PaginationConfig::Cursor {
                cursor_param,
                size_param,
                page_size,
                ..
            } => {
                if let Some(token) = &cursor.cursor {
                    params.insert(cursor_param.clone(), token.clone());
                }
                if let (Some(param), Some(size)) = (size_param, page_size) {
                    params.insert(param.clone(), size.to_string());
                }
            }
        }
        params
    }

    /// Advance the cursor after one page of `records_count` items
    ///
    /// An empty page always ends the listing. Offset and page styles also
    /// stop on a short page; offset style additionally honors a total-count
    /// field when the endpoint reports one.
    pub fn advance(
        &self,
        body: &Value,
        records_count: usize,
        cursor: &mut PageCursor,
    ) -> NextPage {
        cursor.total_fetched += records_count as u64;

        if records_count == 0 {
            cursor.done = true;
            return NextPage::Done;
        }

        match self {
            PaginationConfig::Offset {
                page_size,
                total_path,
                ..
            } => {
                cursor.offset += records_count as u64;

                if let Some(path) = total_path {
                    if let Some(total) = json::extract_u64(body, path) {
                        if cursor.total_fetched >= total {
                            cursor.done = true;
                            return NextPage::Done;
                        }
                    }
                }

                if records_count < *page_size as usize {
                    cursor.done = true;
                    return NextPage::Done;
                }
            }
            PaginationConfig::Page {
                start_page,
                page_size,
                ..
            } => {
                cursor.page = cursor.page.max(*start_page) + 1;

                if records_count < *page_size as usize {
                    cursor.done = true;
                    return NextPage::Done;
                }
            }
            PaginationConfig::Cursor { cursor_path, .. } => {
                match json::extract_string(body, cursor_path) {
                    Some(token) if !token.is_empty() => {
                        cursor.cursor = Some(token);
                    }
                    _ => {
                        cursor.done = true;
                        return NextPage::Done;
                    }
                }
            }
        }

        NextPage::Continue
    }
}
