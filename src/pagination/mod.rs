//! Pagination module
//!
//! Supports offset, page-number and cursor listings.
//!
//! # Overview
//!
//! Listing endpoints on both sides of a migration page their results, each
//! in its own dialect. A [`PaginationConfig`] describes the dialect and a
//! [`PageCursor`] records the position, which is persisted with extraction
//! checkpoints so interrupted runs resume at the first unfetched page.

mod strategies;
mod types;

pub use types::{NextPage, PageCursor, PaginationConfig};
