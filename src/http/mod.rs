//! HTTP client module
//!
//! Provides the rate-limited API client used for both migration directions.
//!
//! # Features
//!
//! - **Automatic Retries**: Configurable retry logic with backoff and jitter
//! - **Rate Limiting**: Token bucket rate limiter using governor
//! - **Backoff Strategies**: Constant, linear, and exponential backoff
//! - **Authentication**: Integration with the auth module

mod client;
mod rate_limit;

pub use client::{HttpClient, HttpClientConfig, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
