//! Authentication module
//!
//! Supports: Bearer, Basic, self-signed JWT (source side), and OAuth2
//! client credentials (destination side).
//!
//! The `Authenticator` handles all auth types and manages token caching
//! for auth types that require token refresh.

mod authenticator;
mod types;

pub use authenticator::Authenticator;
pub use types::{AuthConfig, CachedToken};
