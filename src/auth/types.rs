//! Auth configuration types
//!
//! These types deserialize straight from the `auth` block of the migration
//! config, after environment templates have been interpolated.

use crate::types::JwtAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_token_lifetime() -> u64 {
    3600
}

/// Authentication configuration for one API direction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// Bearer token authentication (static token from the environment)
    Bearer {
        /// The bearer token
        token: String,
    },

    /// HTTP Basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },

    /// Self-signed JWT authentication (Zephyr-style service tokens)
    ///
    /// A short-lived token is generated locally from the shared secret and
    /// regenerated when it expires.
    Jwt {
        /// Token issuer (iss claim), the API access key
        issuer: String,
        /// Token subject (sub claim, optional account id)
        #[serde(default)]
        subject: Option<String>,
        /// Token audience (aud claim, optional)
        #[serde(default)]
        audience: Option<String>,
        /// Signing key: shared secret for HS*, PEM private key for RS*
        secret: String,
        /// Signing algorithm
        #[serde(default)]
        algorithm: JwtAlgorithm,
        /// Token lifetime in seconds
        #[serde(default = "default_token_lifetime")]
        token_lifetime_seconds: u64,
        /// Additional claims
        #[serde(default)]
        claims: HashMap<String, String>,
    },

    /// OAuth2 Client Credentials flow (qTest-style site tokens)
    Oauth2ClientCredentials {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scopes
        #[serde(default)]
        scopes: Vec<String>,
    },
}

/// Cached token with expiration
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The access token
    pub token: String,
    /// When the token expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Create a new cached token
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
        Self {
            token,
            expires_at: Some(expires_at),
        }
    }

    /// Check if the token is expired (with 30 second buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(30);
                Utc::now() + buffer >= expires_at
            }
            None => false, // No expiration = never expires
        }
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_cached_token_not_expired() {
        let token = CachedToken::expires_in("test".to_string(), 3600);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_cached_token_expired() {
        let token = CachedToken::expires_in("test".to_string(), -100);
        assert!(token.is_expired());
    }

    #[test]
    fn test_cached_token_no_expiration() {
        let token = CachedToken::new("test".to_string(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert!(matches!(config, AuthConfig::None));
    }

    #[test]
    fn test_auth_config_from_yaml() {
        let yaml = "type: bearer\ntoken: tok-123\n";
        let config: AuthConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config, AuthConfig::Bearer { token } if token == "tok-123"));

        let yaml = "type: jwt\nissuer: access-key\nsecret: shh\n";
        let config: AuthConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            AuthConfig::Jwt {
                issuer,
                algorithm,
                token_lifetime_seconds,
                ..
            } => {
                assert_eq!(issuer, "access-key");
                assert_eq!(algorithm, JwtAlgorithm::HS256);
                assert_eq!(token_lifetime_seconds, 3600);
            }
            other => panic!("expected jwt config, got {other:?}"),
        }
    }
}
