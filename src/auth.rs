//! Credential resolution for authenticated backend calls.
//!
//! Two interchangeable strategies, selected by configuration: Basic
//! (deterministic encoding of `username:password`, no network) and OAuth
//! client-credentials against the identity provider's token endpoint.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Timeout for the token exchange in seconds
const TOKEN_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to obtain OAuth token: {0}")]
    TokenExchange(String),
    #[error("token response does not contain a valid 'access_token' field")]
    MissingToken,
}

/// Authentication strategy, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub enum AuthMode {
    Basic {
        username: String,
        password: String,
    },
    OAuth {
        server_url: String,
        realm: String,
        client_id: String,
        client_secret: String,
    },
}

/// A resolved `Authorization` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Bearer(String),
    Basic(String),
}

impl AuthHeader {
    pub fn header_value(&self) -> String {
        match self {
            AuthHeader::Bearer(token) => format!("Bearer {}", token),
            AuthHeader::Basic(encoded) => format!("Basic {}", encoded),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Produces an `Authorization` header for one downstream call.
///
/// Each resolution is independent; nothing is cached between calls. Tasks
/// run once per process, so there is no refresh logic, but the interface
/// does not preclude adding it.
pub struct CredentialResolver {
    mode: AuthMode,
}

impl CredentialResolver {
    pub fn new(mode: AuthMode) -> Self {
        Self { mode }
    }

    pub async fn resolve(&self) -> Result<AuthHeader, AuthError> {
        match &self.mode {
            AuthMode::Basic { username, password } => {
                debug!("Basic authentication enabled, encoding credentials");
                Ok(AuthHeader::Basic(encode_basic(username, password)))
            }
            AuthMode::OAuth {
                server_url,
                realm,
                client_id,
                client_secret,
            } => {
                info!("OAuth2 authentication enabled, obtaining access token");
                let token =
                    client_credentials_token(server_url, realm, client_id, client_secret).await?;
                Ok(AuthHeader::Bearer(token))
            }
        }
    }
}

fn encode_basic(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{}:{}", username, password))
}

/// Exchange client credentials for an access token.
///
/// The HTTP client lives only for this exchange; it is dropped on every exit
/// path, including token-fetch failure.
pub(crate) async fn client_credentials_token(
    server_url: &str,
    realm: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, AuthError> {
    let token_url = format!(
        "{}/realms/{}/protocol/openid-connect/token",
        server_url.trim_end_matches('/'),
        realm
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
        .build()
        .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];

    let response = client
        .post(&token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::TokenExchange(format!(
            "token endpoint returned status {}",
            status
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

    if token.access_token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    debug!("Successfully obtained access token");
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_resolution_is_deterministic() {
        let resolver = CredentialResolver::new(AuthMode::Basic {
            username: "admin".to_string(),
            password: "Admin123".to_string(),
        });

        let first = resolver.resolve().await.unwrap();
        let second = resolver.resolve().await.unwrap();
        assert_eq!(first, second);

        // base64("admin:Admin123")
        assert_eq!(first, AuthHeader::Basic("YWRtaW46QWRtaW4xMjM=".to_string()));
    }

    #[test]
    fn test_header_value_shapes() {
        assert_eq!(
            AuthHeader::Bearer("abc".to_string()).header_value(),
            "Bearer abc"
        );
        assert_eq!(
            AuthHeader::Basic("YWJj".to_string()).header_value(),
            "Basic YWJj"
        );
    }

    #[tokio::test]
    async fn test_oauth_failure_is_an_auth_error() {
        // Nothing listens here, so the exchange fails at transport level.
        let resolver = CredentialResolver::new(AuthMode::OAuth {
            server_url: "http://127.0.0.1:9".to_string(),
            realm: "demo".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        });

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(_)));
    }
}
