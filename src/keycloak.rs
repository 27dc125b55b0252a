//! Keycloak collaborators: the user-batch loader and the admin client.
//!
//! The admin operations sit behind the [`IdentityAdmin`] trait so the
//! provisioning loop can run against a test double. The production
//! [`KeycloakAdmin`] speaks the Keycloak admin REST API and acquires its
//! access token through a scoped client-credentials exchange on first use.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::auth::{client_credentials_token, AuthError, AuthMode};
use crate::config::KeycloakConfig;
use crate::http::HttpError;
use url::Url;

/// Stock resource name; a missing file with this name falls back to the copy
/// embedded at build time.
pub const DEFAULT_USERS_RESOURCE: &str = "users.json";

const EMBEDDED_USERS: &str = include_str!("../resources/users.json");

/// Request timeout for admin calls in seconds
const ADMIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("user definitions not found at {0}")]
    NotFound(String),
    #[error("failed to read user definitions: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse user definitions: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("{entity} '{name}' not found")]
    NotFound { entity: &'static str, name: String },
    #[error("{operation} failed with status {status}")]
    Remote {
        operation: &'static str,
        status: StatusCode,
    },
    #[error("failed to decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        source: serde_json::Error,
    },
}

/// One user to provision. Role fields drive the assignment loops; every
/// other field (enabled, email, credentials, ...) is passed through verbatim
/// to the create-user call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinition {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub realm_roles: Vec<String>,
    #[serde(default, skip_serializing)]
    pub client_roles: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UserBatch {
    users: Vec<UserDefinition>,
}

/// Load the user batch from the filesystem, falling back to the embedded
/// resource when the path names the stock file but nothing exists on disk.
pub fn load_user_batch(path: &str) -> Result<Vec<UserDefinition>, BatchError> {
    let on_disk = Path::new(path);
    let raw = if on_disk.exists() {
        debug!("Loading users from external file: {}", path);
        std::fs::read_to_string(on_disk)?
    } else if on_disk.file_name() == Path::new(DEFAULT_USERS_RESOURCE).file_name() {
        debug!("External file not found, using embedded resource");
        EMBEDDED_USERS.to_string()
    } else {
        return Err(BatchError::NotFound(path.to_string()));
    };

    let batch: UserBatch = serde_json::from_str(&raw)?;
    Ok(batch.users)
}

/// A realm or client role, as returned by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleRef {
    pub id: String,
    pub name: String,
}

/// A client registration within the realm.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientRef {
    pub id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    username: String,
}

/// Administrative operations against the identity provider.
pub trait IdentityAdmin: Send + Sync {
    fn find_user_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<String>, AdminError>> + Send;

    fn create_user(
        &self,
        user: &UserDefinition,
    ) -> impl Future<Output = Result<(), AdminError>> + Send;

    fn find_realm_role(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<RoleRef, AdminError>> + Send;

    fn assign_realm_roles(
        &self,
        user_id: &str,
        roles: &[RoleRef],
    ) -> impl Future<Output = Result<(), AdminError>> + Send;

    fn find_client_by_client_id(
        &self,
        client_id: &str,
    ) -> impl Future<Output = Result<ClientRef, AdminError>> + Send;

    fn find_client_role(
        &self,
        client: &ClientRef,
        name: &str,
    ) -> impl Future<Output = Result<RoleRef, AdminError>> + Send;

    fn assign_client_roles(
        &self,
        user_id: &str,
        client: &ClientRef,
        roles: &[RoleRef],
    ) -> impl Future<Output = Result<(), AdminError>> + Send;
}

/// Production admin client for the Keycloak admin REST API.
pub struct KeycloakAdmin {
    http: reqwest::Client,
    server_url: String,
    realm: String,
    auth: AuthMode,
    token: OnceCell<String>,
}

impl KeycloakAdmin {
    pub fn new(config: &KeycloakConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADMIN_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            server_url: config.server_url.clone(),
            realm: config.realm.clone(),
            auth: config.auth_mode(),
            token: OnceCell::new(),
        }
    }

    /// Admin access token, acquired once on first use.
    async fn token(&self) -> Result<&str, AdminError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                match &self.auth {
                    AuthMode::OAuth {
                        server_url,
                        realm,
                        client_id,
                        client_secret,
                    } => client_credentials_token(server_url, realm, client_id, client_secret)
                        .await,
                    AuthMode::Basic { .. } => Err(AuthError::TokenExchange(
                        "admin client requires OAuth client credentials".to_string(),
                    )),
                }
            })
            .await?;
        Ok(token.as_str())
    }

    /// Build an admin endpoint URL, percent-encoding each path segment (role
    /// names may contain spaces and colons).
    fn admin_url(&self, segments: &[&str]) -> Result<Url, AdminError> {
        let mut url = Url::parse(&self.server_url).map_err(HttpError::from)?;
        url.path_segments_mut()
            .map_err(|()| {
                HttpError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(["admin", "realms", self.realm.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<T, AdminError> {
        let token = self.token().await?.to_string();
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(HttpError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdminError::Remote { operation, status });
        }

        let body = response.text().await.map_err(HttpError::from)?;
        serde_json::from_str(&body).map_err(|source| AdminError::Decode { operation, source })
    }

    async fn expect_success(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<(), AdminError> {
        let token = self.token().await?.to_string();
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(HttpError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdminError::Remote { operation, status });
        }
        Ok(())
    }
}

impl IdentityAdmin for KeycloakAdmin {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<String>, AdminError> {
        let request = self
            .http
            .get(self.admin_url(&["users"])?)
            .query(&[("username", username), ("exact", "true")]);

        let records: Vec<UserRecord> = self.fetch_json(request, "user lookup").await?;
        Ok(records
            .into_iter()
            .find(|record| record.username == username)
            .map(|record| record.id))
    }

    async fn create_user(&self, user: &UserDefinition) -> Result<(), AdminError> {
        debug!("Creating user '{}'", user.username);
        let request = self.http.post(self.admin_url(&["users"])?).json(user);
        self.expect_success(request, "user creation").await
    }

    async fn find_realm_role(&self, name: &str) -> Result<RoleRef, AdminError> {
        let request = self.http.get(self.admin_url(&["roles", name])?);
        self.fetch_json(request, "realm role lookup")
            .await
            .map_err(|err| match err {
                AdminError::Remote { status, .. } if status == StatusCode::NOT_FOUND => {
                    AdminError::NotFound {
                        entity: "realm role",
                        name: name.to_string(),
                    }
                }
                other => other,
            })
    }

    async fn assign_realm_roles(
        &self,
        user_id: &str,
        roles: &[RoleRef],
    ) -> Result<(), AdminError> {
        let request = self
            .http
            .post(self.admin_url(&["users", user_id, "role-mappings", "realm"])?)
            .json(roles);
        self.expect_success(request, "realm role assignment").await
    }

    async fn find_client_by_client_id(&self, client_id: &str) -> Result<ClientRef, AdminError> {
        let request = self
            .http
            .get(self.admin_url(&["clients"])?)
            .query(&[("clientId", client_id)]);

        let clients: Vec<ClientRef> = self.fetch_json(request, "client lookup").await?;
        clients
            .into_iter()
            .next()
            .ok_or_else(|| AdminError::NotFound {
                entity: "client",
                name: client_id.to_string(),
            })
    }

    async fn find_client_role(
        &self,
        client: &ClientRef,
        name: &str,
    ) -> Result<RoleRef, AdminError> {
        let request = self
            .http
            .get(self.admin_url(&["clients", &client.id, "roles", name])?);
        self.fetch_json(request, "client role lookup")
            .await
            .map_err(|err| match err {
                AdminError::Remote { status, .. } if status == StatusCode::NOT_FOUND => {
                    AdminError::NotFound {
                        entity: "client role",
                        name: name.to_string(),
                    }
                }
                other => other,
            })
    }

    async fn assign_client_roles(
        &self,
        user_id: &str,
        client: &ClientRef,
        roles: &[RoleRef],
    ) -> Result<(), AdminError> {
        let request = self
            .http
            .post(self.admin_url(&["users", user_id, "role-mappings", "clients", &client.id])?)
            .json(roles);
        self.expect_success(request, "client role assignment").await
    }
}
