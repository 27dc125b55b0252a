//! Configuration surface.
//!
//! Every key binds to both a command-line flag and an environment variable.
//! The two groups mirror the two external dependencies: the OpenMRS backend
//! that receives the demo-data trigger, and the Keycloak identity provider
//! that holds users, roles, and the OAuth token endpoint.

use clap::{ArgAction, Args};

use crate::auth::AuthMode;
use crate::http::endpoint;
use crate::probe::RetryPolicy;

/// OpenMRS backend configuration.
#[derive(Args, Debug, Clone)]
pub struct OpenmrsConfig {
    /// Base URL of the OpenMRS server
    #[arg(
        long = "openmrs-url",
        env = "OPENMRS_SERVER_URL",
        default_value = "http://localhost/openmrs"
    )]
    pub url: String,

    /// Username for Basic authentication
    #[arg(long = "openmrs-username", env = "OPENMRS_USERNAME", default_value = "admin")]
    pub username: String,

    /// Password for Basic authentication
    #[arg(
        long = "openmrs-password",
        env = "OPENMRS_PASSWORD",
        default_value = "Admin123"
    )]
    pub password: String,

    /// Authenticate with an OAuth client-credentials grant instead of Basic
    #[arg(
        long = "openmrs-oauth-enabled",
        env = "OPENMRS_OAUTH_ENABLED",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub oauth_enabled: bool,

    /// OAuth client id used for the client-credentials grant
    #[arg(
        id = "openmrs_client_id",
        long = "openmrs-oauth-client-id",
        env = "OPENMRS_OAUTH_CLIENT_ID",
        default_value = ""
    )]
    pub client_id: String,

    /// OAuth client secret used for the client-credentials grant
    #[arg(
        id = "openmrs_client_secret",
        long = "openmrs-oauth-client-secret",
        env = "OPENMRS_OAUTH_CLIENT_SECRET",
        default_value = ""
    )]
    pub client_secret: String,

    /// Health check retries before giving up
    #[arg(
        id = "openmrs_max_retries",
        long = "openmrs-max-retries",
        env = "OPENMRS_HEALTHCHECK_MAX_RETRIES",
        default_value_t = 5
    )]
    pub max_retries: u32,

    /// Delay between health check attempts, in milliseconds
    #[arg(
        id = "openmrs_retry_delay_millis",
        long = "openmrs-retry-delay-millis",
        env = "OPENMRS_HEALTHCHECK_RETRY_DELAY_MILLIS",
        default_value_t = 5000
    )]
    pub retry_delay_millis: u64,

    /// Number of demo patients to generate
    #[arg(long = "demo-patients", env = "OPENMRS_DEMO_PATIENTS", default_value_t = 50)]
    pub demo_patients: u32,

    /// Enable the demo data seeding task
    #[arg(
        long = "demo-data-enabled",
        env = "OPENMRS_DEMO_DATA_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub demo_data_enabled: bool,
}

impl OpenmrsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            "OpenMRS",
            endpoint(&self.url, "/health"),
            self.max_retries,
            self.retry_delay_millis,
        )
    }

    /// Authentication strategy for the demo-data trigger. The OAuth variant
    /// exchanges this backend's client credentials at the Keycloak token
    /// endpoint.
    pub fn auth_mode(&self, keycloak: &KeycloakConfig) -> AuthMode {
        if self.oauth_enabled {
            AuthMode::OAuth {
                server_url: keycloak.server_url.clone(),
                realm: keycloak.realm.clone(),
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
            }
        } else {
            AuthMode::Basic {
                username: self.username.clone(),
                password: self.password.clone(),
            }
        }
    }
}

/// Keycloak identity provider configuration.
#[derive(Args, Debug, Clone)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak server
    #[arg(
        long = "keycloak-url",
        env = "KEYCLOAK_SERVER_URL",
        default_value = "http://localhost:8080"
    )]
    pub server_url: String,

    /// Realm holding the demo users and clients
    #[arg(long = "keycloak-realm", env = "KEYCLOAK_REALM", default_value = "ozone")]
    pub realm: String,

    /// Admin client id for the client-credentials grant
    #[arg(
        id = "keycloak_client_id",
        long = "keycloak-client-id",
        env = "KEYCLOAK_CLIENT_ID",
        default_value = ""
    )]
    pub client_id: String,

    /// Admin client secret for the client-credentials grant
    #[arg(
        id = "keycloak_client_secret",
        long = "keycloak-client-secret",
        env = "KEYCLOAK_CLIENT_SECRET",
        default_value = ""
    )]
    pub client_secret: String,

    /// Health check retries before giving up
    #[arg(
        id = "keycloak_max_retries",
        long = "keycloak-max-retries",
        env = "KEYCLOAK_HEALTHCHECK_MAX_RETRIES",
        default_value_t = 5
    )]
    pub max_retries: u32,

    /// Delay between health check attempts, in milliseconds
    #[arg(
        id = "keycloak_retry_delay_millis",
        long = "keycloak-retry-delay-millis",
        env = "KEYCLOAK_HEALTHCHECK_RETRY_DELAY_MILLIS",
        default_value_t = 5000
    )]
    pub retry_delay_millis: u64,

    /// Path to the JSON file listing users to provision
    #[arg(
        long = "users-json-path",
        env = "KEYCLOAK_USERS_JSON_PATH",
        default_value = "users.json"
    )]
    pub users_json_path: String,

    /// Enable the user provisioning task
    #[arg(
        long = "user-creation-enabled",
        env = "KEYCLOAK_USER_CREATION_ENABLED",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub user_creation_enabled: bool,
}

impl KeycloakConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            "Keycloak",
            endpoint(&self.server_url, "/health/ready"),
            self.max_retries,
            self.retry_delay_millis,
        )
    }

    /// Authentication strategy for the admin client.
    pub fn auth_mode(&self) -> AuthMode {
        AuthMode::OAuth {
            server_url: self.server_url.clone(),
            realm: self.realm.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn openmrs(url: &str, max_retries: u32) -> OpenmrsConfig {
        OpenmrsConfig {
            url: url.to_string(),
            username: "admin".to_string(),
            password: "Admin123".to_string(),
            oauth_enabled: false,
            client_id: String::new(),
            client_secret: String::new(),
            max_retries,
            retry_delay_millis: 1,
            demo_patients: 5,
            demo_data_enabled: true,
        }
    }

    pub fn keycloak(url: &str, users_json_path: &str) -> KeycloakConfig {
        KeycloakConfig {
            server_url: url.to_string(),
            realm: "ozone".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            max_retries: 0,
            retry_delay_millis: 1,
            users_json_path: users_json_path.to_string(),
            user_creation_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMode;

    #[test]
    fn test_retry_policy_points_at_health_endpoints() {
        let openmrs = test_support::openmrs("http://localhost/openmrs/", 3);
        let policy = openmrs.retry_policy();
        assert_eq!(policy.probe_url, "http://localhost/openmrs/health");
        assert_eq!(policy.max_retries, 3);

        let keycloak = test_support::keycloak("http://localhost:8080", "users.json");
        assert_eq!(
            keycloak.retry_policy().probe_url,
            "http://localhost:8080/health/ready"
        );
    }

    #[test]
    fn test_auth_mode_selection() {
        let keycloak = test_support::keycloak("http://localhost:8080", "users.json");

        let basic = test_support::openmrs("http://localhost/openmrs", 0);
        assert!(matches!(
            basic.auth_mode(&keycloak),
            AuthMode::Basic { .. }
        ));

        let mut oauth = test_support::openmrs("http://localhost/openmrs", 0);
        oauth.oauth_enabled = true;
        oauth.client_id = "openmrs".to_string();
        match oauth.auth_mode(&keycloak) {
            AuthMode::OAuth {
                server_url, realm, ..
            } => {
                assert_eq!(server_url, "http://localhost:8080");
                assert_eq!(realm, "ozone");
            }
            other => panic!("expected OAuth mode, got {:?}", other),
        }
    }
}
