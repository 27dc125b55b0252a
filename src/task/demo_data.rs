//! Demo data seeding against the OpenMRS backend.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::json;
use tracing::{error, info};

use super::{StartupTask, TaskError};
use crate::auth::{AuthHeader, CredentialResolver};
use crate::config::{KeycloakConfig, OpenmrsConfig};
use crate::http::{endpoint, RestClient};
use crate::probe::{wait_for_target, RetryPolicy};

const GENERATE_DEMO_DATA_ENDPOINT: &str = "/ws/rest/v1/referencedemodata/generate";

const SYSTEM_SETTING_ENDPOINT: &str = "/ws/rest/v1/systemsetting";

const CREATE_ON_NEXT_STARTUP_PROPERTY: &str = "referencedemodata.createDemoPatientsOnNextStartup";

/// Waits for OpenMRS, then issues one authenticated call that triggers
/// demo-patient generation. On success it additionally tries to flip the
/// backend's "generate on next startup" setting off; that follow-up is an
/// optimization for the next boot and never fails the task.
pub struct DataSeedingTask<R: RestClient> {
    client: Arc<R>,
    policy: RetryPolicy,
    resolver: CredentialResolver,
    base_url: String,
    demo_patients: u32,
    enabled: bool,
}

impl<R: RestClient> DataSeedingTask<R> {
    pub fn new(client: Arc<R>, openmrs: &OpenmrsConfig, keycloak: &KeycloakConfig) -> Self {
        Self {
            client,
            policy: openmrs.retry_policy(),
            resolver: CredentialResolver::new(openmrs.auth_mode(keycloak)),
            base_url: openmrs.url.clone(),
            demo_patients: openmrs.demo_patients,
            enabled: openmrs.demo_data_enabled,
        }
    }

    async fn seed(self) -> Result<(), TaskError> {
        if !wait_for_target(self.client.as_ref(), &self.policy).await {
            return Err(TaskError::Unavailable(self.policy.target));
        }

        let auth = self.resolver.resolve().await?;
        let url = endpoint(&self.base_url, GENERATE_DEMO_DATA_ENDPOINT);
        let body = json!({
            "numberOfDemoPatients": self.demo_patients,
            "createIfNotExists": true,
        });

        info!("Triggering generation of {} demo patients", self.demo_patients);
        let response = self.client.post_json(&url, Some(&auth), &body).await?;
        if !response.is_success() {
            return Err(TaskError::RemoteOperation {
                status: response.status,
            });
        }

        self.disable_generation_on_next_startup(&auth).await;

        info!("Demo data generation completed successfully");
        Ok(())
    }

    /// Best-effort follow-up: look up the "create demo patients on next
    /// startup" setting and set its value to "0". Every failure shape (bad
    /// status, empty result list, missing body, transport error) is logged
    /// and swallowed.
    async fn disable_generation_on_next_startup(&self, auth: &AuthHeader) {
        let query_url = format!(
            "{}/?q={}",
            endpoint(&self.base_url, SYSTEM_SETTING_ENDPOINT),
            CREATE_ON_NEXT_STARTUP_PROPERTY
        );

        let response = match self.client.get(&query_url, Some(auth)).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    "Failed to get {} system setting: {}",
                    CREATE_ON_NEXT_STARTUP_PROPERTY, err
                );
                return;
            }
        };

        if !response.is_success() {
            error!(
                "Failed to get {} system setting. Status code: {}",
                CREATE_ON_NEXT_STARTUP_PROPERTY, response.status
            );
            return;
        }

        let Some(uuid) = first_setting_uuid(&response.body) else {
            error!("{} system setting not found", CREATE_ON_NEXT_STARTUP_PROPERTY);
            return;
        };

        let update_url = format!(
            "{}/{}",
            endpoint(&self.base_url, SYSTEM_SETTING_ENDPOINT),
            uuid
        );
        match self
            .client
            .post_json(&update_url, Some(auth), &json!({ "value": "0" }))
            .await
        {
            Ok(response) if response.is_success() => {
                info!("Disabled demo data generation on the next startup");
            }
            Ok(response) => {
                error!(
                    "Failed to update system setting. Status code: {}",
                    response.status
                );
            }
            Err(err) => error!("Failed to update system setting: {}", err),
        }
    }
}

/// Pull the identifier of the first matching system setting out of a
/// `{"results": [...]}` payload. An absent body, unparsable JSON, or an
/// empty result list all yield `None`.
fn first_setting_uuid(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("results")?
        .as_array()?
        .first()?
        .get("uuid")?
        .as_str()
        .map(str::to_owned)
}

impl<R: RestClient> StartupTask for DataSeedingTask<R> {
    fn name(&self) -> &'static str {
        "demo-data-generation"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, Result<(), TaskError>> {
        Box::pin(self.seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support;
    use crate::http::{ApiResponse, HttpError};
    use reqwest::StatusCode;
    use std::sync::Mutex;

    /// Scripted backend: healthy by default, with a configurable status for
    /// the generation trigger and a configurable system-setting payload.
    struct FakeRest {
        calls: Mutex<Vec<String>>,
        healthy: bool,
        generate_status: StatusCode,
        setting_body: String,
    }

    impl FakeRest {
        fn new(generate_status: StatusCode, setting_body: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                healthy: true,
                generate_status,
                setting_body: setting_body.to_string(),
            }
        }

        fn unhealthy() -> Self {
            Self {
                healthy: false,
                ..Self::new(StatusCode::OK, "{}")
            }
        }

        fn record(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RestClient for FakeRest {
        async fn get(
            &self,
            url: &str,
            _auth: Option<&AuthHeader>,
        ) -> Result<ApiResponse, HttpError> {
            self.record(format!("GET {}", url));
            if url.ends_with("/health") {
                let status = if self.healthy {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                return Ok(ApiResponse {
                    status,
                    body: String::new(),
                });
            }
            Ok(ApiResponse {
                status: StatusCode::OK,
                body: self.setting_body.clone(),
            })
        }

        async fn post_json(
            &self,
            url: &str,
            _auth: Option<&AuthHeader>,
            _body: &serde_json::Value,
        ) -> Result<ApiResponse, HttpError> {
            self.record(format!("POST {}", url));
            let status = if url.contains("referencedemodata/generate") {
                self.generate_status
            } else {
                StatusCode::OK
            };
            Ok(ApiResponse {
                status,
                body: String::new(),
            })
        }
    }

    fn task(client: Arc<FakeRest>) -> DataSeedingTask<FakeRest> {
        let openmrs = test_support::openmrs("http://localhost/openmrs", 0);
        let keycloak = test_support::keycloak("http://localhost:8080", "users.json");
        DataSeedingTask::new(client, &openmrs, &keycloak)
    }

    #[tokio::test]
    async fn test_failed_trigger_skips_the_follow_up() {
        let client = Arc::new(FakeRest::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"results": [{"uuid": "abc"}]}"#,
        ));
        let result = Box::new(task(Arc::clone(&client))).run().await;

        match result {
            Err(TaskError::RemoteOperation { status }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected RemoteOperation, got {:?}", other),
        }
        assert!(!client
            .calls()
            .iter()
            .any(|call| call.contains("systemsetting")));
    }

    #[tokio::test]
    async fn test_empty_setting_results_issue_no_update() {
        let client = Arc::new(FakeRest::new(StatusCode::OK, r#"{"results": []}"#));
        let result = Box::new(task(Arc::clone(&client))).run().await;

        assert!(result.is_ok());
        let calls = client.calls();
        assert!(calls
            .iter()
            .any(|call| call.starts_with("GET") && call.contains("systemsetting")));
        assert!(!calls
            .iter()
            .any(|call| call.starts_with("POST") && call.contains("systemsetting")));
    }

    #[tokio::test]
    async fn test_successful_seed_updates_the_setting() {
        let client = Arc::new(FakeRest::new(
            StatusCode::OK,
            r#"{"results": [{"uuid": "abc-123", "property": "referencedemodata.createDemoPatientsOnNextStartup"}]}"#,
        ));
        let result = Box::new(task(Arc::clone(&client))).run().await;

        assert!(result.is_ok());
        assert!(client
            .calls()
            .iter()
            .any(|call| call == "POST http://localhost/openmrs/ws/rest/v1/systemsetting/abc-123"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_aborts_before_the_trigger() {
        let client = Arc::new(FakeRest::unhealthy());
        let result = Box::new(task(Arc::clone(&client))).run().await;

        assert!(matches!(result, Err(TaskError::Unavailable("OpenMRS"))));
        assert!(!client.calls().iter().any(|call| call.starts_with("POST")));
    }

    #[test]
    fn test_first_setting_uuid_parsing() {
        assert_eq!(
            first_setting_uuid(r#"{"results": [{"uuid": "u1"}, {"uuid": "u2"}]}"#),
            Some("u1".to_string())
        );
        assert_eq!(first_setting_uuid(r#"{"results": []}"#), None);
        assert_eq!(first_setting_uuid(r#"{"count": 0}"#), None);
        assert_eq!(first_setting_uuid(""), None);
        assert_eq!(first_setting_uuid("not json"), None);
    }
}
