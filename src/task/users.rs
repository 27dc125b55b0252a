//! User provisioning against the Keycloak identity provider.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{StartupTask, TaskError};
use crate::config::KeycloakConfig;
use crate::http::RestClient;
use crate::keycloak::{load_user_batch, AdminError, IdentityAdmin, UserDefinition};
use crate::probe::{wait_for_target, RetryPolicy};

/// Waits for Keycloak, loads the user batch, and provisions each user in
/// turn. One user failing never aborts the rest of the batch.
pub struct UserProvisioningTask<R: RestClient, A: IdentityAdmin + 'static> {
    client: Arc<R>,
    admin: A,
    policy: RetryPolicy,
    users_json_path: String,
    enabled: bool,
}

impl<R: RestClient, A: IdentityAdmin + 'static> UserProvisioningTask<R, A> {
    pub fn new(client: Arc<R>, admin: A, config: &KeycloakConfig) -> Self {
        Self {
            client,
            admin,
            policy: config.retry_policy(),
            users_json_path: config.users_json_path.clone(),
            enabled: config.user_creation_enabled,
        }
    }

    async fn provision(self) -> Result<(), TaskError> {
        info!(
            "Starting user provisioning from JSON file: {}",
            self.users_json_path
        );
        if !wait_for_target(self.client.as_ref(), &self.policy).await {
            return Err(TaskError::Unavailable(self.policy.target));
        }

        let users = load_user_batch(&self.users_json_path)?;
        info!("Found {} user(s) to provision", users.len());

        for user in &users {
            if let Err(err) = provision_user(&self.admin, user).await {
                warn!(
                    "Failed to provision user '{}', continuing with the rest: {}",
                    user.username, err
                );
            }
        }

        info!("Completed user provisioning");
        Ok(())
    }
}

/// Create the user if absent, then attach the requested realm and client
/// roles. The user id is always re-resolved by username afterwards, because
/// creation responses do not reliably carry it.
async fn provision_user<A: IdentityAdmin>(
    admin: &A,
    user: &UserDefinition,
) -> Result<(), AdminError> {
    info!("Processing user '{}'", user.username);

    if admin.find_user_by_username(&user.username).await?.is_none() {
        admin.create_user(user).await?;
    }

    let user_id = admin
        .find_user_by_username(&user.username)
        .await?
        .ok_or_else(|| AdminError::NotFound {
            entity: "user",
            name: user.username.clone(),
        })?;

    if !user.realm_roles.is_empty() {
        debug!(
            "Assigning {} realm role(s) to '{}'",
            user.realm_roles.len(),
            user.username
        );
        let mut roles = Vec::with_capacity(user.realm_roles.len());
        for name in &user.realm_roles {
            roles.push(admin.find_realm_role(name).await?);
        }
        admin.assign_realm_roles(&user_id, &roles).await?;
    }

    for (client_id, role_names) in &user.client_roles {
        let client = admin.find_client_by_client_id(client_id).await?;
        let mut roles = Vec::with_capacity(role_names.len());
        for name in role_names {
            roles.push(admin.find_client_role(&client, name).await?);
        }
        admin.assign_client_roles(&user_id, &client, &roles).await?;
        debug!(
            "Assigned {} role(s) for client '{}' to '{}'",
            roles.len(),
            client_id,
            user.username
        );
    }

    info!("Completed configuration for user '{}'", user.username);
    Ok(())
}

impl<R: RestClient, A: IdentityAdmin + 'static> StartupTask for UserProvisioningTask<R, A> {
    fn name(&self) -> &'static str {
        "keycloak-user-provisioning"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, Result<(), TaskError>> {
        Box::pin(self.provision())
    }
}
