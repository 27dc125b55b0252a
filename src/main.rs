use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod auth;
mod config;
mod http;
mod keycloak;
mod probe;
mod task;

use config::{KeycloakConfig, OpenmrsConfig};
use http::HttpClient;
use keycloak::KeycloakAdmin;
use task::{DataSeedingTask, StartupTask, TaskCoordinator, UserProvisioningTask};

/// One-shot bootstrapper: seeds OpenMRS demo data and provisions Keycloak
/// users, then exits.
#[derive(Parser)]
#[command(name = "demo-bootstrap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    openmrs: OpenmrsConfig,

    #[command(flatten)]
    keycloak: KeycloakConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let client = Arc::new(HttpClient::new());

    // Registry built by composition: every known task is listed here, in
    // order; enabled flags decide what actually runs.
    let tasks: Vec<Box<dyn StartupTask>> = vec![
        Box::new(DataSeedingTask::new(
            Arc::clone(&client),
            &cli.openmrs,
            &cli.keycloak,
        )),
        Box::new(UserProvisioningTask::new(
            Arc::clone(&client),
            KeycloakAdmin::new(&cli.keycloak),
            &cli.keycloak,
        )),
    ];

    // Exit code 0 means "all enabled tasks finished", not "all succeeded";
    // individual task failures surface in the logs only.
    TaskCoordinator::new(tasks).run().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["demo-bootstrap"]);
        assert_eq!(cli.openmrs.url, "http://localhost/openmrs");
        assert_eq!(cli.openmrs.max_retries, 5);
        assert_eq!(cli.openmrs.demo_patients, 50);
        assert!(cli.openmrs.demo_data_enabled);
        assert!(!cli.keycloak.user_creation_enabled);
    }

    #[test]
    fn test_enable_flags_take_explicit_values() {
        let cli = Cli::parse_from([
            "demo-bootstrap",
            "--demo-data-enabled",
            "false",
            "--user-creation-enabled",
            "true",
        ]);
        assert!(!cli.openmrs.demo_data_enabled);
        assert!(cli.keycloak.user_creation_enabled);
    }
}
