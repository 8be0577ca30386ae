// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier::config::Config;
use courier::kubernetes::wait_for_crd;
use courier::reconcilers::ProviderServiceAccountReconciler;
use courier::types::ProviderServiceAccount;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting courier operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: testing_mode={}, create_token_secrets={}, system_accounts={:?}",
        config.testing_mode, config.create_token_secrets, config.system_accounts
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to management cluster");

    info!("Waiting for ProviderServiceAccount CRD to become available...");
    wait_for_crd::<ProviderServiceAccount>(&client).await?;

    let reconciler = ProviderServiceAccountReconciler::new(client, config);

    info!("Starting reconciler...");
    reconciler.run().await?;

    warn!("Reconciler stopped");
    Ok(())
}
