// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Target cluster client creation and kubeconfig utilities

use crate::constants::secrets;
use crate::error::{is_unauthorized, CourierError, Result, Step};
use crate::types::cluster::VSphereCluster;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{config::KubeConfigOptions, Api, Client, ResourceExt};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Supplies a client bound to the API server of an owning cluster.
#[async_trait]
pub trait TargetClientProvider: Send + Sync {
    async fn client_for(&self, cluster: &VSphereCluster) -> Result<Client>;

    /// Forget any state held for a cluster that is going away.
    async fn release(&self, _cluster: &VSphereCluster) {}
}

/// Builds target clients from Cluster API kubeconfig secrets in the management
/// cluster. Clients are reused until the kubeconfig secret changes.
pub struct KubeconfigClientProvider {
    manager_client: Client,
    testing_mode: bool,
    cache: RwLock<HashMap<String, CachedClient>>,
}

struct CachedClient {
    resource_version: String,
    client: Client,
}

impl KubeconfigClientProvider {
    pub fn new(manager_client: Client, testing_mode: bool) -> Self {
        Self {
            manager_client,
            testing_mode,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TargetClientProvider for KubeconfigClientProvider {
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    async fn client_for(&self, cluster: &VSphereCluster) -> Result<Client> {
        if self.testing_mode {
            debug!("Testing mode: using the management cluster as target");
            return Ok(self.manager_client.clone());
        }

        let secret = match get_kubeconfig_secret(&self.manager_client, cluster).await {
            Ok(secret) => secret,
            Err(e) => {
                if matches!(e, CourierError::ClusterNotReady(_)) {
                    self.release(cluster).await;
                }
                return Err(e);
            }
        };
        let cache_key = cache_key(cluster);
        let resource_version = secret.resource_version().unwrap_or_default();

        if let Some(cached) = self.cache.read().await.get(&cache_key) {
            if cached.resource_version == resource_version {
                return Ok(cached.client.clone());
            }
        }

        let kubeconfig = kubeconfig_from_secret(cluster, &secret)?;
        let client = create_client_from_kubeconfig(&kubeconfig).await?;
        info!("Created client for cluster {}", cluster.name_any());

        self.cache.write().await.insert(
            cache_key,
            CachedClient {
                resource_version,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    async fn release(&self, cluster: &VSphereCluster) {
        if self.cache.write().await.remove(&cache_key(cluster)).is_some() {
            debug!("Dropped cached client for cluster {}", cluster.name_any());
        }
    }
}

fn cache_key(cluster: &VSphereCluster) -> String {
    cluster.uid().unwrap_or_else(|| cluster.name_any())
}

/// Get the kubeconfig secret of a cluster; absence means the cluster is not reachable yet
async fn get_kubeconfig_secret(client: &Client, cluster: &VSphereCluster) -> Result<Secret> {
    let cluster_name = cluster.name_any();
    let secret_name = cluster.kubeconfig_secret_name();
    let namespace = cluster.namespace().unwrap_or_default();
    let secrets_api: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    debug!(
        "Getting kubeconfig secret '{}/{}' for cluster '{}'...",
        namespace, secret_name, cluster_name
    );

    secrets_api
        .get_opt(&secret_name)
        .await
        .map_err(|e| {
            if is_unauthorized(&e) {
                return CourierError::step(Step::OwnerCluster, e);
            }
            CourierError::ClusterNotReady(format!(
                "Failed to get kubeconfig secret for cluster {}: {}",
                cluster_name, e
            ))
        })?
        .ok_or_else(|| {
            CourierError::ClusterNotReady(format!(
                "Kubeconfig secret {}/{} for cluster {} does not exist yet",
                namespace, secret_name, cluster_name
            ))
        })
}

fn kubeconfig_from_secret(cluster: &VSphereCluster, secret: &Secret) -> Result<String> {
    let cluster_name = cluster.name_any();

    let Some(kubeconfig_data) = secret
        .data
        .as_ref()
        .and_then(|d| d.get(secrets::KUBECONFIG_KEY))
    else {
        return Err(CourierError::KubeconfigError(format!(
            "Kubeconfig secret for cluster {} does not contain '{}' key",
            cluster_name,
            secrets::KUBECONFIG_KEY
        )));
    };

    String::from_utf8(kubeconfig_data.0.clone()).map_err(|e| {
        CourierError::KubeconfigError(format!(
            "Failed to decode kubeconfig for cluster {}: {}",
            cluster_name, e
        ))
    })
}

/// Create a Kubernetes client from a kubeconfig string
async fn create_client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
    use kube::config::Kubeconfig;

    let kubeconfig_parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| CourierError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig_parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                CourierError::KubeconfigError(format!("Failed to create config: {}", e))
            })?;

    Client::try_from(client_config)
        .map_err(|e| CourierError::KubeconfigError(format!("Failed to create client: {}", e)))
}
