// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{secrets, PROVIDER_SERVICE_ACCOUNTS_READY};
use crate::types::condition::{self, Condition};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Owning cluster of a ProviderServiceAccount. Only the fields this controller
/// reads or projects conditions onto are modelled.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(
    group = "vmware.infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereCluster"
)]
#[kube(namespaced)]
#[kube(status = "VSphereClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl VSphereCluster {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Name of the Cluster API kubeconfig secret for this cluster
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}{}", self.name_any(), secrets::KUBECONFIG_SUFFIX)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn provider_service_accounts_condition(&self) -> Option<&Condition> {
        condition::get(self.conditions(), PROVIDER_SERVICE_ACCOUNTS_READY)
    }
}
