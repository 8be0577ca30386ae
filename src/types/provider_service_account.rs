// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::PROVIDER_SERVICE_ACCOUNTS_READY;
use crate::types::cluster::VSphereCluster;
use crate::types::condition::{self, Condition};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Desired identity, permissions and mirrored credential for a guest cluster.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(
    group = "vmware.infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ProviderServiceAccount",
    plural = "providerserviceaccounts"
)]
#[kube(namespaced)]
#[kube(status = "ProviderServiceAccountStatus")]
#[serde(rename_all = "camelCase")]
pub struct ProviderServiceAccountSpec {
    /// Owning cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<ObjectReference>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    pub target_namespace: String,
    pub target_secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderServiceAccountStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ProviderServiceAccount {
    /// `<namespace>/<name>`, used to tag objects in the target cluster
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| condition::get(&s.conditions, PROVIDER_SERVICE_ACCOUNTS_READY))
    }

    /// Whether this PSA refers to the given cluster by spec or controller owner reference
    pub fn belongs_to(&self, cluster: &VSphereCluster) -> bool {
        let by_ref = self
            .spec
            .r#ref
            .as_ref()
            .and_then(|r| r.name.as_deref())
            .is_some_and(|name| name == cluster.name_any());
        let by_owner = self
            .cluster_owner_reference()
            .is_some_and(|o| Some(o.uid.as_str()) == cluster.meta().uid.as_deref());
        by_ref || by_owner
    }

    /// The controller owner reference pointing at a `VSphereCluster`, if any
    pub fn cluster_owner_reference(&self) -> Option<&OwnerReference> {
        self.owner_references().iter().find(|o| {
            o.controller == Some(true)
                && o.kind == VSphereCluster::kind(&())
                && o.api_version == VSphereCluster::api_version(&())
        })
    }
}
