// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Owning cluster resolution and target cluster connection

use crate::error::{is_not_found, CourierError, Result, Step};
use crate::kubernetes::TargetClientProvider;
use crate::types::cluster::VSphereCluster;
use crate::types::provider_service_account::ProviderServiceAccount;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, instrument};

/// Validated `spec.ref` of a ProviderServiceAccount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub namespace: String,
    pub name: String,
}

/// Validate `spec.ref` without touching the API.
pub fn cluster_reference(psa: &ProviderServiceAccount) -> Result<ClusterRef> {
    let namespace = psa.namespace().unwrap_or_default();
    let Some(reference) = psa.spec.r#ref.as_ref() else {
        return Err(CourierError::InvalidReference(format!(
            "{} has no spec.ref",
            psa.key()
        )));
    };

    let name = reference.name.clone().unwrap_or_default();
    if name.is_empty() {
        return Err(CourierError::InvalidReference(format!(
            "{} has an empty spec.ref.name",
            psa.key()
        )));
    }

    let expected_kind = VSphereCluster::kind(&());
    if let Some(kind) = reference.kind.as_deref().filter(|k| !k.is_empty()) {
        if kind != expected_kind {
            return Err(CourierError::InvalidReference(format!(
                "spec.ref.kind {} is not {}",
                kind, expected_kind
            )));
        }
    }

    let expected_api_version = VSphereCluster::api_version(&());
    if let Some(api_version) = reference.api_version.as_deref().filter(|v| !v.is_empty()) {
        if api_version != expected_api_version {
            return Err(CourierError::InvalidReference(format!(
                "spec.ref.apiVersion {} is not {}",
                api_version, expected_api_version
            )));
        }
    }

    if let Some(ref_namespace) = reference.namespace.as_deref().filter(|n| !n.is_empty()) {
        if ref_namespace != namespace {
            return Err(CourierError::InvalidReference(format!(
                "spec.ref.namespace {} differs from {}",
                ref_namespace, namespace
            )));
        }
    }

    Ok(ClusterRef { namespace, name })
}

/// Load the cluster named by `spec.ref`. A dangling reference is an invalid reference.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn lookup_cluster(client: &Client, psa: &ProviderServiceAccount) -> Result<VSphereCluster> {
    let reference = cluster_reference(psa)?;
    let clusters: Api<VSphereCluster> = Api::namespaced(client.clone(), &reference.namespace);

    match clusters.get(&reference.name).await {
        Ok(cluster) => Ok(cluster),
        Err(e) if is_not_found(&e) => Err(CourierError::InvalidReference(format!(
            "cluster {}/{} does not exist",
            reference.namespace, reference.name
        ))),
        Err(e) => Err(CourierError::step(Step::OwnerCluster, e)),
    }
}

/// Obtain a client for the cluster's API server.
pub async fn connect(provider: &dyn TargetClientProvider, cluster: &VSphereCluster) -> Result<Client> {
    if cluster.is_deleting() {
        provider.release(cluster).await;
        return Err(CourierError::ClusterNotReady(format!(
            "cluster {} is being deleted",
            cluster.name_any()
        )));
    }
    provider.client_for(cluster).await
}

/// Follow the PSA's controller owner reference to its cluster. Used to place a
/// condition on the cluster when `spec.ref` cannot be trusted.
pub async fn owner_from_references(
    client: &Client,
    psa: &ProviderServiceAccount,
) -> Result<Option<VSphereCluster>> {
    let Some(owner) = psa.cluster_owner_reference() else {
        return Ok(None);
    };
    let clusters: Api<VSphereCluster> =
        Api::namespaced(client.clone(), &psa.namespace().unwrap_or_default());

    let cluster = clusters
        .get_opt(&owner.name)
        .await
        .map_err(|e| CourierError::step(Step::OwnerCluster, e))?;

    // A recreated cluster with the same name is not the owner
    Ok(cluster.filter(|c| {
        let same = c.uid().as_deref() == Some(owner.uid.as_str());
        if !same {
            debug!("Owner reference {} points at a replaced cluster", owner.name);
        }
        same
    }))
}
