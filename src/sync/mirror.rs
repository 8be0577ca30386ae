// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Token mirroring into the target cluster

use crate::constants::{annotations, labels, secrets, OPERATOR_NAME};
use crate::error::{is_not_found, CourierError, Result, Step};
use crate::kubernetes::namespaces::created_by;
use crate::kubernetes::{delete_namespace, ensure_namespace_exists, retry_on_conflict};
use crate::types::provider_service_account::ProviderServiceAccount;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Outcome of a mirror pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorResult {
    Created,
    Updated,
    Unchanged,
}

/// The target secret as it should exist: only the token, tagged with the PSA key
/// since owner references cannot point across clusters.
pub fn desired_target_secret(psa: &ProviderServiceAccount, token: &ByteString) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(psa.spec.target_secret_name.clone()),
            namespace: Some(psa.spec.target_namespace.clone()),
            labels: Some(BTreeMap::from([(
                labels::MANAGED_BY.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                annotations::OWNER.to_string(),
                psa.key(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(secrets::TOKEN_KEY.to_string(), token.clone())])),
        type_: Some(secrets::OPAQUE_TYPE.to_string()),
        ..Default::default()
    }
}

fn is_managed(secret: &Secret) -> bool {
    secret
        .labels()
        .get(labels::MANAGED_BY)
        .is_some_and(|v| v == OPERATOR_NAME)
}

/// Create the target namespace if absent. Returns whether it was created.
pub async fn ensure_target_namespace(client: &Client, psa: &ProviderServiceAccount) -> Result<bool> {
    ensure_namespace_exists(client, &psa.spec.target_namespace, &psa.key())
        .await
        .map_err(|e| CourierError::step(Step::TargetNamespace, e))
}

/// Make the target secret hold exactly `token`. Nothing is written when it already does.
#[instrument(skip(client, psa, token), fields(psa = %psa.key()))]
pub async fn ensure_target_secret(
    client: &Client,
    psa: &ProviderServiceAccount,
    token: &ByteString,
) -> Result<MirrorResult> {
    let name = &psa.spec.target_secret_name;
    let desired = &desired_target_secret(psa, token);
    let api = &Api::<Secret>::namespaced(client.clone(), &psa.spec.target_namespace);

    retry_on_conflict(|| async move {
        let Some(existing) = api.get_opt(name).await? else {
            info!("Creating target secret {}/{}", psa.spec.target_namespace, name);
            api.create(&PostParams::default(), desired).await?;
            return Ok(MirrorResult::Created);
        };

        if existing.data == desired.data && existing.type_ == desired.type_ {
            debug!("Target secret {} is up to date", name);
            return Ok(MirrorResult::Unchanged);
        }

        if let Some(owner) = existing.annotations().get(annotations::OWNER) {
            if *owner != psa.key() {
                warn!("Target secret {} was mirrored for {}, taking it over", name, owner);
            }
        }

        if existing.type_ != desired.type_ {
            // Secret type is immutable
            info!("Recreating target secret {} with type {}", name, secrets::OPAQUE_TYPE);
            api.delete(name, &DeleteParams::default()).await?;
            api.create(&PostParams::default(), desired).await?;
            return Ok(MirrorResult::Updated);
        }

        info!("Updating token in target secret {}", name);
        let mut replacement = desired.clone();
        replacement.metadata.resource_version = existing.resource_version();
        api.replace(name, &PostParams::default(), &replacement).await?;
        Ok(MirrorResult::Updated)
    })
    .await
    .map_err(|e| CourierError::step(Step::TargetSecret, e))
}

/// Remove what this PSA put into the target cluster. The namespace goes too,
/// but only when this PSA created it and no other managed secret lives there.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn cleanup_target(client: &Client, psa: &ProviderServiceAccount) -> Result<()> {
    let namespace = &psa.spec.target_namespace;
    let name = &psa.spec.target_secret_name;
    let secrets_api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret_error = |e| CourierError::step(Step::TargetSecret, e);
    let namespace_error = |e| CourierError::step(Step::TargetNamespace, e);

    match secrets_api.get_opt(name).await.map_err(secret_error)? {
        Some(secret)
            if secret
                .annotations()
                .get(annotations::OWNER)
                .is_some_and(|owner| *owner != psa.key()) =>
        {
            info!("Target secret {}/{} belongs to another PSA, keeping it", namespace, name);
        }
        Some(_) => match secrets_api.delete(name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted target secret {}/{}", namespace, name),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(secret_error(e)),
        },
        None => debug!("Target secret {}/{} already gone", namespace, name),
    }

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let Some(ns) = namespaces.get_opt(namespace).await.map_err(namespace_error)? else {
        return Ok(());
    };
    if !created_by(&ns, &psa.key()) {
        debug!("Namespace {} was not created by {}, keeping it", namespace, psa.key());
        return Ok(());
    }

    let selector = format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME);
    let remaining = secrets_api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(secret_error)?
        .items
        .into_iter()
        .filter(is_managed)
        .count();
    if remaining > 0 {
        info!(
            "Namespace {} still holds {} managed secrets, keeping it",
            namespace, remaining
        );
        return Ok(());
    }

    delete_namespace(client, namespace)
        .await
        .map_err(namespace_error)?;
    Ok(())
}
