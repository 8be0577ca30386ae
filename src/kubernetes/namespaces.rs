// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use crate::constants::annotations;
use crate::error::is_not_found;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Ensure a namespace exists in the cluster, create it if it doesn't.
/// A namespace created here is annotated with `created_by`; an existing one is left untouched.
/// Returns whether the namespace was created.
#[instrument(skip(client))]
pub async fn ensure_namespace_exists(
    client: &Client,
    namespace: &str,
    created_by: &str,
) -> Result<bool, kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    if namespaces.get_opt(namespace).await?.is_some() {
        debug!("Namespace {} already exists", namespace);
        return Ok(false);
    }

    info!("Creating namespace {}", namespace);
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                annotations::CREATED_BY.to_string(),
                created_by.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            info!("Namespace {} created successfully", namespace);
            Ok(true)
        }
        // Lost a race with another creator
        Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether the namespace was created on behalf of `owner`.
pub fn created_by(namespace: &Namespace, owner: &str) -> bool {
    namespace
        .annotations()
        .get(annotations::CREATED_BY)
        .is_some_and(|v| v == owner)
}

/// Delete a namespace. Returns false if it did not exist.
#[instrument(skip(client))]
pub async fn delete_namespace(client: &Client, namespace: &str) -> Result<bool, kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(namespace, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Namespace {} deleted", namespace);
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e),
    }
}
