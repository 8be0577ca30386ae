// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry of namespaces whose service accounts the platform treats as system accounts

use crate::config::SystemAccountsConfigMap;
use crate::error::{CourierError, Result, Step};
use crate::kubernetes::retry_on_conflict;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{ObjectMeta, Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

pub fn registry_key(namespace: &str) -> String {
    format!("system.serviceaccount.{}", namespace)
}

fn is_registered(cm: &ConfigMap, key: &str) -> bool {
    cm.data
        .as_ref()
        .and_then(|d| d.get(key))
        .is_some_and(|v| v == "true")
}

/// Add `namespace` to the registry ConfigMap. Other entries are never touched.
#[instrument(skip(client, registry))]
pub async fn ensure_registered(
    client: &Client,
    registry: &SystemAccountsConfigMap,
    namespace: &str,
) -> Result<()> {
    let key = &registry_key(namespace);
    let api = &Api::<ConfigMap>::namespaced(client.clone(), &registry.namespace);

    retry_on_conflict(|| async move {
        let Some(existing) = api.get_opt(&registry.name).await? else {
            info!("Creating system service account registry {}/{}", registry.namespace, registry.name);
            let cm = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(registry.name.clone()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(key.clone(), "true".to_string())])),
                ..Default::default()
            };
            api.create(&PostParams::default(), &cm).await?;
            return Ok(());
        };

        if is_registered(&existing, key) {
            debug!("{} already registered", key);
            return Ok(());
        }

        info!("Registering {} in {}/{}", key, registry.namespace, registry.name);
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": existing.resource_version() },
            "data": { key.as_str(): "true" },
        });
        api.patch(&registry.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    })
    .await
    .map_err(|e| CourierError::step(Step::SystemAccounts, e))
}
