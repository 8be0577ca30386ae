// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ServiceAccount, Role and RoleBinding in the management cluster.
//!
//! All three are named after the ProviderServiceAccount, live in its namespace
//! and carry a controller owner reference to it, so the garbage collector
//! removes them when the PSA goes away.

use crate::constants::{labels, OPERATOR_NAME};
use crate::error::{CourierError, Result, Step};
use crate::kubernetes::retry_on_conflict;
use crate::types::provider_service_account::ProviderServiceAccount;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client, Resource, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Controller owner reference pointing at the PSA
pub fn owner_reference(psa: &ProviderServiceAccount) -> Result<OwnerReference> {
    let owner = psa
        .controller_owner_ref(&())
        .ok_or(CourierError::MissingMetadata("metadata.uid"))?;
    Ok(OwnerReference {
        block_owner_deletion: Some(true),
        ..owner
    })
}

fn object_meta(psa: &ProviderServiceAccount, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(psa.name_any()),
        namespace: psa.namespace(),
        labels: Some(BTreeMap::from([(
            labels::MANAGED_BY.to_string(),
            OPERATOR_NAME.to_string(),
        )])),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

pub fn desired_service_account(psa: &ProviderServiceAccount, owner: &OwnerReference) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(psa, owner),
        ..Default::default()
    }
}

pub fn desired_role(psa: &ProviderServiceAccount, owner: &OwnerReference) -> Role {
    Role {
        metadata: object_meta(psa, owner),
        rules: Some(psa.spec.rules.clone()),
    }
}

pub fn desired_role_binding(psa: &ProviderServiceAccount, owner: &OwnerReference) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(psa, owner),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: psa.name_any(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: psa.name_any(),
            namespace: psa.namespace(),
            api_group: None,
        }]),
    }
}

fn has_owner<K: Resource>(obj: &K, owner: &OwnerReference) -> bool {
    obj.owner_references().iter().any(|o| o.uid == owner.uid)
}

/// The platform stores an empty subject apiGroup for core kinds
fn same_subjects(actual: Option<&[Subject]>, desired: &[Subject]) -> bool {
    let actual = actual.unwrap_or_default();
    actual.len() == desired.len()
        && actual.iter().zip(desired).all(|(a, d)| {
            a.kind == d.kind
                && a.name == d.name
                && a.namespace == d.namespace
                && a.api_group.as_deref().unwrap_or_default()
                    == d.api_group.as_deref().unwrap_or_default()
        })
}

/// Create the ServiceAccount if missing. An existing one is only adopted: its
/// `secrets` are maintained by the platform.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn ensure_service_account(client: &Client, psa: &ProviderServiceAccount) -> Result<ServiceAccount> {
    let owner = &owner_reference(psa)?;
    let name = &psa.name_any();
    let api = &Api::<ServiceAccount>::namespaced(client.clone(), &psa.namespace().unwrap_or_default());

    retry_on_conflict(|| async move {
        match api.get_opt(name).await? {
            None => {
                info!("Creating service account {}", name);
                api.create(&PostParams::default(), &desired_service_account(psa, owner))
                    .await
            }
            Some(mut sa) if !has_owner(&sa, owner) => {
                info!("Adopting service account {}", name);
                sa.owner_references_mut().push(owner.clone());
                api.replace(name, &PostParams::default(), &sa).await
            }
            Some(sa) => Ok(sa),
        }
    })
    .await
    .map_err(|e| CourierError::step(Step::ServiceAccount, e))
}

/// Create the Role or bring its rules back to `spec.rules`.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn ensure_role(client: &Client, psa: &ProviderServiceAccount) -> Result<Role> {
    let owner = &owner_reference(psa)?;
    let name = &psa.name_any();
    let api = &Api::<Role>::namespaced(client.clone(), &psa.namespace().unwrap_or_default());

    retry_on_conflict(|| async move {
        let Some(mut role) = api.get_opt(name).await? else {
            info!("Creating role {}", name);
            return api
                .create(&PostParams::default(), &desired_role(psa, owner))
                .await;
        };

        let rules_match = role.rules.as_deref().unwrap_or_default() == psa.spec.rules.as_slice();
        let owned = has_owner(&role, owner);
        if rules_match && owned {
            debug!("Role {} is up to date", name);
            return Ok(role);
        }

        info!("Updating role {}", name);
        role.rules = Some(psa.spec.rules.clone());
        if !owned {
            role.owner_references_mut().push(owner.clone());
        }
        api.replace(name, &PostParams::default(), &role).await
    })
    .await
    .map_err(|e| CourierError::step(Step::Role, e))
}

/// Create the RoleBinding or repair it. `roleRef` cannot be changed in place,
/// so a binding pointing elsewhere is deleted and recreated.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn ensure_role_binding(client: &Client, psa: &ProviderServiceAccount) -> Result<RoleBinding> {
    let owner = &owner_reference(psa)?;
    let name = &psa.name_any();
    let desired = &desired_role_binding(psa, owner);
    let api = &Api::<RoleBinding>::namespaced(client.clone(), &psa.namespace().unwrap_or_default());

    retry_on_conflict(|| async move {
        let Some(mut binding) = api.get_opt(name).await? else {
            info!("Creating role binding {}", name);
            return api.create(&PostParams::default(), desired).await;
        };

        if binding.role_ref != desired.role_ref {
            info!(
                "Role binding {} refers to {}/{}, recreating",
                name, binding.role_ref.kind, binding.role_ref.name
            );
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e),
            }
            return api.create(&PostParams::default(), desired).await;
        }

        let subjects = desired.subjects.as_deref().unwrap_or_default();
        let subjects_match = same_subjects(binding.subjects.as_deref(), subjects);
        let owned = has_owner(&binding, owner);
        if subjects_match && owned {
            debug!("Role binding {} is up to date", name);
            return Ok(binding);
        }

        info!("Updating role binding {}", name);
        binding.subjects = desired.subjects.clone();
        if !owned {
            binding.owner_references_mut().push(owner.clone());
        }
        api.replace(name, &PostParams::default(), &binding).await
    })
    .await
    .map_err(|e| CourierError::step(Step::RoleBinding, e))
}
