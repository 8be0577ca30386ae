// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reporting pass outcomes as conditions on the PSA and its owning cluster

use crate::constants::{reasons, PROVIDER_SERVICE_ACCOUNTS_READY};
use crate::error::Result;
use crate::kubernetes::retry_on_conflict;
use crate::sync::PendingReason;
use crate::types::cluster::VSphereCluster;
use crate::types::condition::{self, Condition, Severity};
use crate::types::provider_service_account::ProviderServiceAccount;
use chrono::{DateTime, Utc};
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// What a pass that did not fail achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Provisioned,
    TokenPending(PendingReason),
}

/// Map a pass outcome onto the PSA condition. A pending token is informational
/// until the token has been pending for `token_warning_after`.
pub fn condition_for(
    result: &Result<Progress>,
    previous: Option<&Condition>,
    now: DateTime<Utc>,
    token_warning_after: Duration,
) -> Condition {
    match result {
        Ok(Progress::Provisioned) => {
            Condition::ready(PROVIDER_SERVICE_ACCOUNTS_READY, reasons::PROVISIONED, now)
        }
        Ok(Progress::TokenPending(reason)) => {
            let not_ready_since = previous
                .filter(|p| !p.is_true() && p.reason == reasons::TOKEN_PENDING)
                .and_then(Condition::transitioned_at)
                .unwrap_or(now);
            let waited = now
                .signed_duration_since(not_ready_since)
                .to_std()
                .unwrap_or_default();
            let severity = if waited >= token_warning_after {
                Severity::Warning
            } else {
                Severity::Info
            };
            Condition::not_ready(
                PROVIDER_SERVICE_ACCOUNTS_READY,
                reasons::TOKEN_PENDING,
                severity,
                reason.to_string(),
                now,
            )
        }
        Err(e) => Condition::not_ready(
            PROVIDER_SERVICE_ACCOUNTS_READY,
            e.reason(),
            e.severity(),
            e.condition_message(),
            now,
        ),
    }
}

/// Write `condition` to the PSA status. Returns false without writing when the
/// stored condition already says the same.
#[instrument(skip(client, psa, condition), fields(psa = %psa.key()))]
pub async fn report(client: &Client, psa: &ProviderServiceAccount, condition: Condition) -> Result<bool> {
    let mut conditions = psa
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    if !condition::set(&mut conditions, condition) {
        debug!("Status unchanged");
        return Ok(false);
    }

    let api: Api<ProviderServiceAccount> =
        Api::namespaced(client.clone(), &psa.namespace().unwrap_or_default());
    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    api.patch_status(&psa.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}

/// Collapse the conditions of every live PSA belonging to `cluster` into the
/// cluster's own condition of the same type. The cluster is re-read on each
/// attempt; its other conditions are kept.
#[instrument(skip(client, cluster), fields(cluster = %cluster.name_any()))]
pub async fn project_to_cluster(client: &Client, cluster: &VSphereCluster) -> Result<bool> {
    let namespace = cluster.namespace().unwrap_or_default();
    let psas: Api<ProviderServiceAccount> = Api::namespaced(client.clone(), &namespace);
    let members = psas.list(&ListParams::default()).await?.items;
    let aggregated = condition::aggregate(
        members
            .iter()
            .filter(|p| !p.is_deleting() && p.belongs_to(cluster))
            .filter_map(ProviderServiceAccount::ready_condition),
    );

    let clusters = &Api::<VSphereCluster>::namespaced(client.clone(), &namespace);
    let name = &cluster.name_any();
    let aggregated = &aggregated;

    let changed = retry_on_conflict(|| async move {
        let Some(current) = clusters.get_opt(name).await? else {
            return Ok(false);
        };
        let mut conditions = current.conditions().to_vec();
        let changed = match aggregated {
            Some(c) => condition::set(&mut conditions, c.clone()),
            None => {
                let before = conditions.len();
                conditions.retain(|c| c.condition_type != PROVIDER_SERVICE_ACCOUNTS_READY);
                conditions.len() != before
            }
        };
        if !changed {
            return Ok(false);
        }

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "status": { "conditions": conditions },
        });
        clusters
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    })
    .await?;

    if changed {
        info!("Updated {} on cluster", PROVIDER_SERVICE_ACCOUNTS_READY);
    }
    Ok(changed)
}
