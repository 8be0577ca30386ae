// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ProviderServiceAccount reconciler - provisions identity and permissions in the
//! management cluster and mirrors the issued token into the owning cluster.

use crate::config::Config;
use crate::constants::{annotations, retry, secrets, FINALIZER};
use crate::error::{CourierError, Result};
use crate::kubernetes::finalizers;
use crate::kubernetes::{KubeconfigClientProvider, TargetClientProvider};
use crate::status::{self, Progress};
use crate::sync::credentials::ensure_token_secret;
use crate::sync::system_accounts::ensure_registered;
use crate::sync::{
    cleanup_target, connect, ensure_role, ensure_role_binding, ensure_service_account,
    ensure_target_namespace, ensure_target_secret, lookup_cluster, owner_from_references,
    read_token, MirrorResult, TokenState,
};
use crate::types::cluster::VSphereCluster;
use crate::types::condition::Condition;
use crate::types::provider_service_account::ProviderServiceAccount;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::controller::Error as ControllerError;
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Client,
    pub config: Config,
    pub target_clients: Arc<dyn TargetClientProvider>,
}

pub struct ProviderServiceAccountReconciler {
    context: Arc<Context>,
}

impl ProviderServiceAccountReconciler {
    pub fn new(client: Client, config: Config) -> Self {
        let target_clients = Arc::new(KubeconfigClientProvider::new(
            client.clone(),
            config.testing_mode,
        ));
        Self {
            context: Arc::new(Context {
                client,
                config,
                target_clients,
            }),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let client = self.context.client.clone();
        let psas: Api<ProviderServiceAccount> = Api::all(client.clone());
        let token_secrets = WatcherConfig::default()
            .fields(&format!("type={}", secrets::SERVICE_ACCOUNT_TOKEN_TYPE));

        Controller::new(psas, WatcherConfig::default())
            .owns(Api::<ServiceAccount>::all(client.clone()), WatcherConfig::default())
            .owns(Api::<Role>::all(client.clone()), WatcherConfig::default())
            .owns(Api::<RoleBinding>::all(client.clone()), WatcherConfig::default())
            .watches(Api::<Secret>::all(client), token_secrets, token_secret_owner)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled provider service account: {:?}", o),
                    // Token secrets of service accounts that are not ours
                    Err(ControllerError::ObjectNotFound(o)) => debug!("Skipped {}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        info!("Provider service account reconciler stopped");
        Ok(())
    }
}

/// Token secrets name their service account, which is named after its PSA
fn token_secret_owner(secret: Secret) -> Option<ObjectRef<ProviderServiceAccount>> {
    let service_account = secret.annotations().get(annotations::SERVICE_ACCOUNT_NAME)?;
    let namespace = secret.namespace()?;
    Some(ObjectRef::new(service_account).within(&namespace))
}

async fn reconcile(psa: Arc<ProviderServiceAccount>, ctx: Arc<Context>) -> Result<Action> {
    if psa.is_deleting() {
        reconcile_delete(&psa, &ctx).await
    } else {
        reconcile_normal(&psa, &ctx).await
    }
}

/// Outcome of one pass together with the cluster it resolved, if any
struct Pass {
    cluster: Option<VSphereCluster>,
    result: Result<Progress>,
}

#[instrument(skip(psa, ctx), fields(psa = %psa.key()))]
async fn reconcile_normal(psa: &ProviderServiceAccount, ctx: &Context) -> Result<Action> {
    let api: Api<ProviderServiceAccount> =
        Api::namespaced(ctx.client.clone(), &psa.namespace().unwrap_or_default());
    let psa = finalizers::add(&api, psa, FINALIZER).await?;

    let timeout = ctx.config.reconcile_timeout;
    let pass = match tokio::time::timeout(timeout, run_pass(&psa, ctx)).await {
        Ok(pass) => pass,
        Err(_) => Pass {
            cluster: None,
            result: Err(CourierError::Timeout(timeout)),
        },
    };

    match &pass.result {
        Ok(Progress::Provisioned) => info!("Provider service account provisioned"),
        Ok(Progress::TokenPending(reason)) => info!("Waiting for token: {}", reason),
        Err(e) if e.is_retryable() => warn!("Pass failed, will retry: {}", e),
        Err(e) => error!("Pass failed: {}", e),
    }

    let now = Utc::now();
    let previous = psa.ready_condition();
    let condition = status::condition_for(
        &pass.result,
        previous,
        now,
        ctx.config.token_pending_warning,
    );
    status::report(&ctx.client, &psa, condition).await?;

    if let Some(cluster) = status_cluster(ctx, &psa, pass.cluster).await {
        if let Err(e) = status::project_to_cluster(&ctx.client, &cluster).await {
            warn!("Failed to update cluster {}: {}", cluster.name_any(), e);
        }
    }

    Ok(next_action(
        &pass.result,
        not_ready_for(previous, now),
        &ctx.config,
    ))
}

async fn run_pass(psa: &ProviderServiceAccount, ctx: &Context) -> Pass {
    let cluster = match lookup_cluster(&ctx.client, psa).await {
        Ok(cluster) => cluster,
        Err(e) => {
            return Pass {
                cluster: None,
                result: Err(e),
            }
        }
    };
    let result = provision(psa, &cluster, ctx).await;
    Pass {
        cluster: Some(cluster),
        result,
    }
}

async fn provision(
    psa: &ProviderServiceAccount,
    cluster: &VSphereCluster,
    ctx: &Context,
) -> Result<Progress> {
    if let Some(registry) = &ctx.config.system_accounts {
        ensure_registered(&ctx.client, registry, &psa.namespace().unwrap_or_default()).await?;
    }

    let service_account = ensure_service_account(&ctx.client, psa).await?;
    ensure_role(&ctx.client, psa).await?;
    ensure_role_binding(&ctx.client, psa).await?;

    if ctx.config.create_token_secrets {
        ensure_token_secret(&ctx.client, psa).await?;
    }

    let token = match read_token(&ctx.client, &service_account).await? {
        TokenState::Ready(token) => token,
        TokenState::Pending(reason) => return Ok(Progress::TokenPending(reason)),
    };

    let target = connect(ctx.target_clients.as_ref(), cluster).await?;
    ensure_target_namespace(&target, psa).await?;
    match ensure_target_secret(&target, psa, &token).await? {
        MirrorResult::Unchanged => debug!("Target secret up to date"),
        result => info!("Target secret {:?} in cluster {}", result, cluster.name_any()),
    }

    Ok(Progress::Provisioned)
}

/// Cluster that should carry the aggregated condition. Falls back to the owner
/// reference when `spec.ref` cannot be resolved.
async fn status_cluster(
    ctx: &Context,
    psa: &ProviderServiceAccount,
    resolved: Option<VSphereCluster>,
) -> Option<VSphereCluster> {
    if resolved.is_some() {
        return resolved;
    }
    match lookup_cluster(&ctx.client, psa).await {
        Ok(cluster) => Some(cluster),
        Err(_) => owner_from_references(&ctx.client, psa).await.ok().flatten(),
    }
}

#[instrument(skip(psa, ctx), fields(psa = %psa.key()))]
async fn reconcile_delete(psa: &ProviderServiceAccount, ctx: &Context) -> Result<Action> {
    if !finalizers::has_finalizer(psa, FINALIZER) {
        return Ok(Action::await_change());
    }

    // The management-side triple is removed by owner-reference garbage collection
    let cleanup = async {
        let cluster = lookup_cluster(&ctx.client, psa).await?;
        let target = connect(ctx.target_clients.as_ref(), &cluster).await?;
        cleanup_target(&target, psa).await
    };
    match tokio::time::timeout(ctx.config.reconcile_timeout, cleanup).await {
        Ok(Ok(())) => info!("Cleaned up target cluster"),
        Ok(Err(e)) => warn!("Target cleanup failed, releasing anyway: {}", e),
        Err(_) => warn!("Target cleanup timed out, releasing anyway"),
    }

    let api: Api<ProviderServiceAccount> =
        Api::namespaced(ctx.client.clone(), &psa.namespace().unwrap_or_default());
    finalizers::remove(&api, psa, FINALIZER).await?;

    if let Some(cluster) = status_cluster(ctx, psa, None).await {
        if let Err(e) = status::project_to_cluster(&ctx.client, &cluster).await {
            warn!("Failed to update cluster {}: {}", cluster.name_any(), e);
        }
    }

    Ok(Action::await_change())
}

/// How long the condition has been False before this pass
fn not_ready_for(previous: Option<&Condition>, now: DateTime<Utc>) -> Duration {
    previous
        .filter(|c| !c.is_true())
        .and_then(Condition::transitioned_at)
        .and_then(|since| now.signed_duration_since(since).to_std().ok())
        .unwrap_or_default()
}

fn next_action(result: &Result<Progress>, not_ready_for: Duration, config: &Config) -> Action {
    match result {
        Ok(Progress::Provisioned) => Action::requeue(config.resync_interval),
        Ok(Progress::TokenPending(_)) => Action::requeue(config.token_poll_interval),
        Err(e) if e.is_retryable() => Action::requeue(backoff(not_ready_for)),
        Err(_) => Action::requeue(config.terminal_requeue),
    }
}

/// Half the time spent not ready, within fixed bounds
fn backoff(not_ready_for: Duration) -> Duration {
    (not_ready_for / 2).clamp(
        Duration::from_secs(retry::BACKOFF_MIN_SECS),
        Duration::from_secs(retry::BACKOFF_MAX_SECS),
    )
}

fn error_policy(psa: Arc<ProviderServiceAccount>, error: &CourierError, _ctx: Arc<Context>) -> Action {
    error!("Reconciling {} failed: {}", psa.key(), error);
    Action::requeue(Duration::from_secs(retry::ERROR_POLICY_SECS))
}
