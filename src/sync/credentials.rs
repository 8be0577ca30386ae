// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service account token lookup

use crate::constants::{annotations, secrets};
use crate::error::{CourierError, Result, Step};
use crate::sync::identity::owner_reference;
use crate::types::provider_service_account::ProviderServiceAccount;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::ByteString;
use kube::{
    api::{ListParams, ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument};

/// Why no token could be read yet. Both clear up once the platform catches up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    SecretMissing,
    TokenEmpty(String),
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingReason::SecretMissing => f.write_str("no token secret exists for the service account yet"),
            PendingReason::TokenEmpty(name) => write!(f, "token secret {} has no token yet", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenState {
    Ready(ByteString),
    Pending(PendingReason),
}

/// Non-empty `token` entry of a secret
pub fn extract_token(secret: &Secret) -> Option<&ByteString> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(secrets::TOKEN_KEY))
        .filter(|t| !t.0.is_empty())
}

fn is_token_secret_for(secret: &Secret, service_account: &str) -> bool {
    secret.type_.as_deref() == Some(secrets::SERVICE_ACCOUNT_TOKEN_TYPE)
        && secret
            .annotations()
            .get(annotations::SERVICE_ACCOUNT_NAME)
            .is_some_and(|v| v == service_account)
}

/// Read the token issued to `service_account`. Secrets listed on the service
/// account are preferred; annotated token secrets in the namespace are the
/// fallback. Nothing is written.
#[instrument(skip(client, service_account), fields(service_account = %service_account.name_any()))]
pub async fn read_token(client: &Client, service_account: &ServiceAccount) -> Result<TokenState> {
    let sa_name = service_account.name_any();
    let api: Api<Secret> = Api::namespaced(client.clone(), &service_account.namespace().unwrap_or_default());
    let to_error = |e| CourierError::step(Step::TokenSecret, e);

    let mut candidates = Vec::new();
    let referenced = service_account
        .secrets
        .iter()
        .flatten()
        .filter_map(|r| r.name.as_deref());
    for name in referenced {
        if let Some(secret) = api.get_opt(name).await.map_err(to_error)? {
            candidates.push(secret);
        }
    }

    if candidates.is_empty() {
        candidates = api
            .list(&ListParams::default())
            .await
            .map_err(to_error)?
            .items
            .into_iter()
            .filter(|s| is_token_secret_for(s, &sa_name))
            .collect();
    }

    if let Some(token) = candidates.iter().find_map(extract_token) {
        return Ok(TokenState::Ready(token.clone()));
    }

    let reason = match candidates.first() {
        Some(secret) => PendingReason::TokenEmpty(secret.name_any()),
        None => PendingReason::SecretMissing,
    };
    debug!("Token for {} pending: {}", sa_name, reason);
    Ok(TokenState::Pending(reason))
}

/// Request a token secret for platforms that no longer create one per service
/// account. The platform fills in the token; an existing secret is left alone.
#[instrument(skip(client, psa), fields(psa = %psa.key()))]
pub async fn ensure_token_secret(client: &Client, psa: &ProviderServiceAccount) -> Result<()> {
    let owner = owner_reference(psa)?;
    let name = format!("{}-token", psa.name_any());
    let api: Api<Secret> = Api::namespaced(client.clone(), &psa.namespace().unwrap_or_default());

    if api
        .get_opt(&name)
        .await
        .map_err(|e| CourierError::step(Step::TokenSecret, e))?
        .is_some()
    {
        return Ok(());
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            annotations: Some(BTreeMap::from([(
                annotations::SERVICE_ACCOUNT_NAME.to_string(),
                psa.name_any(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some(secrets::SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    };

    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => {
            info!("Requested token secret {}", name);
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(CourierError::step(Step::TokenSecret, e)),
    }
}
