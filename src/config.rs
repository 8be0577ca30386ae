// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Location of the ConfigMap that registers provider service account namespaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAccountsConfigMap {
    pub namespace: String,
    pub name: String,
}

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Use the management cluster as the target cluster instead of reading kubeconfig secrets
    pub testing_mode: bool,
    pub system_accounts: Option<SystemAccountsConfigMap>,
    /// Create `kubernetes.io/service-account-token` secrets for platforms that no longer do
    pub create_token_secrets: bool,
    pub token_poll_interval: Duration,
    /// How long a pending token is reported as Info before it becomes a Warning
    pub token_pending_warning: Duration,
    pub resync_interval: Duration,
    pub terminal_requeue: Duration,
    pub reconcile_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            testing_mode: false,
            system_accounts: None,
            create_token_secrets: false,
            token_poll_interval: Duration::from_secs(5),
            token_pending_warning: Duration::from_secs(120),
            resync_interval: Duration::from_secs(300),
            terminal_requeue: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let system_accounts = match (
            lookup("SERVICE_ACCOUNTS_CM_NAMESPACE"),
            lookup("SERVICE_ACCOUNTS_CM_NAME"),
        ) {
            (Some(namespace), Some(name)) => Some(SystemAccountsConfigMap { namespace, name }),
            (None, None) => None,
            _ => anyhow::bail!(
                "SERVICE_ACCOUNTS_CM_NAMESPACE and SERVICE_ACCOUNTS_CM_NAME must be set together"
            ),
        };

        Ok(Config {
            testing_mode: flag(&lookup, "TESTING_MODE")?,
            system_accounts,
            create_token_secrets: flag(&lookup, "CREATE_TOKEN_SECRETS")?,
            token_poll_interval: seconds(
                &lookup,
                "TOKEN_POLL_INTERVAL_SECS",
                defaults.token_poll_interval,
            )?,
            token_pending_warning: seconds(
                &lookup,
                "TOKEN_PENDING_WARNING_SECS",
                defaults.token_pending_warning,
            )?,
            resync_interval: seconds(&lookup, "RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            terminal_requeue: seconds(&lookup, "TERMINAL_REQUEUE_SECS", defaults.terminal_requeue)?,
            reconcile_timeout: seconds(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout,
            )?,
        })
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    lookup(key)
        .map(|v| {
            v.parse::<bool>()
                .with_context(|| format!("{} must be true or false", key))
        })
        .transpose()
        .map(|v| v.unwrap_or(false))
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        Some(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{} must be a number of seconds", key))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}
