// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used as field manager and managed-by label value
pub const OPERATOR_NAME: &str = "courier";

/// Finalizer guarding the best-effort cleanup in the target cluster
pub const FINALIZER: &str = "providerserviceaccount.vmware.infrastructure.cluster.x-k8s.io";

/// Condition type reported on the PSA and projected onto its owning cluster
pub const PROVIDER_SERVICE_ACCOUNTS_READY: &str = "ProviderServiceAccountsReady";

/// Condition reasons
pub mod reasons {
    pub const PROVISIONED: &str = "Provisioned";
    pub const INVALID_REFERENCE: &str = "InvalidReference";
    pub const TOKEN_PENDING: &str = "TokenPending";
    pub const TARGET_CLUSTER_UNAVAILABLE: &str = "TargetClusterUnavailable";
    pub const SERVICE_ACCOUNT_FAILED: &str = "ServiceAccountFailed";
    pub const ROLE_FAILED: &str = "RoleFailed";
    pub const ROLE_BINDING_FAILED: &str = "RoleBindingFailed";
    pub const SYSTEM_ACCOUNTS_FAILED: &str = "SystemServiceAccountsFailed";
    pub const TOKEN_READ_FAILED: &str = "TokenReadFailed";
    pub const TARGET_NAMESPACE_FAILED: &str = "TargetNamespaceFailed";
    pub const TARGET_SECRET_FAILED: &str = "TargetSecretFailed";
    pub const RECONCILE_TIMEOUT: &str = "ReconcileTimeout";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Kubernetes label keys
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// Kubernetes annotation keys
pub mod annotations {
    /// `<namespace>/<name>` of the PSA a target secret is mirrored for
    pub const OWNER: &str = "vmware.infrastructure.cluster.x-k8s.io/provider-service-account";
    /// `<namespace>/<name>` of the PSA that created a target namespace
    pub const CREATED_BY: &str = "vmware.infrastructure.cluster.x-k8s.io/created-by";
    /// Set by the platform on service account token secrets
    pub const SERVICE_ACCOUNT_NAME: &str = "kubernetes.io/service-account.name";
}

/// Secret layout conventions
pub mod secrets {
    pub const TOKEN_KEY: &str = "token";
    pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
    pub const OPAQUE_TYPE: &str = "Opaque";
    /// Cluster API kubeconfig secret: `<cluster>-kubeconfig`, key `value`
    pub const KUBECONFIG_SUFFIX: &str = "-kubeconfig";
    pub const KUBECONFIG_KEY: &str = "value";
}

/// Retry bounds for transient failures
pub mod retry {
    pub const BACKOFF_MIN_SECS: u64 = 5;
    pub const BACKOFF_MAX_SECS: u64 = 300;
    /// Requeue delay used by the controller error policy
    pub const ERROR_POLICY_SECS: u64 = 30;
    /// Attempts made on optimistic-concurrency conflicts
    pub const CONFLICT_ATTEMPTS: usize = 3;
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
