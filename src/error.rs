// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::reasons;
use crate::types::condition::Severity;
use std::fmt;
use thiserror::Error;

/// Pipeline step an API failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    OwnerCluster,
    ServiceAccount,
    Role,
    RoleBinding,
    SystemAccounts,
    TokenSecret,
    TargetNamespace,
    TargetSecret,
}

impl Step {
    pub fn reason(self) -> &'static str {
        match self {
            Step::OwnerCluster => reasons::TARGET_CLUSTER_UNAVAILABLE,
            Step::ServiceAccount => reasons::SERVICE_ACCOUNT_FAILED,
            Step::Role => reasons::ROLE_FAILED,
            Step::RoleBinding => reasons::ROLE_BINDING_FAILED,
            Step::SystemAccounts => reasons::SYSTEM_ACCOUNTS_FAILED,
            Step::TokenSecret => reasons::TOKEN_READ_FAILED,
            Step::TargetNamespace => reasons::TARGET_NAMESPACE_FAILED,
            Step::TargetSecret => reasons::TARGET_SECRET_FAILED,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::OwnerCluster => "owning cluster lookup",
            Step::ServiceAccount => "service account",
            Step::Role => "role",
            Step::RoleBinding => "role binding",
            Step::SystemAccounts => "system service account registry",
            Step::TokenSecret => "token secret",
            Step::TargetNamespace => "target namespace",
            Step::TargetSecret => "target secret",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Reconciling {step} failed: {source}")]
    StepFailed {
        step: Step,
        #[source]
        source: kube::Error,
    },

    #[error("Invalid cluster reference: {0}")]
    InvalidReference(String),

    #[error("Cluster not ready: {0}")]
    ClusterNotReady(String),

    #[error("Failed to parse kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("Object is missing {0}")]
    MissingMetadata(&'static str),

    #[error("Reconcile did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, CourierError>;

impl CourierError {
    pub fn step(step: Step, source: kube::Error) -> Self {
        CourierError::StepFailed { step, source }
    }

    /// Whether the failure may clear up without the PSA being edited.
    pub fn is_retryable(&self) -> bool {
        match self {
            CourierError::KubeError(e) | CourierError::StepFailed { source: e, .. } => {
                !is_unauthorized(e)
            }
            CourierError::ClusterNotReady(_) | CourierError::Timeout(_) => true,
            CourierError::InvalidReference(_)
            | CourierError::KubeconfigError(_)
            | CourierError::MissingMetadata(_) => false,
        }
    }

    pub fn severity(&self) -> Severity {
        if self.is_retryable() {
            Severity::Warning
        } else {
            Severity::Error
        }
    }

    /// Condition reason naming the step that failed.
    pub fn reason(&self) -> &'static str {
        match self {
            CourierError::StepFailed { step, .. } => step.reason(),
            CourierError::InvalidReference(_) => reasons::INVALID_REFERENCE,
            CourierError::ClusterNotReady(_) | CourierError::KubeconfigError(_) => {
                reasons::TARGET_CLUSTER_UNAVAILABLE
            }
            CourierError::Timeout(_) => reasons::RECONCILE_TIMEOUT,
            CourierError::KubeError(_) | CourierError::MissingMetadata(_) => {
                reasons::RECONCILE_FAILED
            }
        }
    }

    /// Message surfaced on the condition. Reference errors stay empty so that
    /// a populated message always means an API or connectivity failure.
    pub fn condition_message(&self) -> String {
        match self {
            CourierError::InvalidReference(_) => String::new(),
            other => other.to_string(),
        }
    }
}

/// Returns true for a 401 or 403 API response.
pub fn is_unauthorized(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(resp) if resp.code == 401 || resp.code == 403)
}

/// Returns true for a 404 API response.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(resp) if resp.code == 404)
}
