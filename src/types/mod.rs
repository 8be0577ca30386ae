// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources and status types.

pub mod cluster;
pub mod condition;
pub mod provider_service_account;

pub use cluster::VSphereCluster;
pub use condition::{Condition, ConditionStatus, Severity};
pub use provider_service_account::{
    ProviderServiceAccount, ProviderServiceAccountSpec, ProviderServiceAccountStatus,
};
