// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Steps of a ProviderServiceAccount pass, from resolving the owning cluster to
//! mirroring the token into it.

pub mod credentials;
pub mod identity;
pub mod mirror;
pub mod system_accounts;
pub mod target;

pub use credentials::{read_token, PendingReason, TokenState};
pub use identity::{ensure_role, ensure_role_binding, ensure_service_account};
pub use mirror::{cleanup_target, ensure_target_namespace, ensure_target_secret, MirrorResult};
pub use target::{cluster_reference, connect, lookup_cluster, owner_from_references};
