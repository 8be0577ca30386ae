// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, client creation, namespaces, finalizers
//! and conflict handling.

pub mod client;
pub mod conflict;
pub mod crd;
pub mod finalizers;
pub mod namespaces;

pub use client::{KubeconfigClientProvider, TargetClientProvider};
pub use conflict::retry_on_conflict;
pub use crd::wait_for_crd;
pub use namespaces::{delete_namespace, ensure_namespace_exists};
