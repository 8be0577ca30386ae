// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Optimistic-concurrency retry.

use crate::constants::retry::CONFLICT_ATTEMPTS;
use std::future::Future;
use tracing::debug;

/// Run `op` again when it fails with 409 Conflict, up to CONFLICT_ATTEMPTS times.
/// `op` must re-read the object so each attempt works on the latest version.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(kube::Error::Api(e)) if e.code == 409 && attempt < CONFLICT_ATTEMPTS => {
                debug!(attempt, "Conflict, retrying with latest version: {}", e.message);
                attempt += 1;
            }
            result => return result,
        }
    }
}
