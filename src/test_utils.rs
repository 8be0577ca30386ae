// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory Kubernetes API server behind a tower service.
//!
//! Objects are kept as JSON keyed by their REST path. The server assigns uids and
//! resourceVersions, rejects stale writes with 409, holds deletion while
//! finalizers remain and cascades deletes along owner references the way the
//! garbage collector would.

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

use crate::error::Result;
use crate::kubernetes::TargetClientProvider;
use crate::types::cluster::VSphereCluster;

const TIMESTAMP: &str = "2026-01-01T00:00:00Z";

#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    writes: Vec<String>,
    next_version: u64,
    unreachable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    group_version: String,
    namespace: Option<String>,
    resource: String,
    name: String,
}

enum Target {
    Collection {
        group_version: String,
        namespace: Option<String>,
        resource: String,
    },
    Item(ObjectKey),
    Status(ObjectKey),
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a kube Client talking to this server
    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    /// Fail every request at the transport level
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// `METHOD path` of every non-GET request received so far
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    fn is_unreachable(&self) -> bool {
        self.state.lock().unwrap().unreachable
    }

    fn handle(&self, method: &str, path: &str, content_type: &str, body: &Bytes) -> (StatusCode, Value) {
        let mut state = self.state.lock().unwrap();
        if method != "GET" {
            state.writes.push(format!("{} {}", method, path));
        }

        let Some(target) = parse_path(path) else {
            return status_error(StatusCode::NOT_FOUND, "NotFound", format!("unknown path {}", path));
        };
        let body: Value = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(body) {
                Ok(v) => v,
                Err(e) => return status_error(StatusCode::BAD_REQUEST, "BadRequest", e.to_string()),
            }
        };

        match (method, target) {
            ("GET", Target::Item(key)) | ("GET", Target::Status(key)) => state.get(&key),
            (
                "GET",
                Target::Collection {
                    group_version,
                    namespace,
                    resource,
                },
            ) => state.list(&group_version, namespace.as_deref(), &resource),
            (
                "POST",
                Target::Collection {
                    group_version,
                    namespace,
                    resource,
                },
            ) => state.create(group_version, namespace, resource, body),
            ("PUT", Target::Item(key)) => state.replace(&key, body),
            ("PUT", Target::Status(key)) => state.replace_status(&key, body),
            ("PATCH", Target::Item(key)) => state.patch(&key, content_type, body),
            ("PATCH", Target::Status(key)) => state.patch_status(&key, body),
            ("DELETE", Target::Item(key)) => state.delete(&key),
            _ => status_error(
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                format!("{} not supported on {}", method, path),
            ),
        }
    }
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn get(&self, key: &ObjectKey) -> (StatusCode, Value) {
        match self.objects.get(key) {
            Some(obj) => (StatusCode::OK, obj.clone()),
            None => not_found(key),
        }
    }

    fn list(&self, group_version: &str, namespace: Option<&str>, resource: &str) -> (StatusCode, Value) {
        let items: Vec<Value> = self
            .objects
            .iter()
            .filter(|(k, _)| {
                k.group_version == group_version
                    && k.resource == resource
                    && (namespace.is_none() || k.namespace.as_deref() == namespace)
            })
            .map(|(_, v)| v.clone())
            .collect();

        (
            StatusCode::OK,
            json!({
                "apiVersion": group_version,
                "kind": "List",
                "metadata": { "resourceVersion": self.next_version.to_string() },
                "items": items,
            }),
        )
    }

    fn create(
        &mut self,
        group_version: String,
        namespace: Option<String>,
        resource: String,
        mut body: Value,
    ) -> (StatusCode, Value) {
        let Some(name) = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return status_error(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", "metadata.name is required");
        };
        let key = ObjectKey {
            group_version,
            namespace,
            resource,
            name,
        };
        if self.objects.contains_key(&key) {
            return status_error(
                StatusCode::CONFLICT,
                "AlreadyExists",
                format!("{} \"{}\" already exists", key.resource, key.name),
            );
        }

        let version = self.bump();
        let meta = metadata_mut(&mut body);
        if let Some(ns) = &key.namespace {
            meta.insert("namespace".to_string(), json!(ns));
        }
        meta.insert("uid".to_string(), json!(format!("uid-{}", version)));
        meta.insert("resourceVersion".to_string(), json!(version));
        meta.insert("creationTimestamp".to_string(), json!(TIMESTAMP));
        meta.remove("deletionTimestamp");

        self.objects.insert(key, body.clone());
        (StatusCode::CREATED, body)
    }

    fn replace(&mut self, key: &ObjectKey, mut body: Value) -> (StatusCode, Value) {
        let Some(stored) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if let Some(conflict) = check_version(key, &stored, &body) {
            return conflict;
        }
        let version = self.bump();
        carry_metadata(&stored, &mut body, &version);
        self.store(key, body)
    }

    fn replace_status(&mut self, key: &ObjectKey, body: Value) -> (StatusCode, Value) {
        let Some(mut stored) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if let Some(conflict) = check_version(key, &stored, &body) {
            return conflict;
        }
        stored["status"] = body.get("status").cloned().unwrap_or(Value::Null);
        let version = self.bump();
        metadata_mut(&mut stored).insert("resourceVersion".to_string(), json!(version));
        self.objects.insert(key.clone(), stored.clone());
        (StatusCode::OK, stored)
    }

    fn patch(&mut self, key: &ObjectKey, content_type: &str, mut body: Value) -> (StatusCode, Value) {
        if content_type.starts_with("application/json-patch") {
            return status_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UnsupportedMediaType",
                "json patches are not supported",
            );
        }
        let Some(stored) = self.objects.get(key).cloned() else {
            if content_type.starts_with("application/apply-patch") {
                metadata_mut(&mut body).insert("name".to_string(), json!(key.name));
                return self.create(
                    key.group_version.clone(),
                    key.namespace.clone(),
                    key.resource.clone(),
                    body,
                );
            }
            return not_found(key);
        };
        if let Some(conflict) = check_version(key, &stored, &body) {
            return conflict;
        }
        let mut merged = stored.clone();
        merge(&mut merged, &body);
        let version = self.bump();
        carry_metadata(&stored, &mut merged, &version);
        self.store(key, merged)
    }

    fn patch_status(&mut self, key: &ObjectKey, body: Value) -> (StatusCode, Value) {
        let Some(mut stored) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if let Some(conflict) = check_version(key, &stored, &body) {
            return conflict;
        }
        if let Some(status) = body.get("status") {
            merge(&mut stored, &json!({ "status": status }));
        }
        let version = self.bump();
        metadata_mut(&mut stored).insert("resourceVersion".to_string(), json!(version));
        self.objects.insert(key.clone(), stored.clone());
        (StatusCode::OK, stored)
    }

    fn delete(&mut self, key: &ObjectKey) -> (StatusCode, Value) {
        let Some(mut stored) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if has_finalizers(&stored) {
            if stored.pointer("/metadata/deletionTimestamp").is_none() {
                let version = self.bump();
                let meta = metadata_mut(&mut stored);
                meta.insert("deletionTimestamp".to_string(), json!(TIMESTAMP));
                meta.insert("resourceVersion".to_string(), json!(version));
                self.objects.insert(key.clone(), stored.clone());
            }
            return (StatusCode::OK, stored);
        }
        self.remove_cascading(key);
        (StatusCode::OK, stored)
    }

    /// Persist a write, completing a pending deletion once the last finalizer is gone
    fn store(&mut self, key: &ObjectKey, obj: Value) -> (StatusCode, Value) {
        let deleting = obj.pointer("/metadata/deletionTimestamp").is_some();
        if deleting && !has_finalizers(&obj) {
            self.objects.insert(key.clone(), obj.clone());
            self.remove_cascading(key);
        } else {
            self.objects.insert(key.clone(), obj.clone());
        }
        (StatusCode::OK, obj)
    }

    fn remove_cascading(&mut self, key: &ObjectKey) {
        let mut pending = vec![key.clone()];
        while let Some(key) = pending.pop() {
            let Some(removed) = self.objects.remove(&key) else {
                continue;
            };
            let Some(uid) = removed.pointer("/metadata/uid").and_then(Value::as_str) else {
                continue;
            };
            pending.extend(
                self.objects
                    .iter()
                    .filter(|(_, obj)| owned_by(obj, uid))
                    .map(|(k, _)| k.clone()),
            );
        }
    }
}

fn parse_path(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let prefix_len = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return None,
    };
    if segments.len() <= prefix_len {
        return None;
    }
    let group_version = segments[1..prefix_len].join("/");
    let rest = &segments[prefix_len..];
    let (namespace, rest) = match rest {
        ["namespaces", ns, tail @ ..] if !tail.is_empty() => (Some(ns.to_string()), tail),
        _ => (None, rest),
    };
    let key = |resource: &str, name: &str| ObjectKey {
        group_version: group_version.clone(),
        namespace: namespace.clone(),
        resource: resource.to_string(),
        name: name.to_string(),
    };

    match rest {
        [resource] => Some(Target::Collection {
            group_version: group_version.clone(),
            namespace: namespace.clone(),
            resource: resource.to_string(),
        }),
        [resource, name] => Some(Target::Item(key(resource, name))),
        [resource, name, "status"] => Some(Target::Status(key(resource, name))),
        _ => None,
    }
}

fn metadata_mut(obj: &mut Value) -> &mut Map<String, Value> {
    if !obj.is_object() {
        *obj = json!({});
    }
    let root = obj.as_object_mut().unwrap();
    let meta = root.entry("metadata").or_insert_with(|| json!({}));
    if !meta.is_object() {
        *meta = json!({});
    }
    meta.as_object_mut().unwrap()
}

/// Server-owned metadata survives client writes
fn carry_metadata(stored: &Value, obj: &mut Value, version: &str) {
    let meta = metadata_mut(obj);
    for field in ["uid", "namespace", "creationTimestamp", "deletionTimestamp"] {
        match stored.pointer(&format!("/metadata/{}", field)) {
            Some(v) => meta.insert(field.to_string(), v.clone()),
            None => meta.remove(field),
        };
    }
    meta.insert("resourceVersion".to_string(), json!(version));
}

fn check_version(key: &ObjectKey, stored: &Value, body: &Value) -> Option<(StatusCode, Value)> {
    let requested = body.pointer("/metadata/resourceVersion").and_then(Value::as_str)?;
    let current = stored.pointer("/metadata/resourceVersion").and_then(Value::as_str);
    if Some(requested) == current {
        return None;
    }
    Some(status_error(
        StatusCode::CONFLICT,
        "Conflict",
        format!(
            "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
            key.resource, key.name
        ),
    ))
}

fn has_finalizers(obj: &Value) -> bool {
    obj.pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn owned_by(obj: &Value, uid: &str) -> bool {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid))
}

/// JSON merge patch (RFC 7386)
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let target = target.as_object_mut().unwrap();
    for (k, v) in patch {
        if v.is_null() {
            target.remove(k);
        } else {
            merge(target.entry(k.clone()).or_insert(Value::Null), v);
        }
    }
}

fn not_found(key: &ObjectKey) -> (StatusCode, Value) {
    status_error(
        StatusCode::NOT_FOUND,
        "NotFound",
        format!("{} \"{}\" not found", key.resource, key.name),
    )
}

fn status_error(code: StatusCode, reason: &str, message: impl Into<String>) -> (StatusCode, Value) {
    (
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message.into(),
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            if server.is_unreachable() {
                return Err("connection refused".into());
            }

            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let (status, payload) =
                server.handle(parts.method.as_str(), parts.uri.path(), &content_type, &bytes);

            let response = Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&payload)?))?;
            Ok(response)
        })
    }
}

/// Hands out a fixed client regardless of the cluster asked for.
pub struct StaticClientProvider(pub Client);

#[async_trait]
impl TargetClientProvider for StaticClientProvider {
    async fn client_for(&self, _cluster: &VSphereCluster) -> Result<Client> {
        Ok(self.0.clone())
    }
}

/// Object builders shared by tests. Every test creates its own objects.
pub mod fixtures {
    use crate::types::cluster::{VSphereCluster, VSphereClusterSpec};
    use crate::types::provider_service_account::{
        ProviderServiceAccount, ProviderServiceAccountSpec,
    };
    use k8s_openapi::api::core::v1::{ObjectReference, Secret};
    use k8s_openapi::api::rbac::v1::PolicyRule;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use kube::{Resource, ResourceExt};
    use std::collections::BTreeMap;

    pub const NAMESPACE: &str = "test-namespace";
    pub const CLUSTER: &str = "test-cluster";
    pub const PSA: &str = "test-pvcsi";
    pub const TARGET_NAMESPACE: &str = "test-pvcsi-system";
    pub const TARGET_SECRET: &str = "test-pvcsi-secret";
    pub const TOKEN_SECRET: &str = "test-pvcsi-token-abcdef";
    pub const TOKEN: &str = "ZXlKaGJHY2lPaUpTVXpJMU5pSXNJbXRwWkNJNklp";

    pub fn cluster() -> VSphereCluster {
        VSphereCluster {
            metadata: ObjectMeta {
                name: Some(CLUSTER.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                uid: Some("cluster-uid".to_string()),
                ..Default::default()
            },
            spec: VSphereClusterSpec::default(),
            status: None,
        }
    }

    pub fn get_pvc_rule() -> PolicyRule {
        PolicyRule {
            verbs: vec!["get".to_string()],
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["persistentvolumeclaims".to_string()]),
            ..Default::default()
        }
    }

    pub fn get_pod_rule() -> PolicyRule {
        PolicyRule {
            verbs: vec!["get".to_string()],
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["pods".to_string()]),
            ..Default::default()
        }
    }

    /// A PSA referencing and owned by `cluster`, or with neither when `None`
    pub fn psa(cluster: Option<&VSphereCluster>) -> ProviderServiceAccount {
        let mut psa = ProviderServiceAccount {
            metadata: ObjectMeta {
                name: Some(PSA.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: ProviderServiceAccountSpec {
                r#ref: None,
                rules: vec![get_pvc_rule()],
                target_namespace: TARGET_NAMESPACE.to_string(),
                target_secret_name: TARGET_SECRET.to_string(),
            },
            status: None,
        };
        if let Some(cluster) = cluster {
            psa.metadata.owner_references = Some(vec![OwnerReference {
                api_version: VSphereCluster::api_version(&()).to_string(),
                kind: VSphereCluster::kind(&()).to_string(),
                name: cluster.name_any(),
                uid: cluster.uid().unwrap_or_default(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]);
            psa.spec.r#ref = Some(ObjectReference {
                name: Some(cluster.name_any()),
                ..Default::default()
            });
        }
        psa
    }

    pub fn token_secret(name: &str, token: &[u8]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "token".to_string(),
                ByteString(token.to_vec()),
            )])),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_item() {
        let Some(Target::Item(key)) = parse_path("/api/v1/namespaces/ns/secrets/s") else {
            panic!("expected item");
        };
        assert_eq!(key.namespace.as_deref(), Some("ns"));
        assert_eq!(key.resource, "secrets");
        assert_eq!(key.name, "s");
    }

    #[test]
    fn test_parse_namespace_object_is_cluster_scoped() {
        let Some(Target::Item(key)) = parse_path("/api/v1/namespaces/ns") else {
            panic!("expected item");
        };
        assert_eq!(key.namespace, None);
        assert_eq!(key.resource, "namespaces");
        assert_eq!(key.name, "ns");
    }

    #[test]
    fn test_parse_group_status() {
        let path = "/apis/rbac.authorization.k8s.io/v1/namespaces/ns/roles/r/status";
        let Some(Target::Status(key)) = parse_path(path) else {
            panic!("expected status");
        };
        assert_eq!(key.group_version, "rbac.authorization.k8s.io/v1");
    }

    #[test]
    fn test_merge_patch_removes_nulls() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge(&mut target, &json!({"a": null, "b": {"c": 4}}));
        assert_eq!(target, json!({"b": {"c": 4, "d": 3}}));
    }
}
