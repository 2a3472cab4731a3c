//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction plus the metadata type every compiled object carries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};

use crate::Error;

// =============================================================================
// ObjectMeta - Canonical Kubernetes metadata for all compiled resources
// =============================================================================

/// Standard Kubernetes ObjectMeta for compiled resources.
///
/// Used by every object KaaS submits or reads back. Construction adds the
/// KaaS management labels; `resource_version` is only populated on objects
/// read from the API server and is echoed back on update so the write is
/// conditional. Fields not modelled here (uid, finalizers, ownerReferences,
/// ...) land in `extra` and are written back unchanged.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default)]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Version token assigned by the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Every other metadata field, as read from the server
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObjectMeta {
    /// Create new metadata with standard KaaS labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert(crate::LABEL_NAME.to_string(), name.clone());
        labels.insert(
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_KAAS.to_string(),
        );
        Self {
            name,
            namespace: namespace.into(),
            labels,
            annotations: BTreeMap::new(),
            resource_version: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implemented by every object type KaaS submits so the dynamic API can be
/// addressed from the type alone.
pub trait HasApiResource {
    /// Full API version (e.g., "apps/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Deployment")
    const KIND: &'static str;
    /// Lowercase plural used in API paths (e.g., "deployments")
    const PLURAL: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND, Self::PLURAL)
    }
}

/// Build an ApiResource from an apiVersion, kind and plural
///
/// Core types have no group: "v1" splits into group "" and version "v1".
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Render label pairs as an equality-based selector (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Default connection timeout for kube clients (5s is plenty for local API server)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a path the config is inferred (in-cluster service account first,
/// then `$KUBECONFIG` / `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_new_adds_management_labels() {
        let meta = ObjectMeta::new("web", "apps");
        assert_eq!(meta.name, "web");
        assert_eq!(meta.namespace, "apps");
        assert_eq!(meta.labels.get(crate::LABEL_NAME), Some(&"web".to_string()));
        assert_eq!(
            meta.labels.get(crate::LABEL_MANAGED_BY),
            Some(&"kaas".to_string())
        );
        assert!(meta.resource_version.is_none());
    }

    #[test]
    fn object_meta_omits_empty_fields_on_the_wire() {
        let meta = ObjectMeta {
            name: "web".to_string(),
            namespace: "apps".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"name": "web", "namespace": "apps"}));
    }

    #[test]
    fn object_meta_reads_resource_version_from_server() {
        let json = serde_json::json!({
            "name": "kaas-ingress",
            "namespace": "apps",
            "resourceVersion": "4711",
            "uid": "ignored",
            "creationTimestamp": "2024-01-01T00:00:00Z"
        });
        let meta: ObjectMeta = serde_json::from_value(json).unwrap();
        assert_eq!(meta.resource_version.as_deref(), Some("4711"));
    }

    #[test]
    fn object_meta_writes_back_fields_it_does_not_model() {
        let json = serde_json::json!({
            "name": "kaas-ingress",
            "namespace": "apps",
            "resourceVersion": "4711",
            "uid": "0b5c",
            "finalizers": ["example.com/cleanup"],
            "ownerReferences": [{"apiVersion": "v1", "kind": "ConfigMap", "name": "owner", "uid": "77"}]
        });
        let meta: ObjectMeta = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(meta.extra.len(), 3);
        assert_eq!(serde_json::to_value(&meta).unwrap(), json);
    }

    #[test]
    fn build_api_resource_splits_group_and_version() {
        let ar = build_api_resource("networking.k8s.io/v1", "Ingress", "ingresses");
        assert_eq!(ar.group, "networking.k8s.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "ingresses");

        let ar = build_api_resource("v1", "Secret", "secrets");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.api_version, "v1");
    }

    #[test]
    fn label_selector_joins_sorted_pairs() {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "web".to_string());
        labels.insert("app".to_string(), "shop".to_string());
        assert_eq!(label_selector(&labels), "app=shop,tier=web");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }
}
