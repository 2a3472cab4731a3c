//! Kubernetes resource types submitted and read back by KaaS
//!
//! Only the fields KaaS writes or reads are modelled. Unknown fields in server
//! responses are ignored, and every field the server may omit has a default,
//! so objects created by other tools in the namespace still deserialize.
//!
//! The shared Ingress is the one object KaaS reads, modifies and writes back
//! whole. Its metadata, spec, rules and backends carry an `extra` map so
//! fields set by other tools (`tls`, `defaultBackend`, `resource` backends)
//! survive the round trip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
pub use kaas_common::kube_utils::{HasApiResource, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource name -> quantity (e.g., "cpu" -> "500m")
pub type ResourceList = BTreeMap<String, String>;

/// Generates the serde default functions for `apiVersion` and `kind`.
///
/// List responses omit both on their items.
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as HasApiResource>::KIND.to_string()
            }
        }
    };
}

/// Access to the metadata every top-level object carries
pub trait KubeObject {
    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;
}

macro_rules! impl_kube_object {
    ($type:ty, $api_version:expr, $kind:expr, $plural:expr) => {
        impl HasApiResource for $type {
            const API_VERSION: &'static str = $api_version;
            const KIND: &'static str = $kind;
            const PLURAL: &'static str = $plural;
        }

        impl KubeObject for $type {
            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
        }

        impl_api_defaults!($type);
    };
}

/// Either a port number or a named port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IntOrString {
    /// Numeric value
    Int(i32),
    /// Named value
    String(String),
}

// =============================================================================
// Containers
// =============================================================================

/// Label selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Match labels
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Container spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    #[serde(default)]
    pub image: String,
    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Args
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Environment variable -- either a literal value or a reference to a secret key
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value (mutually exclusive with `value_from`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Reference to a secret key (mutually exclusive with `value`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Create an env var with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Create an env var that references a secret key
    pub fn from_secret(
        name: impl Into<String>,
        secret_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.into(),
                    key: key.into(),
                }),
            }),
        }
    }
}

/// Source for an environment variable value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Reference to a specific key in a K8s Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

/// Selector for a key within a K8s Secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the K8s Secret
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub container_port: u16,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Resource requirements
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: ResourceList,
    /// Limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: ResourceList,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Path inside the container
    pub mount_path: String,
}

// =============================================================================
// Pod template
// =============================================================================

/// Pod template spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    #[serde(default)]
    pub metadata: PodMeta,
    /// Pod spec
    #[serde(default)]
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    #[serde(default)]
    pub containers: Vec<Container>,
}

// =============================================================================
// Deployment
// =============================================================================

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    #[serde(default = "Deployment::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Deployment::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: DeploymentSpec,
    /// Status, as reported by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl_kube_object!(Deployment, "apps/v1", "Deployment", "deployments");

/// Deployment spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Desired replicas
    #[serde(default)]
    pub replicas: i32,
    /// Label selector
    #[serde(default)]
    pub selector: LabelSelector,
    /// Pod template
    #[serde(default)]
    pub template: PodTemplateSpec,
}

/// Deployment status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    /// Pods targeted by the Deployment
    #[serde(default)]
    pub replicas: i32,
    /// Pods passing readiness
    #[serde(default)]
    pub ready_replicas: i32,
    /// Pods available for at least minReadySeconds
    #[serde(default)]
    pub available_replicas: i32,
}

// =============================================================================
// StatefulSet
// =============================================================================

/// Kubernetes StatefulSet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    /// API version
    #[serde(default = "StatefulSet::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "StatefulSet::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: StatefulSetSpec,
}

impl_kube_object!(StatefulSet, "apps/v1", "StatefulSet", "statefulsets");

/// StatefulSet spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    /// Desired replicas
    #[serde(default)]
    pub replicas: i32,
    /// Governing Service
    #[serde(default)]
    pub service_name: String,
    /// Label selector
    #[serde(default)]
    pub selector: LabelSelector,
    /// Pod template
    #[serde(default)]
    pub template: PodTemplateSpec,
    /// Per-replica volume claims
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaimTemplate>,
}

/// Volume claim template of a StatefulSet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimTemplate {
    /// Claim metadata
    pub metadata: ClaimMeta,
    /// Claim spec
    pub spec: PersistentVolumeClaimSpec,
}

/// Claim template metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClaimMeta {
    /// Claim name, also the volume name mounted by containers
    pub name: String,
}

/// PersistentVolumeClaim spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    /// Access modes (e.g., ReadWriteOnce)
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Requested storage
    #[serde(default)]
    pub resources: VolumeResourceRequirements,
}

/// Storage requested by a claim
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VolumeResourceRequirements {
    /// Requests (e.g., "storage" -> "1Gi")
    #[serde(default)]
    pub requests: ResourceList,
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    #[serde(default = "Service::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Service::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl_kube_object!(Service, "v1", "Service", "services");

/// Service spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selector
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Ports
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    /// Service type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Target port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<IntOrString>,
    /// Node port, allocated by the server for NodePort/LoadBalancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// =============================================================================
// Ingress
// =============================================================================

/// Kubernetes Ingress
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    /// API version
    #[serde(default = "Ingress::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Ingress::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: IngressSpec,
}

impl_kube_object!(Ingress, "networking.k8s.io/v1", "Ingress", "ingresses");

/// Ingress spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Ingress class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Host rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    /// `tls`, `defaultBackend` and anything else set by other tools
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One host rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Host to match; absent matches all hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// HTTP paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpIngressRuleValue>,
    /// Unmodelled rule fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IngressRule {
    /// Rule routing every path under `/` on `host` to a Service port
    pub fn prefix(host: impl Into<String>, service: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            http: Some(HttpIngressRuleValue {
                paths: vec![HttpIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend::service(service, port),
                }],
            }),
            extra: Map::new(),
        }
    }

    /// Service names this rule routes to
    pub fn backend_services(&self) -> impl Iterator<Item = &str> {
        self.http
            .iter()
            .flat_map(|http| http.paths.iter())
            .filter_map(|p| p.backend.service.as_ref())
            .map(|s| s.name.as_str())
    }
}

/// HTTP rule body
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpIngressRuleValue {
    /// Paths
    #[serde(default)]
    pub paths: Vec<HttpIngressPath>,
}

/// One path of an HTTP rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressPath {
    /// Path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Prefix, Exact or ImplementationSpecific
    #[serde(default)]
    pub path_type: String,
    /// Backend
    #[serde(default)]
    pub backend: IngressBackend,
}

/// Ingress backend
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct IngressBackend {
    /// Service backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<IngressServiceBackend>,
    /// Other backend kinds, e.g. `resource`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IngressBackend {
    /// Backend pointing at a Service port number
    pub fn service(name: impl Into<String>, port: u16) -> Self {
        Self {
            service: Some(IngressServiceBackend {
                name: name.into(),
                port: ServiceBackendPort {
                    number: Some(port),
                    name: None,
                },
            }),
            extra: Map::new(),
        }
    }
}

/// Service reference of a backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressServiceBackend {
    /// Service name
    pub name: String,
    /// Service port
    #[serde(default)]
    pub port: ServiceBackendPort,
}

/// Port of a Service backend
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceBackendPort {
    /// Port number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u16>,
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// =============================================================================
// Secret
// =============================================================================

/// Kubernetes Secret for sensitive configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// API version
    #[serde(default = "Secret::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Secret::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// String data (auto-encoded to base64 by K8s)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
    /// Secret type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl_kube_object!(Secret, "v1", "Secret", "secrets");

impl Secret {
    /// Create a new Opaque Secret
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::new(name, namespace),
            string_data: BTreeMap::new(),
            type_: Some("Opaque".to_string()),
        }
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Pod (read-only view)
// =============================================================================

/// The parts of a Pod the status view reads
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Status
    #[serde(default)]
    pub status: PodStatus,
}

impl HasApiResource for Pod {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";
}

/// Pod status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Lifecycle phase (Pending, Running, Succeeded, Failed, Unknown)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Node address
    #[serde(default, rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Pod address
    #[serde(default, rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    /// Time the kubelet acknowledged the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}
