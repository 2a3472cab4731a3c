//! Platform configuration loaded once at startup
//!
//! Two ConfigMaps drive the service: the platform map (target namespace,
//! shared Ingress, exposure profile) and the database map (StatefulSet
//! defaults for provisioned databases). Parsing is pure; fetching goes through
//! [`ConfigMapSource`] so it can be mocked.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use tracing::{debug, info};

use crate::quantity::Quantity;
use crate::{Error, DEFAULT_CONFIG_NAMESPACE};

/// Default name of the platform ConfigMap
pub const DEFAULT_PLATFORM_CONFIG_MAP: &str = "kaas-config";
/// Default name of the database ConfigMap
pub const DEFAULT_DATABASE_CONFIG_MAP: &str = "db-request-config";
/// Default bound on shared-Ingress update attempts
pub const DEFAULT_ROUTING_MAX_ATTEMPTS: u32 = 5;
/// Default bound on concurrent per-app lookups when listing status
pub const DEFAULT_STATUS_CONCURRENCY: usize = 8;

/// How a workload's Service is exposed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceType {
    /// Cluster-internal virtual IP
    ClusterIP,
    /// Port opened on every node
    NodePort,
    /// Cloud load balancer
    LoadBalancer,
}

impl ServiceType {
    /// Kubernetes `spec.type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy deciding how external access is realized
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExposureProfile {
    /// Nothing leaves the cluster; external requests are rejected
    Internal,
    /// NodePort Service plus a rule on the shared Ingress
    #[default]
    NodePort,
    /// LoadBalancer Service plus a rule on the shared Ingress
    LoadBalancer,
    /// ClusterIP Service reached only through the shared Ingress
    Ingress,
}

impl ExposureProfile {
    /// Whether external access can be granted at all
    pub fn allows_external(&self) -> bool {
        !matches!(self, ExposureProfile::Internal)
    }

    /// Service type for an app; external apps also get an Ingress rule
    pub fn app_service_type(&self, external: bool) -> ServiceType {
        match (self, external) {
            (_, false) => ServiceType::ClusterIP,
            (ExposureProfile::NodePort, true) => ServiceType::NodePort,
            (ExposureProfile::LoadBalancer, true) => ServiceType::LoadBalancer,
            (ExposureProfile::Ingress | ExposureProfile::Internal, true) => ServiceType::ClusterIP,
        }
    }

    /// Service type for a database; databases speak TCP so never use the Ingress
    pub fn database_service_type(&self, external: bool) -> ServiceType {
        match (self, external) {
            (_, false) | (ExposureProfile::Internal, true) => ServiceType::ClusterIP,
            (ExposureProfile::LoadBalancer, true) => ServiceType::LoadBalancer,
            (ExposureProfile::NodePort | ExposureProfile::Ingress, true) => ServiceType::NodePort,
        }
    }
}

impl FromStr for ExposureProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(ExposureProfile::Internal),
            "node-port" => Ok(ExposureProfile::NodePort),
            "load-balancer" => Ok(ExposureProfile::LoadBalancer),
            "ingress" => Ok(ExposureProfile::Ingress),
            other => Err(format!(
                "unknown exposure profile '{}' (expected internal, node-port, load-balancer or ingress)",
                other
            )),
        }
    }
}

/// Container image pull policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PullPolicy {
    /// Always pull
    Always,
    /// Pull only when absent from the node
    #[default]
    IfNotPresent,
    /// Never pull
    Never,
}

impl PullPolicy {
    /// Kubernetes `imagePullPolicy` value
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(PullPolicy::Always),
            "IfNotPresent" => Ok(PullPolicy::IfNotPresent),
            "Never" => Ok(PullPolicy::Never),
            other => Err(format!(
                "unknown pull policy '{}' (expected Always, IfNotPresent or Never)",
                other
            )),
        }
    }
}

/// StatefulSet defaults for provisioned databases
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    /// Replica count for every database StatefulSet
    pub replicas: i32,
    /// `max_connections` passed to the server, if set
    pub max_connections: Option<u32>,
    /// Port the database listens on and its Service exposes
    pub port: u16,
    /// Volume size when the intent gives no disk token
    pub storage_size: String,
    /// Database container image
    pub image: String,
    /// Pull policy for the database image
    pub pull_policy: PullPolicy,
    /// Access mode of the data volume claim
    pub access_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            replicas: 1,
            max_connections: None,
            port: 5432,
            storage_size: "1Gi".to_string(),
            image: "postgres:16".to_string(),
            pull_policy: PullPolicy::IfNotPresent,
            access_mode: "ReadWriteOnce".to_string(),
        }
    }
}

/// Where the startup ConfigMaps live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigSources {
    /// Namespace holding both maps
    pub namespace: String,
    /// Platform map name
    pub platform_map: String,
    /// Database map name
    pub database_map: String,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_CONFIG_NAMESPACE.to_string(),
            platform_map: DEFAULT_PLATFORM_CONFIG_MAP.to_string(),
            database_map: DEFAULT_DATABASE_CONFIG_MAP.to_string(),
        }
    }
}

/// Immutable process-wide configuration
#[derive(Clone, Debug, PartialEq)]
pub struct PlatformConfig {
    /// Namespace all workloads are created in
    pub namespace: String,
    /// Name of the shared Ingress
    pub ingress_name: String,
    /// `ingressClassName` for the shared Ingress, if any
    pub ingress_class: Option<String>,
    /// Exposure strategy
    pub exposure: ExposureProfile,
    /// Attempts at a version-gated Ingress update before giving up
    pub routing_max_attempts: u32,
    /// Per-app status lookups in flight at once when listing every app
    pub status_concurrency: usize,
    /// Database defaults
    pub database: DatabaseConfig,
}

impl PlatformConfig {
    /// Minimal config for a namespace and Ingress name, everything else defaulted
    pub fn new(namespace: impl Into<String>, ingress_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ingress_name: ingress_name.into(),
            ingress_class: None,
            exposure: ExposureProfile::default(),
            routing_max_attempts: DEFAULT_ROUTING_MAX_ATTEMPTS,
            status_concurrency: DEFAULT_STATUS_CONCURRENCY,
            database: DatabaseConfig::default(),
        }
    }

    /// Build the config from the two ConfigMaps' `data`
    pub fn from_maps(
        sources: &ConfigSources,
        platform: &BTreeMap<String, String>,
        database: &BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        let pmap = sources.platform_map.as_str();
        let dmap = sources.database_map.as_str();

        let namespace = required(pmap, platform, "namespace")?;
        let ingress_name = required(pmap, platform, "ingress.name")?;
        let ingress_class = optional(platform, "ingress.className");
        let exposure = parse_or(pmap, platform, "exposure.profile", ExposureProfile::default())?;
        let routing_max_attempts = parse_or(
            pmap,
            platform,
            "routing.maxAttempts",
            DEFAULT_ROUTING_MAX_ATTEMPTS,
        )?;
        if routing_max_attempts == 0 {
            return Err(Error::config_key(pmap, "routing.maxAttempts", "must be at least 1"));
        }
        let status_concurrency = parse_or(
            pmap,
            platform,
            "status.maxConcurrency",
            DEFAULT_STATUS_CONCURRENCY,
        )?;
        if status_concurrency == 0 {
            return Err(Error::config_key(pmap, "status.maxConcurrency", "must be at least 1"));
        }

        let defaults = DatabaseConfig::default();
        let replicas: i32 = parse_or(dmap, database, "replica", defaults.replicas)?;
        if replicas < 0 {
            return Err(Error::config_key(dmap, "replica", "must not be negative"));
        }
        let max_connections = match optional(database, "maxConnections") {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|e| Error::config_key(dmap, "maxConnections", e.to_string()))?,
            ),
            None => None,
        };
        let port: u16 = parse_or(dmap, database, "port", defaults.port)?;
        if port == 0 {
            return Err(Error::config_key(dmap, "port", "must be between 1 and 65535"));
        }
        let storage_size = match optional(database, "pvcSize") {
            Some(raw) => Quantity::bytes(&raw)
                .map_err(|e| Error::config_key(dmap, "pvcSize", e))?
                .into(),
            None => defaults.storage_size,
        };
        let image = optional(database, "image.repository").unwrap_or(defaults.image);
        let pull_policy = parse_or(dmap, database, "image.pullPolicy", defaults.pull_policy)?;
        let access_mode = optional(database, "accessMode").unwrap_or(defaults.access_mode);
        if !matches!(
            access_mode.as_str(),
            "ReadWriteOnce" | "ReadWriteMany" | "ReadWriteOncePod" | "ReadOnlyMany"
        ) {
            return Err(Error::config_key(
                dmap,
                "accessMode",
                format!("unknown access mode '{}'", access_mode),
            ));
        }

        Ok(Self {
            namespace,
            ingress_name,
            ingress_class,
            exposure,
            routing_max_attempts,
            status_concurrency,
            database: DatabaseConfig {
                replicas,
                max_connections,
                port,
                storage_size,
                image,
                pull_policy,
                access_mode,
            },
        })
    }

    /// Fetch both ConfigMaps and parse them
    pub async fn load(source: &dyn ConfigMapSource, sources: &ConfigSources) -> Result<Self, Error> {
        let platform = fetch(source, sources, &sources.platform_map).await?;
        let database = fetch(source, sources, &sources.database_map).await?;
        let config = Self::from_maps(sources, &platform, &database)?;
        info!(
            namespace = %config.namespace,
            ingress = %config.ingress_name,
            exposure = ?config.exposure,
            "loaded platform configuration"
        );
        Ok(config)
    }
}

async fn fetch(
    source: &dyn ConfigMapSource,
    sources: &ConfigSources,
    name: &str,
) -> Result<BTreeMap<String, String>, Error> {
    debug!(namespace = %sources.namespace, configmap = %name, "reading configuration");
    source
        .config_map_data(&sources.namespace, name)
        .await?
        .ok_or_else(|| {
            Error::config(
                name,
                format!("ConfigMap not found in namespace {}", sources.namespace),
            )
        })
}

fn optional(map: &BTreeMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(map_name: &str, map: &BTreeMap<String, String>, key: &str) -> Result<String, Error> {
    optional(map, key).ok_or_else(|| Error::config_key(map_name, key, "required key is missing"))
}

fn parse_or<T>(
    map_name: &str,
    map: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional(map, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| Error::config_key(map_name, key, e.to_string())),
        None => Ok(default),
    }
}

/// Read access to ConfigMap data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigMapSource: Send + Sync {
    /// `data` of the named ConfigMap, or None if it does not exist
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;
}

/// ConfigMap source backed by the API server
pub struct KubeConfigMapSource {
    client: Client,
}

impl KubeConfigMapSource {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigMapSource for KubeConfigMapSource {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm.data.unwrap_or_default())),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
