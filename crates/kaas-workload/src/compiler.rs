//! Intent -> Kubernetes object compilation
//!
//! Pure functions of (intent, platform config). Every validation error is
//! raised here so the engine can fail before its first API call.

use std::collections::BTreeMap;

use kaas_common::{database_secret_name, Error, PlatformConfig, ServiceType, LABEL_APP};
use tracing::debug;

use crate::intent::{AppIntent, DatabaseIntent};
use crate::k8s::{
    ClaimMeta, Container, ContainerPort, Deployment, DeploymentSpec, EnvVar, HasApiResource,
    LabelSelector, ObjectMeta, PersistentVolumeClaimSpec, PersistentVolumeClaimTemplate, PodMeta,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, StatefulSet, StatefulSetSpec,
    VolumeMount, VolumeResourceRequirements,
};
use crate::resources::ResourceSpec;

/// Container name of every database StatefulSet
pub const DATABASE_CONTAINER: &str = "postgres";
/// Volume (and claim template) holding database files
pub const DATABASE_VOLUME: &str = "data";
/// Where the database image keeps its files
pub const DATABASE_DATA_PATH: &str = "/var/lib/postgresql/data";
/// Secret key holding the database user
pub const USERNAME_KEY: &str = "username";
/// Secret key holding the database password
pub const PASSWORD_KEY: &str = "password";

/// Host rule to append to the shared Ingress
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRule {
    /// Public host name
    pub host: String,
    /// Backend Service
    pub service: String,
    /// Backend Service port
    pub port: u16,
}

/// Objects realizing an app, in submission order
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledApp {
    /// Workload
    pub deployment: Deployment,
    /// Stable network identity
    pub service: Service,
    /// Ingress rule, for external apps
    pub route: Option<RouteRule>,
}

/// Objects realizing a database, in submission order after its credential Secret
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledDatabase {
    /// Credential Secret the StatefulSet reads from
    pub secret_name: String,
    /// Stateful workload
    pub stateful_set: StatefulSet,
    /// Stable network identity
    pub service: Service,
}

/// Compiles intents against the platform configuration
pub struct WorkloadCompiler<'a> {
    config: &'a PlatformConfig,
}

impl<'a> WorkloadCompiler<'a> {
    /// Create a compiler for the given configuration
    pub fn new(config: &'a PlatformConfig) -> Self {
        Self { config }
    }

    /// Compile an app intent into Deployment, Service and optional route
    pub fn compile_app(&self, intent: &AppIntent) -> Result<CompiledApp, Error> {
        intent.validate()?;
        self.check_external(&intent.name, intent.external_access)?;

        let name = intent.name.as_str();
        let namespace = self.config.namespace.as_str();
        let port = intent.port()?;
        let resources = ResourceSpec::parse_app(name, &intent.resources)?;

        let container = Container {
            name: name.to_string(),
            image: intent.image_reference(),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: Vec::new(),
            env: Self::compile_env(intent),
            ports: vec![ContainerPort {
                name: None,
                container_port: port,
                protocol: None,
            }],
            resources: Some(resources.requirements(Some("ephemeral-storage"))),
            volume_mounts: Vec::new(),
        };

        let deployment = Deployment {
            api_version: Deployment::API_VERSION.to_string(),
            kind: Deployment::KIND.to_string(),
            metadata: Self::metadata(name, namespace),
            spec: DeploymentSpec {
                replicas: intent.replicas,
                selector: Self::selector(name),
                template: Self::pod_template(name, container),
            },
            status: None,
        };

        let service_type = self.config.exposure.app_service_type(intent.external_access);
        let service = Self::compile_service(name, namespace, port, service_type);

        let route = match (intent.external_access, intent.domain()) {
            (true, Some(host)) => Some(RouteRule {
                host: host.to_string(),
                service: name.to_string(),
                port,
            }),
            _ => None,
        };

        debug!(
            app = %name,
            image = %intent.image_reference(),
            service_type = %service_type,
            routed = route.is_some(),
            "compiled app"
        );

        Ok(CompiledApp {
            deployment,
            service,
            route,
        })
    }

    /// Compile a database intent into StatefulSet and Service
    pub fn compile_database(&self, intent: &DatabaseIntent) -> Result<CompiledDatabase, Error> {
        intent.validate()?;
        self.check_external(&intent.name, intent.external_access)?;

        let name = intent.name.as_str();
        let namespace = self.config.namespace.as_str();
        let db = &self.config.database;
        let resources = ResourceSpec::parse_database(name, &intent.resources)?;
        let secret_name = database_secret_name(name);
        let storage = resources
            .disk
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| db.storage_size.clone());

        let args = match db.max_connections {
            Some(max) => vec!["-c".to_string(), format!("max_connections={}", max)],
            None => Vec::new(),
        };

        let container = Container {
            name: DATABASE_CONTAINER.to_string(),
            image: db.image.clone(),
            image_pull_policy: Some(db.pull_policy.as_str().to_string()),
            args,
            env: vec![
                EnvVar::literal("POSTGRES_DB", name),
                EnvVar::from_secret("POSTGRES_USER", &secret_name, USERNAME_KEY),
                EnvVar::from_secret("POSTGRES_PASSWORD", &secret_name, PASSWORD_KEY),
            ],
            ports: vec![ContainerPort {
                name: Some("postgres".to_string()),
                container_port: db.port,
                protocol: None,
            }],
            resources: Some(resources.requirements(None)),
            volume_mounts: vec![VolumeMount {
                name: DATABASE_VOLUME.to_string(),
                mount_path: DATABASE_DATA_PATH.to_string(),
            }],
        };

        let mut storage_request = BTreeMap::new();
        storage_request.insert("storage".to_string(), storage);

        let stateful_set = StatefulSet {
            api_version: StatefulSet::API_VERSION.to_string(),
            kind: StatefulSet::KIND.to_string(),
            metadata: Self::metadata(name, namespace),
            spec: StatefulSetSpec {
                replicas: db.replicas,
                service_name: name.to_string(),
                selector: Self::selector(name),
                template: Self::pod_template(name, container),
                volume_claim_templates: vec![PersistentVolumeClaimTemplate {
                    metadata: ClaimMeta {
                        name: DATABASE_VOLUME.to_string(),
                    },
                    spec: PersistentVolumeClaimSpec {
                        access_modes: vec![db.access_mode.clone()],
                        resources: VolumeResourceRequirements {
                            requests: storage_request,
                        },
                    },
                }],
            },
        };

        let service_type = self
            .config
            .exposure
            .database_service_type(intent.external_access);
        let service = Self::compile_service(name, namespace, db.port, service_type);

        debug!(database = %name, service_type = %service_type, "compiled database");

        Ok(CompiledDatabase {
            secret_name,
            stateful_set,
            service,
        })
    }

    fn check_external(&self, name: &str, external: bool) -> Result<(), Error> {
        if external && !self.config.exposure.allows_external() {
            return Err(Error::validation_for_field(
                name,
                "external_access",
                "external access is disabled on this platform",
            ));
        }
        Ok(())
    }

    /// Literal envs first, then secret references, each sorted by key
    fn compile_env(intent: &AppIntent) -> Vec<EnvVar> {
        let literals = intent
            .envs
            .iter()
            .map(|(key, value)| EnvVar::literal(key, value));
        let secrets = intent
            .secrets
            .iter()
            .map(|(key, secret)| EnvVar::from_secret(key, secret, key));
        literals.chain(secrets).collect()
    }

    fn metadata(name: &str, namespace: &str) -> ObjectMeta {
        ObjectMeta::new(name, namespace).with_label(LABEL_APP, name)
    }

    fn selector(name: &str) -> LabelSelector {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(LABEL_APP.to_string(), name.to_string());
        LabelSelector { match_labels }
    }

    fn pod_template(name: &str, container: Container) -> PodTemplateSpec {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_APP.to_string(), name.to_string());
        PodTemplateSpec {
            metadata: PodMeta { labels },
            spec: PodSpec {
                containers: vec![container],
            },
        }
    }

    fn compile_service(
        name: &str,
        namespace: &str,
        port: u16,
        service_type: ServiceType,
    ) -> Service {
        let mut selector = BTreeMap::new();
        selector.insert(LABEL_APP.to_string(), name.to_string());
        Service {
            api_version: Service::API_VERSION.to_string(),
            kind: Service::KIND.to_string(),
            metadata: Self::metadata(name, namespace),
            spec: ServiceSpec {
                selector,
                ports: vec![ServicePort {
                    name: None,
                    port,
                    target_port: None,
                    node_port: None,
                    protocol: None,
                }],
                type_: Some(service_type.as_str().to_string()),
            },
        }
    }
}
