//! Common types for KaaS: errors, platform configuration, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod quantity;
pub mod telemetry;

pub use config::{
    ConfigSources, DatabaseConfig, ExposureProfile, PlatformConfig, PullPolicy, ServiceType,
};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default listen address for the HTTP API
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2024";

/// Namespace holding the startup ConfigMaps
pub const DEFAULT_CONFIG_NAMESPACE: &str = "default";

/// Selector label placed on every workload and matched by its Service
pub const LABEL_APP: &str = "app";

/// Standard Kubernetes name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value written to the managed-by label
pub const LABEL_MANAGED_BY_KAAS: &str = "kaas";

/// Suffix appended to a database name to form its credential Secret name
pub const DATABASE_SECRET_SUFFIX: &str = "-secret";

/// Name of the credential Secret for a database
pub fn database_secret_name(database: &str) -> String {
    format!("{}{}", database, DATABASE_SECRET_SUFFIX)
}
