//! Error types for KaaS
//!
//! Errors are structured with fields to aid debugging in production.
//! Every variant that concerns a workload carries the resource name so a log
//! line or an HTTP error body always says which object failed.

use thiserror::Error;

/// Main error type for KaaS operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error outside any named operation (client setup, config reads)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed intent (bad name, resource spec, port, env keys)
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the app or database with invalid input
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The offending intent field (e.g., "resources")
        field: Option<String>,
    },

    /// The name is already taken by an object of the same kind
    #[error("{kind} {name} already exists")]
    Conflict {
        /// Object kind that was checked (Deployment, Secret)
        kind: String,
        /// Requested name
        name: String,
    },

    /// A status query named a workload that does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind that was looked up
        kind: String,
        /// Requested name
        name: String,
    },

    /// The orchestrator rejected or failed a call
    #[error("failed to {operation} {kind} {name}: {message}")]
    Upstream {
        /// Operation attempted (create, get, list, update)
        operation: String,
        /// Object kind
        kind: String,
        /// Object name (or selector for list calls)
        name: String,
        /// HTTP status code reported by the orchestrator, if any
        code: Option<u16>,
        /// Description of what failed
        message: String,
    },

    /// A multi-object deploy failed after some objects were created
    #[error("deploy of {resource} failed at {step} after creating [{}]: {source}", .created.join(", "))]
    PartialFailure {
        /// Name of the app or database being deployed
        resource: String,
        /// Objects already created and left in place, as "Kind/name"
        created: Vec<String>,
        /// Step that failed
        step: String,
        /// The failure itself
        source: Box<Error>,
    },

    /// Startup configuration is missing or unusable
    #[error("configuration error [{map}]: {message}")]
    Config {
        /// ConfigMap the value came from
        map: String,
        /// Offending key, if the error concerns one key
        key: Option<String>,
        /// Description of what's wrong
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "server")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context and field name
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a name conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an upstream error with an orchestrator status code
    pub fn upstream(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        code: Option<u16>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            operation: operation.into(),
            kind: kind.into(),
            name: name.into(),
            code,
            message: msg.into(),
        }
    }

    /// Wrap a kube-rs error with the operation that produced it
    pub fn from_kube(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        let code = match &source {
            kube::Error::Api(ae) => Some(ae.code),
            _ => None,
        };
        Self::upstream(operation, kind, name, code, source.to_string())
    }

    /// Record that `source` happened after `created` objects were already submitted
    pub fn partial_failure(
        resource: impl Into<String>,
        created: Vec<String>,
        step: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::PartialFailure {
            resource: resource.into(),
            created,
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error for a whole ConfigMap
    pub fn config(map: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            map: map.into(),
            key: None,
            message: msg.into(),
        }
    }

    /// Create a configuration error for a single key
    pub fn config_key(
        map: impl Into<String>,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self::Config {
            map: map.into(),
            message: format!("{}: {}", key, msg.into()),
            key: Some(key),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Name of the app, database or object this error concerns
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::Conflict { name, .. } => Some(name),
            Error::NotFound { name, .. } => Some(name),
            Error::Upstream { name, .. } => Some(name),
            Error::PartialFailure { resource, .. } => Some(resource),
            Error::Kube { .. }
            | Error::Config { .. }
            | Error::Serialization { .. }
            | Error::Internal { .. } => None,
        }
    }

    /// Status code the orchestrator answered with, if this is an upstream failure
    pub fn upstream_code(&self) -> Option<u16> {
        match self {
            Error::Upstream { code, .. } => *code,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// True when the orchestrator refused a write because of a name or version clash
    ///
    /// Create calls get 409 when the name is taken; update calls get 409 when
    /// the carried resourceVersion is stale.
    pub fn is_orchestrator_conflict(&self) -> bool {
        self.upstream_code() == Some(409)
    }
}
