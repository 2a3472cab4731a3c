//! Declarative requests accepted over HTTP
//!
//! Field names follow the public JSON API (snake_case).

use std::collections::BTreeMap;

use kaas_common::Error;
use serde::{Deserialize, Serialize};

/// Longest name accepted; the name doubles as a Service name (RFC 1035 label)
pub const MAX_NAME_LEN: usize = 63;

/// Request to run a stateless app
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppIntent {
    /// Deployment, Service and container name
    pub name: String,
    /// Desired replicas; zero is allowed
    #[serde(default)]
    pub replicas: i32,
    /// Image reference, with or without a tag
    pub image: String,
    /// Tag appended to `image` when the image has none
    #[serde(default)]
    pub image_tag: Option<String>,
    /// Public host name; required when `external_access` is set
    #[serde(default)]
    pub domain_address: Option<String>,
    /// Container and Service port
    pub port: u32,
    /// `"<cpu>,<mem>,<disk>"`, e.g. `"500m,128Mi,1Gi"`
    pub resources: String,
    /// Literal environment variables
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    /// Environment variable -> name of the Secret holding a key of the same name
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Expose outside the cluster
    #[serde(default)]
    pub external_access: bool,
}

impl AppIntent {
    /// Check everything that does not need the cluster
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)?;

        if self.replicas < 0 {
            return Err(Error::validation_for_field(
                &self.name,
                "replicas",
                format!("must not be negative, got {}", self.replicas),
            ));
        }

        if self.image.trim().is_empty() {
            return Err(Error::validation_for_field(
                &self.name,
                "image",
                "image is required",
            ));
        }

        self.port()?;

        if self.external_access && self.domain().is_none() {
            return Err(Error::validation_for_field(
                &self.name,
                "domain_address",
                "domain_address is required when external_access is true",
            ));
        }

        for key in self.envs.keys() {
            validate_env_name(&self.name, "envs", key)?;
        }
        for (key, secret) in &self.secrets {
            validate_env_name(&self.name, "secrets", key)?;
            if self.envs.contains_key(key) {
                return Err(Error::validation_for_field(
                    &self.name,
                    "secrets",
                    format!("{} is set both as a literal env and as a secret reference", key),
                ));
            }
            validate_dns_label(secret).map_err(|e| {
                Error::validation_for_field(
                    &self.name,
                    "secrets",
                    format!("secret name for {}: {}", key, e),
                )
            })?;
        }

        Ok(())
    }

    /// Port as a u16, or a validation error
    pub fn port(&self) -> Result<u16, Error> {
        match u16::try_from(self.port) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(Error::validation_for_field(
                &self.name,
                "port",
                format!("must be between 1 and 65535, got {}", self.port),
            )),
        }
    }

    /// Trimmed domain, None when absent or blank
    pub fn domain(&self) -> Option<&str> {
        self.domain_address
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Image reference with the tag applied
    ///
    /// The tag is only appended when the image carries neither a tag nor a
    /// digest; a registry port (`host:5000/app`) is not mistaken for a tag.
    pub fn image_reference(&self) -> String {
        let image = self.image.trim();
        let tag = self
            .image_tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let last_segment = image.rsplit('/').next().unwrap_or(image);
        match tag {
            Some(tag) if !image.contains('@') && !last_segment.contains(':') => {
                format!("{}:{}", image, tag)
            }
            _ => image.to_string(),
        }
    }
}

/// Request to provision a database
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseIntent {
    /// StatefulSet and Service name; the credential Secret is `<name>-secret`
    #[serde(alias = "db_name")]
    pub name: String,
    /// `"<cpu>,<mem>"` or `"<cpu>,<mem>,<disk>"`
    pub resources: String,
    /// Expose outside the cluster
    #[serde(default)]
    pub external_access: bool,
}

impl DatabaseIntent {
    /// Check everything that does not need the cluster
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    validate_dns_label(name)
        .map_err(|e| Error::validation_for_field(name, "name", format!("invalid name: {}", e)))
}

/// Validate an RFC 1035 label (lowercase alphanumeric with hyphens).
///
/// Rules:
/// - 1 to 63 characters
/// - Must start with a lowercase letter
/// - May contain lowercase letters, digits, and hyphens
/// - Must not end with a hyphen
pub fn validate_dns_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if s.len() > MAX_NAME_LEN {
        return Err(format!(
            "name must be at most {} characters: {}",
            MAX_NAME_LEN, s
        ));
    }

    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(format!("name must start with lowercase letter: {}", s)),
    }
    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-') {
        return Err(format!(
            "name must be lowercase alphanumeric with hyphens: {}",
            s
        ));
    }
    if s.ends_with('-') {
        return Err(format!("name cannot end with hyphen: {}", s));
    }

    Ok(())
}

fn validate_env_name(resource: &str, field: &str, key: &str) -> Result<(), Error> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            resource,
            field,
            format!("invalid environment variable name '{}'", key),
        ))
    }
}
