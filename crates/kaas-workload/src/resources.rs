//! Parsing of the compact `"<cpu>,<mem>,<disk>"` resource string

use kaas_common::quantity::Quantity;
use kaas_common::Error;

use crate::k8s::{ResourceList, ResourceRequirements};

const FIELD: &str = "resources";

/// Parsed resource string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    /// CPU cores or millicores
    pub cpu: Quantity,
    /// Memory
    pub memory: Quantity,
    /// Ephemeral storage for apps, volume size for databases
    pub disk: Option<Quantity>,
}

impl ResourceSpec {
    /// Parse an app's resource string; all three tokens are required
    pub fn parse_app(resource: &str, raw: &str) -> Result<Self, Error> {
        Self::parse(resource, raw, 3..=3)
    }

    /// Parse a database's resource string; the disk token is optional
    pub fn parse_database(resource: &str, raw: &str) -> Result<Self, Error> {
        Self::parse(resource, raw, 2..=3)
    }

    fn parse(
        resource: &str,
        raw: &str,
        expected: std::ops::RangeInclusive<usize>,
    ) -> Result<Self, Error> {
        let tokens: Vec<&str> = raw.split(',').map(str::trim).collect();
        if !expected.contains(&tokens.len()) {
            let want = if expected.start() == expected.end() {
                expected.start().to_string()
            } else {
                format!("{} to {}", expected.start(), expected.end())
            };
            return Err(Error::validation_for_field(
                resource,
                FIELD,
                format!(
                    "expected {} comma-separated tokens (cpu,memory,disk), got {} in '{}'",
                    want,
                    tokens.len(),
                    raw
                ),
            ));
        }

        let invalid = |e: String| Error::validation_for_field(resource, FIELD, e);
        let cpu = Quantity::cpu(tokens[0]).map_err(invalid)?;
        let memory = Quantity::bytes(tokens[1]).map_err(invalid)?;
        let disk = tokens
            .get(2)
            .map(|t| Quantity::bytes(t))
            .transpose()
            .map_err(invalid)?;

        Ok(Self { cpu, memory, disk })
    }

    /// Requests and limits for a container, identical so the pod gets no burst headroom
    ///
    /// `disk_key` names the resource the disk token maps to; pass None to
    /// leave disk out (databases size a volume instead).
    pub fn requirements(&self, disk_key: Option<&str>) -> ResourceRequirements {
        let mut list = ResourceList::new();
        list.insert("cpu".to_string(), self.cpu.to_string());
        list.insert("memory".to_string(), self.memory.to_string());
        if let (Some(key), Some(disk)) = (disk_key, &self.disk) {
            list.insert(key.to_string(), disk.to_string());
        }
        ResourceRequirements {
            requests: list.clone(),
            limits: list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_spec_needs_exactly_three_tokens() {
        let spec = ResourceSpec::parse_app("web", "500m,128Mi,1Gi").unwrap();
        assert_eq!(spec.cpu.as_str(), "500m");
        assert_eq!(spec.memory.as_str(), "128Mi");
        assert_eq!(spec.disk.as_ref().map(|d| d.as_str()), Some("1Gi"));

        for raw in ["500m,128Mi", "500m,128Mi,1Gi,2Gi", "", "500m"] {
            let err = ResourceSpec::parse_app("web", raw).unwrap_err();
            match err {
                Error::Validation { field, message, .. } => {
                    assert_eq!(field.as_deref(), Some("resources"));
                    assert!(message.contains("expected 3"), "{}", message);
                }
                other => panic!("expected Validation, got {other:?}"),
            }
        }
    }

    #[test]
    fn database_spec_accepts_two_or_three_tokens() {
        let spec = ResourceSpec::parse_database("orders", "1,2Gi").unwrap();
        assert!(spec.disk.is_none());
        let spec = ResourceSpec::parse_database("orders", "1, 2Gi, 10Gi").unwrap();
        assert_eq!(spec.disk.unwrap().as_str(), "10Gi");

        let err = ResourceSpec::parse_database("orders", "1").unwrap_err();
        assert!(err.to_string().contains("2 to 3"));
    }

    #[test]
    fn unparsable_tokens_are_validation_errors() {
        for raw in ["lots,128Mi,1Gi", "500m,big,1Gi", "500m,128Mi,", "500m,,1Gi"] {
            assert!(
                matches!(
                    ResourceSpec::parse_app("web", raw),
                    Err(Error::Validation { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn requests_equal_limits_for_every_dimension() {
        let spec = ResourceSpec::parse_app("web", "250m,64Mi,512Mi").unwrap();
        let req = spec.requirements(Some("ephemeral-storage"));
        assert_eq!(req.requests, req.limits);
        assert_eq!(req.requests.get("cpu").map(String::as_str), Some("250m"));
        assert_eq!(req.requests.get("memory").map(String::as_str), Some("64Mi"));
        assert_eq!(
            req.requests.get("ephemeral-storage").map(String::as_str),
            Some("512Mi")
        );

        let req = spec.requirements(None);
        assert_eq!(req.requests.len(), 2);
    }
}
