//! Status views returned by the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::k8s::{Deployment, Pod};

/// One running (or pending) instance of an app
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceStatus {
    /// Pod name
    pub name: String,
    /// Pod phase; empty when the kubelet has not reported one
    pub phase: String,
    /// Node address
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    /// Pod address
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    /// Time the pod started
    #[serde(
        rename = "startTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<Utc>>,
}

impl From<&Pod> for InstanceStatus {
    fn from(pod: &Pod) -> Self {
        let status = &pod.status;
        Self {
            name: pod.metadata.name.clone(),
            phase: status.phase.clone().unwrap_or_default(),
            host_ip: status.host_ip.clone().unwrap_or_default(),
            pod_ip: status.pod_ip.clone().unwrap_or_default(),
            start_time: status.start_time,
        }
    }
}

/// Status of one app
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    /// Deployment name
    pub deployment_name: String,
    /// Namespace
    pub namespace: String,
    /// Declared replicas (Deployment spec)
    pub replicas: i32,
    /// Ready replicas (Deployment status); may lag behind `pod_statuses`
    pub ready_replicas: i32,
    /// Instances matched by the Deployment's selector
    #[serde(default)]
    pub pod_statuses: Vec<InstanceStatus>,
    /// Why the lookup failed, for entries of a listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

impl StatusRecord {
    /// Fold a Deployment and its pods into a record
    ///
    /// Counts come from the Deployment, not from the pod list.
    pub fn from_deployment(deployment: &Deployment, pods: &[Pod]) -> Self {
        Self {
            deployment_name: deployment.metadata.name.clone(),
            namespace: deployment.metadata.namespace.clone(),
            replicas: deployment.spec.replicas,
            ready_replicas: deployment
                .status
                .as_ref()
                .map(|s| s.ready_replicas)
                .unwrap_or(0),
            pod_statuses: pods.iter().map(InstanceStatus::from).collect(),
            err_msg: None,
        }
    }

    /// Record for a workload whose lookup failed
    pub fn failed(
        name: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            deployment_name: name.into(),
            namespace: namespace.into(),
            err_msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// True when this record carries a lookup failure
    pub fn is_error(&self) -> bool {
        self.err_msg.is_some()
    }
}

/// Status of every app in the namespace, in listing order
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AllStatus {
    /// One record per Deployment
    pub apps: Vec<StatusRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{DeploymentStatus, ObjectMeta, PodStatus};
    use serde_json::json;

    fn deployment(replicas: i32, ready: Option<i32>) -> Deployment {
        serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {"replicas": replicas}
        }))
        .map(|mut d: Deployment| {
            d.status = ready.map(|r| DeploymentStatus {
                ready_replicas: r,
                ..Default::default()
            });
            d
        })
        .unwrap()
    }

    fn pod(name: &str, phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "apps".to_string(),
                ..Default::default()
            },
            status: PodStatus {
                phase: phase.map(str::to_string),
                host_ip: Some("10.0.0.1".to_string()),
                pod_ip: None,
                start_time: None,
            },
        }
    }

    #[test]
    fn counts_come_from_the_deployment() {
        let pods = vec![pod("web-1", Some("Running"))];
        let record = StatusRecord::from_deployment(&deployment(3, Some(2)), &pods);
        assert_eq!(record.deployment_name, "web");
        assert_eq!(record.namespace, "apps");
        assert_eq!(record.replicas, 3);
        assert_eq!(record.ready_replicas, 2);
        assert_eq!(record.pod_statuses.len(), 1);
        assert!(!record.is_error());
    }

    #[test]
    fn missing_status_means_zero_ready() {
        let record = StatusRecord::from_deployment(&deployment(2, None), &[]);
        assert_eq!(record.ready_replicas, 0);
        assert!(record.pod_statuses.is_empty());
    }

    #[test]
    fn missing_pod_fields_become_empty_strings() {
        let status = InstanceStatus::from(&pod("web-1", None));
        assert_eq!(status.phase, "");
        assert_eq!(status.pod_ip, "");
        assert_eq!(status.host_ip, "10.0.0.1");
    }

    #[test]
    fn wire_names_match_the_public_api() {
        let record = StatusRecord {
            deployment_name: "web".into(),
            namespace: "apps".into(),
            replicas: 1,
            ready_replicas: 1,
            pod_statuses: vec![InstanceStatus::from(&pod("web-1", Some("Running")))],
            err_msg: None,
        };
        let value = serde_json::to_value(AllStatus { apps: vec![record] }).unwrap();
        assert_eq!(
            value,
            json!({"apps": [{
                "deployment_name": "web",
                "namespace": "apps",
                "replicas": 1,
                "ready_replicas": 1,
                "pod_statuses": [{
                    "name": "web-1", "phase": "Running", "hostIP": "10.0.0.1", "podIP": ""
                }]
            }]})
        );
    }

    #[test]
    fn failed_record_carries_message() {
        let record = StatusRecord::failed("web", "apps", "failed to list Pod app=web: timeout");
        assert!(record.is_error());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["err_msg"], "failed to list Pod app=web: timeout");
        assert_eq!(value["replicas"], 0);
    }
}
