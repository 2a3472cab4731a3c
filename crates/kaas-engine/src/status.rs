//! Status aggregation for deployed apps

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use kaas_common::kube_utils::label_selector;
use kaas_common::metrics::record_status_lookup_failure;
use kaas_common::{Error, PlatformConfig};
use kaas_workload::k8s::{Deployment, HasApiResource};
use kaas_workload::{AllStatus, StatusRecord};

use crate::client::OrchestratorClient;

/// Message on records of Deployments without `matchLabels`
pub const NO_SELECTOR_MSG: &str = "deployment has no matchLabels selector; instances not listed";

/// Reads Deployments and their Pods back into status records
pub struct StatusAggregator<'a> {
    client: &'a dyn OrchestratorClient,
    namespace: &'a str,
    concurrency: usize,
}

impl<'a> StatusAggregator<'a> {
    /// Create an aggregator over the configured namespace
    pub fn new(client: &'a dyn OrchestratorClient, config: &'a PlatformConfig) -> Self {
        Self {
            client,
            namespace: &config.namespace,
            concurrency: config.status_concurrency.max(1),
        }
    }

    /// Status of one app
    ///
    /// Replica counts are the Deployment's own; they can disagree with the
    /// instance list while the controller catches up.
    #[instrument(skip(self))]
    pub async fn app_status(&self, name: &str) -> Result<StatusRecord, Error> {
        let deployment = self
            .client
            .get_deployment(name)
            .await?
            .ok_or_else(|| Error::not_found(Deployment::KIND, name))?;
        self.record(&deployment).await
    }

    /// Status of every app, one record per Deployment in listing order
    ///
    /// At most `status_concurrency` lookups run at once. A failed lookup
    /// yields a record carrying the error instead of failing the whole
    /// listing; a failed listing fails the call.
    #[instrument(skip(self))]
    pub async fn all_status(&self) -> Result<AllStatus, Error> {
        let deployments = self.client.list_deployments().await?;
        debug!(
            count = deployments.len(),
            concurrency = self.concurrency,
            "collecting app status"
        );

        let names: Vec<String> = deployments.iter().map(|d| d.metadata.name.clone()).collect();
        let apps: Vec<StatusRecord> = stream::iter(names)
            .map(|name| async move {
                let result = self.app_status(&name).await;
                (name, result)
            })
            .buffered(self.concurrency)
            .map(|(name, result)| match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(app = %name, error = %e, "status lookup failed");
                    record_status_lookup_failure();
                    StatusRecord::failed(&name, self.namespace, e.to_string())
                }
            })
            .collect()
            .await;

        Ok(AllStatus { apps })
    }

    async fn record(&self, deployment: &Deployment) -> Result<StatusRecord, Error> {
        let labels = &deployment.spec.selector.match_labels;
        if labels.is_empty() {
            // An empty selector would match every pod in the namespace
            warn!(app = %deployment.metadata.name, "deployment has no pod selector");
            return Ok(StatusRecord {
                err_msg: Some(NO_SELECTOR_MSG.to_string()),
                ..StatusRecord::from_deployment(deployment, &[])
            });
        }
        let pods = self.client.list_pods(&label_selector(labels)).await?;
        Ok(StatusRecord::from_deployment(deployment, &pods))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockOrchestratorClient;
    use crate::memory::InMemoryOrchestrator;
    use kaas_workload::k8s::{ObjectMeta, Pod, PodStatus};
    use serde_json::json;

    fn config() -> PlatformConfig {
        PlatformConfig::new("apps", "kaas-ingress")
    }

    fn deployment(name: &str, replicas: i32) -> Deployment {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "apps"},
            "spec": {"replicas": replicas, "selector": {"matchLabels": {"app": name}}}
        }))
        .unwrap()
    }

    fn running_pod(app: &str, idx: usize) -> Pod {
        let mut metadata = ObjectMeta::default().with_label("app", app);
        metadata.name = format!("{}-{}", app, idx);
        Pod {
            metadata,
            status: PodStatus {
                phase: Some("Running".to_string()),
                host_ip: Some("10.0.0.1".to_string()),
                pod_ip: Some(format!("10.1.0.{}", idx)),
                start_time: None,
            },
        }
    }

    // =========================================================================
    // Story: a healthy app reports every replica
    // =========================================================================

    #[tokio::test]
    async fn story_healthy_app_reports_ready_replicas_and_instances() {
        let fake = InMemoryOrchestrator::new("apps");
        fake.create_deployment(&deployment("web", 2)).await.unwrap();
        fake.set_ready_replicas("web", 2);
        fake.add_pod(running_pod("web", 1));
        fake.add_pod(running_pod("web", 2));
        fake.add_pod(running_pod("api", 1));

        let config = config();
        let record = StatusAggregator::new(&fake, &config)
            .app_status("web")
            .await
            .unwrap();

        assert_eq!(record.deployment_name, "web");
        assert_eq!(record.replicas, 2);
        assert_eq!(record.ready_replicas, 2);
        assert_eq!(record.pod_statuses.len(), 2);
        assert!(record.pod_statuses.iter().all(|p| !p.phase.is_empty()));
        assert!(fake.calls().contains(&"list Pod/app=web".to_string()));
    }

    #[tokio::test]
    async fn unknown_app_is_not_found() {
        let fake = InMemoryOrchestrator::new("apps");
        let config = config();
        let err = StatusAggregator::new(&fake, &config)
            .app_status("ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    // =========================================================================
    // Story: one failing app does not hide or duplicate the others
    // =========================================================================

    #[tokio::test]
    async fn story_listing_has_exactly_one_record_per_app() {
        let fake = InMemoryOrchestrator::new("apps");
        fake.create_deployment(&deployment("api", 1)).await.unwrap();
        fake.create_deployment(&deployment("web", 1)).await.unwrap();
        fake.set_ready_replicas("web", 1);
        fake.add_pod(running_pod("web", 1));
        // The lookup for "api" runs first and hits the injected failure
        fake.fail_next("get", "Deployment", Some(500), "etcd timeout");

        let config = config();
        let all = StatusAggregator::new(&fake, &config)
            .all_status()
            .await
            .unwrap();

        let names: Vec<_> = all
            .apps
            .iter()
            .map(|r| r.deployment_name.as_str())
            .collect();
        assert_eq!(names, vec!["api", "web"]);

        let api = &all.apps[0];
        assert!(api.is_error());
        assert!(api.err_msg.as_deref().unwrap().contains("etcd timeout"));
        assert_eq!(api.namespace, "apps");

        let web = &all.apps[1];
        assert!(!web.is_error());
        assert_eq!(web.ready_replicas, 1);
        assert_eq!(web.pod_statuses.len(), 1);
    }

    #[tokio::test]
    async fn failed_listing_fails_the_call() {
        let mut client = MockOrchestratorClient::new();
        client.expect_list_deployments().times(1).returning(|| {
            Err(Error::upstream("list", "Deployment", "apps", Some(403), "forbidden"))
        });
        client.expect_get_deployment().never();

        let config = config();
        let err = StatusAggregator::new(&client, &config)
            .all_status()
            .await
            .unwrap_err();
        assert_eq!(err.upstream_code(), Some(403));
    }

    #[tokio::test]
    async fn empty_namespace_lists_no_apps() {
        let fake = InMemoryOrchestrator::new("apps");
        let config = config();
        let all = StatusAggregator::new(&fake, &config)
            .all_status()
            .await
            .unwrap();
        assert!(all.apps.is_empty());
    }

    // =========================================================================
    // Story: a Deployment without matchLabels does not claim every pod
    // =========================================================================

    #[tokio::test]
    async fn story_empty_selector_reports_an_error_instead_of_all_pods() {
        let fake = InMemoryOrchestrator::new("apps");
        let bare: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "legacy", "namespace": "apps"},
            "spec": {"replicas": 1}
        }))
        .unwrap();
        fake.create_deployment(&bare).await.unwrap();
        fake.create_deployment(&deployment("web", 1)).await.unwrap();
        fake.add_pod(running_pod("web", 1));
        fake.add_pod(running_pod("api", 1));

        let config = PlatformConfig {
            status_concurrency: 1,
            ..config()
        };
        let all = StatusAggregator::new(&fake, &config)
            .all_status()
            .await
            .unwrap();

        assert_eq!(all.apps.len(), 2);
        let legacy = &all.apps[0];
        assert_eq!(legacy.deployment_name, "legacy");
        assert_eq!(legacy.err_msg.as_deref(), Some(NO_SELECTOR_MSG));
        assert!(legacy.pod_statuses.is_empty());
        assert_eq!(legacy.replicas, 1);

        assert_eq!(all.apps[1].deployment_name, "web");
        assert_eq!(all.apps[1].pod_statuses.len(), 1);

        let pod_lists: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("list Pod/"))
            .collect();
        assert_eq!(pod_lists, vec!["list Pod/app=web".to_string()]);
    }
}
