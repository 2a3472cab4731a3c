//! The orchestration engine
//!
//! Each call is a single synchronous pass against the orchestrator: compile,
//! check the name is free, submit objects in order. Nothing is rolled back
//! or retried; a failure after the first submission reports what was left
//! behind. There is no reconciliation loop, so objects changed or deleted
//! out of band stay that way.

use std::sync::Arc;

use tracing::{error, info, instrument};

use kaas_common::metrics::{DeployTimer, WorkloadKind};
use kaas_common::{Error, PlatformConfig};
use kaas_workload::k8s::{Deployment, HasApiResource, KubeObject, Secret};
use kaas_workload::{AllStatus, AppIntent, DatabaseIntent, StatusRecord, WorkloadCompiler};

use crate::client::OrchestratorClient;
use crate::credentials::{CredentialIssuer, CredentialRef};
use crate::routing::RoutingAccumulator;
use crate::status::StatusAggregator;

/// Objects created by a deploy, for the caller and for partial-failure reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeployReceipt {
    /// Name of the app or database
    pub name: String,
    /// Created objects as "Kind/name", in creation order
    pub created: Vec<String>,
}

impl DeployReceipt {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created: Vec::new(),
        }
    }

    fn record<T: HasApiResource + KubeObject>(&mut self, obj: &T) {
        self.created
            .push(format!("{}/{}", T::KIND, obj.metadata().name));
    }

    /// Wrap `e` as a partial failure if anything was already created
    fn fail(&self, step: &str, e: Error) -> Error {
        if self.created.is_empty() {
            e
        } else {
            Error::partial_failure(&self.name, self.created.clone(), step, e)
        }
    }
}

/// Deploys intents and reports status against one namespace
///
/// Holds no mutable state; share it behind an `Arc` across requests.
pub struct Engine {
    client: Arc<dyn OrchestratorClient>,
    config: PlatformConfig,
}

impl Engine {
    /// Create an engine over an orchestrator client and immutable configuration
    pub fn new(client: Arc<dyn OrchestratorClient>, config: PlatformConfig) -> Self {
        Self { client, config }
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Deploy a stateless app: Deployment, Service, then a route if external
    #[instrument(skip(self, intent), fields(app = %intent.name, namespace = %self.config.namespace))]
    pub async fn deploy_app(&self, intent: &AppIntent) -> Result<DeployReceipt, Error> {
        let timer = DeployTimer::start(WorkloadKind::App);
        let result = self.submit_app(intent).await;
        timer.finish(&result);
        result
    }

    async fn submit_app(&self, intent: &AppIntent) -> Result<DeployReceipt, Error> {
        let compiled = WorkloadCompiler::new(&self.config).compile_app(intent)?;
        let name = intent.name.as_str();

        if self.client.get_deployment(name).await?.is_some() {
            return Err(Error::conflict(Deployment::KIND, name));
        }

        let mut receipt = DeployReceipt::new(name);

        self.client.create_deployment(&compiled.deployment).await?;
        receipt.record(&compiled.deployment);

        if let Err(e) = self.client.create_service(&compiled.service).await {
            error!(error = %e, "service creation failed, deployment left in place");
            return Err(receipt.fail("create Service", e));
        }
        receipt.record(&compiled.service);

        if let Some(route) = &compiled.route {
            let routing = RoutingAccumulator::new(self.client.as_ref(), &self.config);
            if let Err(e) = routing.append(route).await {
                error!(error = %e, "route append failed, deployment and service left in place");
                return Err(receipt.fail("update Ingress", e));
            }
        }

        info!(
            replicas = intent.replicas,
            routed = compiled.route.is_some(),
            "app deployed"
        );
        Ok(receipt)
    }

    /// Deploy a database: credential Secret, StatefulSet, then Service
    #[instrument(skip(self, intent), fields(database = %intent.name, namespace = %self.config.namespace))]
    pub async fn deploy_database(&self, intent: &DatabaseIntent) -> Result<DeployReceipt, Error> {
        let timer = DeployTimer::start(WorkloadKind::Database);
        let result = self.submit_database(intent).await;
        timer.finish(&result);
        result
    }

    async fn submit_database(&self, intent: &DatabaseIntent) -> Result<DeployReceipt, Error> {
        let compiled = WorkloadCompiler::new(&self.config).compile_database(intent)?;
        let name = intent.name.as_str();

        if self.client.get_secret(&compiled.secret_name).await?.is_some() {
            return Err(Error::conflict(Secret::KIND, &compiled.secret_name));
        }

        let mut receipt = DeployReceipt::new(name);

        let issuer = CredentialIssuer::new(
            self.client.as_ref(),
            &self.config.namespace,
            self.config.database.port,
        );
        let credentials: CredentialRef = issuer.issue(name).await?;
        receipt
            .created
            .push(format!("{}/{}", Secret::KIND, credentials.secret_name));

        if let Err(e) = self
            .client
            .create_stateful_set(&compiled.stateful_set)
            .await
        {
            error!(error = %e, "statefulset creation failed, secret left in place");
            return Err(receipt.fail("create StatefulSet", e));
        }
        receipt.record(&compiled.stateful_set);

        if let Err(e) = self.client.create_service(&compiled.service).await {
            error!(error = %e, "service creation failed, secret and statefulset left in place");
            return Err(receipt.fail("create Service", e));
        }
        receipt.record(&compiled.service);

        info!(
            replicas = compiled.stateful_set.spec.replicas,
            secret = %credentials.secret_name,
            "database deployed"
        );
        Ok(receipt)
    }

    /// Status of one app
    pub async fn app_status(&self, name: &str) -> Result<StatusRecord, Error> {
        self.status().app_status(name).await
    }

    /// Status of every app in the namespace
    pub async fn all_status(&self) -> Result<AllStatus, Error> {
        self.status().all_status().await
    }

    fn status(&self) -> StatusAggregator<'_> {
        StatusAggregator::new(self.client.as_ref(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockOrchestratorClient;
    use crate::memory::InMemoryOrchestrator;
    use kaas_workload::k8s::{Ingress, Service, StatefulSet};

    fn config() -> PlatformConfig {
        PlatformConfig::new("apps", "kaas-ingress")
    }

    fn web() -> AppIntent {
        AppIntent {
            name: "web".to_string(),
            replicas: 2,
            image: "nginx".to_string(),
            image_tag: Some("latest".to_string()),
            port: 80,
            resources: "500m,128Mi,1Gi".to_string(),
            ..Default::default()
        }
    }

    fn external(name: &str) -> AppIntent {
        AppIntent {
            name: name.to_string(),
            external_access: true,
            domain_address: Some(format!("{}.example.com", name)),
            ..web()
        }
    }

    fn orders() -> DatabaseIntent {
        DatabaseIntent {
            name: "orders".to_string(),
            resources: "1,2Gi".to_string(),
            external_access: false,
        }
    }

    fn engine_with(fake: &Arc<InMemoryOrchestrator>) -> Engine {
        Engine::new(fake.clone(), config())
    }

    #[test]
    fn engine_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    // =========================================================================
    // Story: invalid intents never reach the orchestrator
    // =========================================================================

    #[tokio::test]
    async fn story_bad_resource_spec_makes_zero_calls() {
        // A mock with no expectations panics on any call
        let engine = Engine::new(Arc::new(MockOrchestratorClient::new()), config());

        let intent = AppIntent {
            resources: "500m,128Mi".to_string(),
            ..web()
        };
        let err = engine.deploy_app(&intent).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let db = DatabaseIntent {
            resources: "1".to_string(),
            ..orders()
        };
        let err = engine.deploy_database(&db).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    // =========================================================================
    // Story: deploying an app, then deploying it again
    // =========================================================================

    #[tokio::test]
    async fn story_second_deploy_of_same_name_conflicts() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        let engine = engine_with(&fake);

        let receipt = engine.deploy_app(&web()).await.unwrap();
        assert_eq!(receipt.created, vec!["Deployment/web", "Service/web"]);

        let err = engine.deploy_app(&web()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(err.to_string(), "Deployment web already exists");
        assert_eq!(fake.names::<Deployment>(), vec!["web"]);

        let record = engine.app_status("web").await.unwrap();
        assert_eq!(record.deployment_name, "web");
        assert_eq!(record.replicas, 2);
        assert!(record.ready_replicas <= 2);
    }

    #[tokio::test]
    async fn race_loser_sees_orchestrator_conflict() {
        let mut client = MockOrchestratorClient::new();
        client.expect_get_deployment().returning(|_| Ok(None));
        client.expect_create_deployment().times(1).returning(|d| {
            Err(Error::upstream(
                "create",
                "Deployment",
                &d.metadata.name,
                Some(409),
                "already exists",
            ))
        });
        client.expect_create_service().never();

        let engine = Engine::new(Arc::new(client), config());
        let err = engine.deploy_app(&web()).await.unwrap_err();
        assert!(err.is_orchestrator_conflict());
        assert!(!matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn internal_app_creates_no_ingress() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        engine_with(&fake).deploy_app(&web()).await.unwrap();
        assert!(fake.names::<Ingress>().is_empty());
    }

    // =========================================================================
    // Story: two external apps share one Ingress
    // =========================================================================

    #[tokio::test]
    async fn story_external_apps_accumulate_on_the_shared_ingress() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        let engine = engine_with(&fake);

        engine.deploy_app(&external("shop")).await.unwrap();
        engine.deploy_app(&external("blog")).await.unwrap();

        let ingress: Ingress = fake.object("kaas-ingress").unwrap();
        let routed: Vec<_> = ingress
            .spec
            .rules
            .iter()
            .map(|r| {
                (
                    r.host.clone().unwrap_or_default(),
                    r.backend_services().collect::<Vec<_>>().join(","),
                )
            })
            .collect();
        assert_eq!(
            routed,
            vec![
                ("shop.example.com".to_string(), "shop".to_string()),
                ("blog.example.com".to_string(), "blog".to_string()),
            ]
        );

        let svc: Service = fake.object("shop").unwrap();
        assert_eq!(svc.spec.type_.as_deref(), Some("NodePort"));
    }

    #[tokio::test]
    async fn failed_service_leaves_deployment_in_place() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        fake.fail_next("create", "Service", Some(500), "etcd timeout");

        let err = engine_with(&fake).deploy_app(&web()).await.unwrap_err();
        match &err {
            Error::PartialFailure {
                resource,
                created,
                step,
                ..
            } => {
                assert_eq!(resource, "web");
                assert_eq!(created, &vec!["Deployment/web".to_string()]);
                assert_eq!(step, "create Service");
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
        assert_eq!(fake.names::<Deployment>(), vec!["web"]);
        assert!(fake.names::<Service>().is_empty());
    }

    #[tokio::test]
    async fn failed_route_reports_both_created_objects() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        fake.fail_next("create", "Ingress", Some(403), "forbidden");

        let err = engine_with(&fake)
            .deploy_app(&external("shop"))
            .await
            .unwrap_err();
        match err {
            Error::PartialFailure { created, step, .. } => {
                assert_eq!(created, vec!["Deployment/shop", "Service/shop"]);
                assert_eq!(step, "update Ingress");
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_existence_check_is_plain_upstream_error() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        fake.fail_next("get", "Deployment", None, "connection refused");
        let err = engine_with(&fake).deploy_app(&web()).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(fake.names::<Deployment>().is_empty());
    }

    // =========================================================================
    // Story: a database gets credentials, a StatefulSet and a Service
    // =========================================================================

    #[tokio::test]
    async fn story_database_deploy_creates_secret_first() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        let engine = engine_with(&fake);

        let receipt = engine.deploy_database(&orders()).await.unwrap();
        assert_eq!(
            receipt.created,
            vec!["Secret/orders-secret", "StatefulSet/orders", "Service/orders"]
        );

        let secret: Secret = fake.object("orders-secret").unwrap();
        assert_eq!(secret.string_data["password"].len(), 32);
        assert!(secret.string_data["username"].starts_with("user-"));

        let creates: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create"))
            .collect();
        assert_eq!(
            creates,
            vec![
                "create Secret/orders-secret",
                "create StatefulSet/orders",
                "create Service/orders"
            ]
        );

        let err = engine.deploy_database(&orders()).await.unwrap_err();
        assert_eq!(err.to_string(), "Secret orders-secret already exists");
    }

    #[tokio::test]
    async fn two_databases_get_different_passwords() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        let engine = engine_with(&fake);
        engine.deploy_database(&orders()).await.unwrap();
        engine
            .deploy_database(&DatabaseIntent {
                name: "users".to_string(),
                ..orders()
            })
            .await
            .unwrap();

        let a: Secret = fake.object("orders-secret").unwrap();
        let b: Secret = fake.object("users-secret").unwrap();
        assert_ne!(a.string_data["password"], b.string_data["password"]);
    }

    #[tokio::test]
    async fn failed_statefulset_leaves_secret_behind() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        fake.fail_next("create", "StatefulSet", Some(422), "invalid");

        let err = engine_with(&fake)
            .deploy_database(&orders())
            .await
            .unwrap_err();
        match err {
            Error::PartialFailure { created, step, .. } => {
                assert_eq!(created, vec!["Secret/orders-secret"]);
                assert_eq!(step, "create StatefulSet");
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
        assert_eq!(fake.names::<Secret>(), vec!["orders-secret"]);
    }

    #[tokio::test]
    async fn failed_secret_creation_is_not_partial() {
        let fake = Arc::new(InMemoryOrchestrator::new("apps"));
        fake.fail_next("create", "Secret", Some(403), "forbidden");
        let err = engine_with(&fake)
            .deploy_database(&orders())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(fake.names::<StatefulSet>().is_empty());
    }
}
