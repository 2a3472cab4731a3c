//! Orchestrator client abstraction
//!
//! Every call is scoped to the one namespace the engine manages and keyed by
//! object name. The engine only sees [`OrchestratorClient`]; the kube-backed
//! implementation talks to the API server through the dynamic API so the
//! slim object types in `kaas_workload::k8s` are the only schema involved.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kaas_common::Error;
use kaas_workload::k8s::{
    Deployment, HasApiResource, Ingress, KubeObject, ObjectMeta, Pod, Secret, Service, StatefulSet,
};

/// Namespace-scoped access to the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Get a Deployment by name; None when it does not exist
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, Error>;
    /// List every Deployment in the namespace
    async fn list_deployments(&self) -> Result<Vec<Deployment>, Error>;
    /// Create a Deployment; the orchestrator answers 409 when the name is taken
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;
    /// Replace a Deployment, conditional on its carried resourceVersion
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Get a StatefulSet by name
    async fn get_stateful_set(&self, name: &str) -> Result<Option<StatefulSet>, Error>;
    /// List every StatefulSet in the namespace
    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>, Error>;
    /// Create a StatefulSet
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error>;
    /// Replace a StatefulSet
    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error>;

    /// Get a Service by name
    async fn get_service(&self, name: &str) -> Result<Option<Service>, Error>;
    /// List every Service in the namespace
    async fn list_services(&self) -> Result<Vec<Service>, Error>;
    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<Service, Error>;
    /// Replace a Service
    async fn update_service(&self, service: &Service) -> Result<Service, Error>;

    /// Get an Ingress by name
    async fn get_ingress(&self, name: &str) -> Result<Option<Ingress>, Error>;
    /// List every Ingress in the namespace
    async fn list_ingresses(&self) -> Result<Vec<Ingress>, Error>;
    /// Create an Ingress
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error>;
    /// Replace an Ingress; 409 when the carried resourceVersion is stale
    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error>;

    /// Metadata of a Secret, never its data
    async fn get_secret(&self, name: &str) -> Result<Option<ObjectMeta>, Error>;
    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// List Pods matching an equality-based label selector
    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, Error>;
}

/// [`OrchestratorClient`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
}

impl KubeOrchestrator {
    /// Create a client scoped to `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<T: HasApiResource>(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &T::api_resource())
    }

    async fn get<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: HasApiResource + DeserializeOwned,
    {
        match self.api::<T>().get(name).await {
            Ok(obj) => from_dynamic::<T>(obj).map(Some),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube("get", T::KIND, name, e)),
        }
    }

    async fn list<T>(&self, selector: Option<&str>) -> Result<Vec<T>, Error>
    where
        T: HasApiResource + DeserializeOwned,
    {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let list = self.api::<T>().list(&params).await.map_err(|e| {
            Error::from_kube("list", T::KIND, selector.unwrap_or(&self.namespace), e)
        })?;
        list.items.into_iter().map(from_dynamic::<T>).collect()
    }

    async fn create<T>(&self, obj: &T) -> Result<T, Error>
    where
        T: HasApiResource + KubeObject + Serialize + DeserializeOwned,
    {
        let name = obj.metadata().name.as_str();
        let dynamic = to_dynamic(obj)?;
        let created = self
            .api::<T>()
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| Error::from_kube("create", T::KIND, name, e))?;
        debug!(kind = T::KIND, name = %name, namespace = %self.namespace, "created");
        from_dynamic(created)
    }

    /// PUT the whole object; the API server rejects it with 409 when the
    /// carried resourceVersion no longer matches
    async fn replace<T>(&self, obj: &T) -> Result<T, Error>
    where
        T: HasApiResource + KubeObject + Serialize + DeserializeOwned,
    {
        let name = obj.metadata().name.as_str();
        let dynamic = to_dynamic(obj)?;
        let replaced = self
            .api::<T>()
            .replace(name, &PostParams::default(), &dynamic)
            .await
            .map_err(|e| Error::from_kube("update", T::KIND, name, e))?;
        debug!(kind = T::KIND, name = %name, namespace = %self.namespace, "replaced");
        from_dynamic(replaced)
    }
}

fn to_dynamic<T: HasApiResource + Serialize>(obj: &T) -> Result<DynamicObject, Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}

fn from_dynamic<T: HasApiResource + DeserializeOwned>(obj: DynamicObject) -> Result<T, Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}

#[async_trait]
impl OrchestratorClient for KubeOrchestrator {
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, Error> {
        self.get(name).await
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, Error> {
        self.list(None).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        self.create(deployment).await
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        self.replace(deployment).await
    }

    async fn get_stateful_set(&self, name: &str) -> Result<Option<StatefulSet>, Error> {
        self.get(name).await
    }

    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>, Error> {
        self.list(None).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error> {
        self.create(stateful_set).await
    }

    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error> {
        self.replace(stateful_set).await
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, Error> {
        self.get(name).await
    }

    async fn list_services(&self) -> Result<Vec<Service>, Error> {
        self.list(None).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        self.create(service).await
    }

    async fn update_service(&self, service: &Service) -> Result<Service, Error> {
        self.replace(service).await
    }

    async fn get_ingress(&self, name: &str) -> Result<Option<Ingress>, Error> {
        self.get(name).await
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>, Error> {
        self.list(None).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.create(ingress).await
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.replace(ingress).await
    }

    async fn get_secret(&self, name: &str) -> Result<Option<ObjectMeta>, Error> {
        match self.api::<Secret>().get_metadata(name).await {
            Ok(partial) => serde_json::to_value(&partial.metadata)
                .and_then(serde_json::from_value)
                .map(Some)
                .map_err(|e| Error::serialization_for_kind(Secret::KIND, e.to_string())),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube("get", Secret::KIND, name, e)),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.create(secret).await.map(|_: Secret| ())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, Error> {
        self.list(Some(selector)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dynamic_conversion_keeps_type_meta_and_version() {
        let ingress: Ingress = serde_json::from_value(json!({
            "metadata": {"name": "kaas-ingress", "namespace": "apps", "resourceVersion": "7"},
            "spec": {"rules": [{"host": "a.example.com"}]}
        }))
        .unwrap();

        let dynamic = to_dynamic(&ingress).unwrap();
        let types = dynamic.types.clone().unwrap();
        assert_eq!(types.api_version, "networking.k8s.io/v1");
        assert_eq!(types.kind, "Ingress");
        assert_eq!(dynamic.metadata.resource_version.as_deref(), Some("7"));

        let back: Ingress = from_dynamic(dynamic).unwrap();
        assert_eq!(back, ingress);
    }

    #[test]
    fn list_items_without_type_meta_convert() {
        let dynamic: DynamicObject = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {"replicas": 1}
        }))
        .unwrap();
        let deployment: Deployment = from_dynamic(dynamic).unwrap();
        assert_eq!(deployment.kind, "Deployment");
        assert_eq!(deployment.spec.replicas, 1);
    }
}
