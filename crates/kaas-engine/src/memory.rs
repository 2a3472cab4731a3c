//! In-memory orchestrator for tests
//!
//! Behaves like the API server where the engine depends on it: creates are
//! unique per (kind, name) and answer 409 otherwise, updates carrying a stale
//! resourceVersion answer 409, and Pods are listed by label selector. Every
//! call is recorded, and one-shot failures can be injected per operation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use kaas_common::Error;
use kaas_workload::k8s::{
    Deployment, HasApiResource, Ingress, KubeObject, ObjectMeta, Pod, Secret, Service, StatefulSet,
};

use crate::client::OrchestratorClient;

type Mutation = Box<dyn FnOnce(&mut Value) + Send>;

struct Failure {
    op: String,
    kind: String,
    code: Option<u16>,
    message: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(&'static str, String), Value>,
    version: u64,
    failures: Vec<Failure>,
    concurrent_writes: Vec<(&'static str, Mutation)>,
    calls: Vec<String>,
}

impl State {
    /// Record the call and fire a matching injected failure
    fn check(&mut self, op: &str, kind: &str, name: &str) -> Result<(), Error> {
        self.calls.push(format!("{} {}/{}", op, kind, name));
        match self
            .failures
            .iter()
            .position(|f| f.op == op && f.kind == kind)
        {
            Some(idx) => {
                let failure = self.failures.remove(idx);
                Err(Error::upstream(
                    op,
                    kind,
                    name,
                    failure.code,
                    failure.message,
                ))
            }
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// [`OrchestratorClient`] holding objects in process memory
pub struct InMemoryOrchestrator {
    namespace: String,
    state: Mutex<State>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new("default")
    }
}

impl InMemoryOrchestrator {
    /// Create an empty orchestrator for one namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `op` ("get", "list", "create", "update") on `kind` fail
    pub fn fail_next(
        &self,
        op: impl Into<String>,
        kind: impl Into<String>,
        code: Option<u16>,
        message: impl Into<String>,
    ) {
        self.state().failures.push(Failure {
            op: op.into(),
            kind: kind.into(),
            code,
            message: message.into(),
        });
    }

    /// Simulate another writer changing an object of type `T` between the
    /// next read and the next update of that kind
    ///
    /// The mutation is applied to the stored object and its resourceVersion
    /// is bumped, so the pending update arrives with a stale version.
    pub fn write_concurrently<T, F>(&self, mutate: F)
    where
        T: HasApiResource,
        F: FnOnce(&mut Value) + Send + 'static,
    {
        self.state()
            .concurrent_writes
            .push((T::KIND, Box::new(mutate)));
    }

    /// Add a Pod, as the controllers would after a Deployment is created
    pub fn add_pod(&self, mut pod: Pod) {
        pod.metadata.namespace = self.namespace.clone();
        if let Ok(value) = serde_json::to_value(&pod) {
            let name = pod.metadata.name.clone();
            self.state().objects.insert((Pod::KIND, name), value);
        }
    }

    /// Report readiness on a Deployment, as its controller would
    pub fn set_ready_replicas(&self, name: &str, ready: i32) {
        let mut state = self.state();
        if let Some(value) = state.objects.get_mut(&(Deployment::KIND, name.to_string())) {
            let replicas = value
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "status".to_string(),
                    serde_json::json!({
                        "replicas": replicas,
                        "readyReplicas": ready,
                        "availableReplicas": ready,
                    }),
                );
            }
        }
    }

    /// Stored object of type `T`, including Secret data
    pub fn object<T: HasApiResource + DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.state()
            .objects
            .get(&(T::KIND, name.to_string()))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Names of every stored object of type `T`, sorted
    pub fn names<T: HasApiResource>(&self) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(kind, _)| *kind == T::KIND)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Every call made so far, as "op Kind/name"
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn get_typed<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: HasApiResource + DeserializeOwned,
    {
        let mut state = self.state();
        state.check("get", T::KIND, name)?;
        state
            .objects
            .get(&(T::KIND, name.to_string()))
            .map(|v| decode::<T>(v.clone()))
            .transpose()
    }

    fn list_typed<T>(&self, selector: Option<&str>) -> Result<Vec<T>, Error>
    where
        T: HasApiResource + DeserializeOwned,
    {
        let mut state = self.state();
        state.check("list", T::KIND, selector.unwrap_or(&self.namespace))?;
        let wanted = selector.map(parse_selector).unwrap_or_default();
        state
            .objects
            .iter()
            .filter(|((kind, _), _)| *kind == T::KIND)
            .filter(|(_, value)| labels_match(value, &wanted))
            .map(|(_, value)| decode::<T>(value.clone()))
            .collect()
    }

    fn create_typed<T>(&self, obj: &T) -> Result<T, Error>
    where
        T: HasApiResource + KubeObject + Serialize + DeserializeOwned,
    {
        let name = obj.metadata().name.clone();
        let mut state = self.state();
        state.check("create", T::KIND, &name)?;

        let key = (T::KIND, name.clone());
        if state.objects.contains_key(&key) {
            return Err(Error::upstream(
                "create",
                T::KIND,
                &name,
                Some(409),
                format!("{} \"{}\" already exists", T::PLURAL, name),
            ));
        }

        let mut value = encode(obj)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("status");
        }
        let version = state.next_version();
        set_metadata(&mut value, "resourceVersion", version);
        set_metadata(&mut value, "namespace", self.namespace.clone());
        state.objects.insert(key, value.clone());
        decode(value)
    }

    fn update_typed<T>(&self, obj: &T) -> Result<T, Error>
    where
        T: HasApiResource + KubeObject + Serialize + DeserializeOwned,
    {
        let name = obj.metadata().name.clone();
        let mut guard = self.state();
        guard.check("update", T::KIND, &name)?;
        let state = &mut *guard;

        let key = (T::KIND, name.clone());
        let Some(current) = state.objects.get_mut(&key) else {
            return Err(Error::upstream(
                "update",
                T::KIND,
                &name,
                Some(404),
                format!("{} \"{}\" not found", T::PLURAL, name),
            ));
        };

        if let Some(idx) = state
            .concurrent_writes
            .iter()
            .position(|(kind, _)| *kind == T::KIND)
        {
            let (_, mutate) = state.concurrent_writes.remove(idx);
            mutate(current);
            state.version += 1;
            set_metadata(current, "resourceVersion", state.version.to_string());
        }

        let stored_version = current
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(sent) = &obj.metadata().resource_version {
            if stored_version.as_deref() != Some(sent.as_str()) {
                return Err(Error::upstream(
                    "update",
                    T::KIND,
                    &name,
                    Some(409),
                    "the object has been modified; please apply your changes to the latest version and try again",
                ));
            }
        }

        let status = current.get("status").cloned();
        let mut value = encode(obj)?;
        if let Some(obj) = value.as_object_mut() {
            match status {
                Some(status) => obj.insert("status".to_string(), status),
                None => obj.remove("status"),
            };
        }
        state.version += 1;
        set_metadata(&mut value, "resourceVersion", state.version.to_string());
        set_metadata(&mut value, "namespace", self.namespace.clone());
        *current = value.clone();
        decode(value)
    }
}

fn encode<T: HasApiResource + Serialize>(obj: &T) -> Result<Value, Error> {
    serde_json::to_value(obj).map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}

fn decode<T: HasApiResource + DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}

fn set_metadata(value: &mut Value, key: &str, field: String) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(key.to_string(), Value::String(field));
    }
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn labels_match(value: &Value, wanted: &[(String, String)]) -> bool {
    let labels = value.pointer("/metadata/labels");
    wanted.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            .is_some_and(|actual| actual == v)
    })
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, Error> {
        self.get_typed(name)
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, Error> {
        self.list_typed(None)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        self.create_typed(deployment)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        self.update_typed(deployment)
    }

    async fn get_stateful_set(&self, name: &str) -> Result<Option<StatefulSet>, Error> {
        self.get_typed(name)
    }

    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>, Error> {
        self.list_typed(None)
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error> {
        self.create_typed(stateful_set)
    }

    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, Error> {
        self.update_typed(stateful_set)
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, Error> {
        self.get_typed(name)
    }

    async fn list_services(&self) -> Result<Vec<Service>, Error> {
        self.list_typed(None)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        self.create_typed(service)
    }

    async fn update_service(&self, service: &Service) -> Result<Service, Error> {
        self.update_typed(service)
    }

    async fn get_ingress(&self, name: &str) -> Result<Option<Ingress>, Error> {
        self.get_typed(name)
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>, Error> {
        self.list_typed(None)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.create_typed(ingress)
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.update_typed(ingress)
    }

    async fn get_secret(&self, name: &str) -> Result<Option<ObjectMeta>, Error> {
        self.get_typed::<Secret>(name)
            .map(|secret| secret.map(|s| s.metadata))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.create_typed(secret).map(|_| ())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, Error> {
        self.list_typed(Some(selector))
    }
}
