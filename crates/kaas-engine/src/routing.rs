//! Host rules on the shared per-namespace Ingress
//!
//! Every external app adds one rule to the same Ingress. The Ingress is
//! created lazily with a placeholder rule, and each append is a
//! read-modify-write whose update carries the resourceVersion from the read,
//! so two concurrent appenders cannot silently drop each other's rule: the
//! loser gets a 409 and goes round again.
//!
//! The Ingress may also be managed by other tools (TLS, a default backend).
//! Only `spec.rules` is touched; everything else is written back as read.

use serde_json::Map;
use tracing::{debug, info, instrument, warn};

use kaas_common::metrics::record_routing_conflict;
use kaas_common::{Error, PlatformConfig};
use kaas_workload::k8s::{
    HasApiResource, HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressSpec, ObjectMeta,
};
use kaas_workload::RouteRule;

use crate::client::OrchestratorClient;

/// Backend of the rule the Ingress is created with
pub const PLACEHOLDER_SERVICE: &str = "kaas-placeholder";
/// Port of the placeholder backend
pub const PLACEHOLDER_PORT: u16 = 80;

/// Appends host rules to the shared Ingress
pub struct RoutingAccumulator<'a> {
    client: &'a dyn OrchestratorClient,
    config: &'a PlatformConfig,
}

impl<'a> RoutingAccumulator<'a> {
    /// Create an accumulator for the configured Ingress
    pub fn new(client: &'a dyn OrchestratorClient, config: &'a PlatformConfig) -> Self {
        Self { client, config }
    }

    /// Append `route`, retrying on version conflicts
    ///
    /// Returns the Ingress as written.
    #[instrument(skip(self), fields(ingress = %self.config.ingress_name, host = %route.host))]
    pub async fn append(&self, route: &RouteRule) -> Result<Ingress, Error> {
        let attempts = self.config.routing_max_attempts.max(1);
        for attempt in 1..=attempts {
            let mut ingress = self.ensure().await?;
            add_rule(&mut ingress, route);

            match self.client.update_ingress(&ingress).await {
                Ok(written) => {
                    info!(
                        service = %route.service,
                        port = route.port,
                        rules = written.spec.rules.len(),
                        "route added"
                    );
                    return Ok(written);
                }
                Err(e) if e.is_orchestrator_conflict() => {
                    record_routing_conflict(&self.config.ingress_name);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        "ingress changed since it was read, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::upstream(
            "update",
            Ingress::KIND,
            &self.config.ingress_name,
            Some(409),
            format!(
                "gave up adding route for {} after {} conflicting attempts",
                route.host, attempts
            ),
        ))
    }

    /// Read the shared Ingress, creating it if absent
    async fn ensure(&self) -> Result<Ingress, Error> {
        let name = self.config.ingress_name.as_str();
        if let Some(existing) = self.client.get_ingress(name).await? {
            return Ok(existing);
        }

        match self.client.create_ingress(&self.placeholder()).await {
            Ok(created) => {
                info!(ingress = %name, "created shared ingress");
                Ok(created)
            }
            Err(e) if e.is_orchestrator_conflict() => {
                debug!(ingress = %name, "ingress created concurrently, reading it");
                self.client
                    .get_ingress(name)
                    .await?
                    .ok_or_else(|| Error::not_found(Ingress::KIND, name))
            }
            Err(e) => Err(e),
        }
    }

    fn placeholder(&self) -> Ingress {
        Ingress {
            api_version: Ingress::API_VERSION.to_string(),
            kind: Ingress::KIND.to_string(),
            metadata: ObjectMeta::new(&self.config.ingress_name, &self.config.namespace),
            spec: IngressSpec {
                ingress_class_name: self.config.ingress_class.clone(),
                rules: vec![placeholder_rule()],
                extra: Map::new(),
            },
        }
    }
}

fn placeholder_rule() -> IngressRule {
    IngressRule {
        host: None,
        http: Some(HttpIngressRuleValue {
            paths: vec![HttpIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend::service(PLACEHOLDER_SERVICE, PLACEHOLDER_PORT),
            }],
        }),
        extra: Map::new(),
    }
}

fn is_placeholder(rule: &IngressRule) -> bool {
    rule.host.is_none() && rule.backend_services().any(|svc| svc == PLACEHOLDER_SERVICE)
}

/// Drop the placeholder and append `route` after the existing rules
fn add_rule(ingress: &mut Ingress, route: &RouteRule) {
    ingress.spec.rules.retain(|rule| !is_placeholder(rule));
    ingress
        .spec
        .rules
        .push(IngressRule::prefix(&route.host, &route.service, route.port));
}
