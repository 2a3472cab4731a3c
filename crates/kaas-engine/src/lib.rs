//! Orchestration engine for KaaS
//!
//! [`Engine`] turns app and database intents into objects in one namespace
//! and reads app status back. All orchestrator access goes through
//! [`OrchestratorClient`]; [`KubeOrchestrator`] is the production
//! implementation and [`memory::InMemoryOrchestrator`] (tests and the
//! `testing` feature) stands in for it.

#![deny(missing_docs)]

pub mod client;
pub mod credentials;
pub mod engine;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod routing;
pub mod status;

pub use client::{KubeOrchestrator, OrchestratorClient};
pub use credentials::{CredentialIssuer, CredentialRef, Credentials};
pub use engine::{DeployReceipt, Engine};
pub use routing::RoutingAccumulator;
pub use status::StatusAggregator;
