//! Intent model and workload compilation for KaaS
//!
//! Turns an [`AppIntent`] or [`DatabaseIntent`] into the Kubernetes objects
//! that realize it. Compilation is pure: no API calls happen here, so every
//! validation failure surfaces before anything is submitted.
//!
//! # Usage
//!
//! ```rust,ignore
//! let compiler = WorkloadCompiler::new(&config);
//! let compiled = compiler.compile_app(&intent)?;
//! client.create_deployment(&compiled.deployment).await?;
//! ```

pub mod compiler;
pub mod intent;
pub mod k8s;
pub mod resources;
pub mod status;

pub use compiler::{CompiledApp, CompiledDatabase, RouteRule, WorkloadCompiler};
pub use intent::{AppIntent, DatabaseIntent};
pub use resources::ResourceSpec;
pub use status::{AllStatus, InstanceStatus, StatusRecord};
