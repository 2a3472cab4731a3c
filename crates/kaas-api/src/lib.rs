//! HTTP API for KaaS
//!
//! Routes:
//! - `POST /api/apps/` deploy an app
//! - `GET /api/apps/` status of every app
//! - `GET /api/apps/{name}` status of one app
//! - `POST /api/dbs/` deploy a database
//! - `GET /healthz` liveness

#![deny(missing_docs)]

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{Error, Result};
pub use server::{router, start_server, AppState};
