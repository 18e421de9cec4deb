//! HTTP API
//!
//! # Endpoints
//!
//! ## Health
//! - `GET /health` - Liveness check
//!
//! ## Research (`/api`)
//! - `POST /api/research` - Run a research query to completion
//! - `GET /api/sessions` - List in-flight and failed runs
//! - `GET /api/sessions/{id}` - Stage of one run
//! - `DELETE /api/sessions/{id}` - Cancel a run
//! - `GET /api/reports` - Recent reports (`?limit=`)
//! - `GET /api/reports/{id}` - A stored report
//! - `GET /api/openapi.json` - OpenAPI document
//!
//! # Authentication
//!
//! When `server.api_key_env` names a set variable, `/api` routes require:
//! ```text
//! Authorization: Bearer <key>
//! ```

/// Optional bearer key middleware.
pub mod auth;
/// Request handlers.
pub mod handlers;
/// Router configuration.
pub mod routes;

pub use routes::create_router;
