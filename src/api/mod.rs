//! HTTP API for the solver.
//!
//! ## Endpoints
//!
//! - `GET /healthz` - Liveness and uptime
//! - `POST /solve` - Start solving a task chain in the background

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
