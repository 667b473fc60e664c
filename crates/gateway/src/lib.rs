//! Gateway: thin JSON-over-HTTP front end over the plugin registry.
//!
//! Routes:
//! - `GET  /drivers` lists registered drivers
//! - `POST /drivers/mount` and `POST /drivers/unmount` forward to the
//!   owning plugin
//! - `GET  /health` and `GET /metrics` for operators
//!
//! The registry is read on every request; a snapshot swap by the syncer
//! never interrupts a call that already resolved its plugin.

pub mod drivers;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
pub mod metrics_routes;
pub mod server;
pub mod state;

pub use {
    error::{ApiError, Error, Result},
    server::{AppState, build_gateway_app, start_gateway},
    state::GatewayState,
};
