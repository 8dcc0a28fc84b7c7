//! HTTP request handlers for the verify gateway.

pub mod callback;
pub mod health;
pub mod metrics;
pub mod verify;

pub use callback::oidc_callback;
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use verify::verify;
