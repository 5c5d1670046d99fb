//! Shared utilities.

pub mod callback;
pub mod clock;
pub mod telemetry;

pub use callback::{CallbackHub, SubscriptionId};
pub use clock::now_ms;
pub use telemetry::init_tracing;
