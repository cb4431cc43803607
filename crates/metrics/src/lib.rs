//! Metrics collection and export for courier.
//!
//! All crates record through the `metrics` facade macros re-exported here,
//! behind their own optional `metrics` feature. When the `prometheus` feature
//! is enabled the binary installs a Prometheus recorder and can render a
//! text snapshot; otherwise every record call is a no-op.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, connector, labels};
//!
//! counter!(connector::RECONNECTS_TOTAL, labels::CHANNEL => "telegram").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
