//! Metrics collection and export for volbroker.
//!
//! All instrumentation goes through the `metrics` facade. With the
//! `prometheus` feature the recorder renders the Prometheus text format for
//! the `/metrics` route; without it every macro is a no-op.
//!
//! ```rust,ignore
//! use volbroker_metrics::{counter, discovery};
//!
//! counter!(discovery::CYCLES_TOTAL, "result" => "ok").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{Error, MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
