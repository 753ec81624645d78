//! Lightweight in-process metrics (dependency-free).
//!
//! Counters and histograms are stored as atomics and rendered in Prometheus
//! text format by whoever embeds the engine.

pub mod metrics;

pub use metrics::EngineMetrics;
