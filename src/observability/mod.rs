//! Observability: Prometheus metrics.
//!
//! ```rust
//! use request_tracker::observability::Metrics;
//!
//! let metrics = Metrics::new().unwrap();
//! metrics.record_request(200, 0.05, None);
//! assert!(metrics.export().contains("request_tracker_http_requests_total"));
//! ```

pub mod metrics;

pub use metrics::Metrics;
