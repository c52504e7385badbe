//! farm-health — probing and aggregation for the server farm.
//!
//! Provides a single-attempt HTTP probe and the fan-out operations built
//! on it: health polls, metrics polls, broadcast, and load simulation.
//!
//! # Architecture
//!
//! ```text
//! Aggregator
//!   ├── scatter() → one Probe per instance (JoinSet), merged by id
//!   │   └── Probe::get/post → ProbeOutcome { response | timeout | failed }
//!   ├── poll_health()  → HealthPoll  (ReportBuilder)
//!   ├── poll_metrics() → MetricsPoll (ReportBuilder)
//!   ├── broadcast()    → BroadcastResult
//!   └── simulate_load()
//!
//! Prometheus exposition
//!   └── render_prometheus(MetricsPoll) → text/plain
//! ```
//!
//! # Failure model
//!
//! No retries. A timed-out or refused probe is final for that call and the
//! instance is reported as unreachable. An optional fan-out deadline
//! abandons stragglers and marks the result partial.

pub mod fanout;
pub mod probe;
pub mod prometheus;
pub mod report;

pub use fanout::{Aggregator, Fanout};
pub use probe::{Probe, ProbeOutcome};
pub use prometheus::render_prometheus;
pub use report::{ReportBuilder, summarize_latencies};
