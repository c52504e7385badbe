//! farm-loadtest — synthetic traffic against a subset of the farm.
//!
//! ```text
//! LoadTester::run(plan, cancel)
//!   ├── Lane (global: one for all targets │ per_target: one per target)
//!   │     Semaphore(concurrency) ─→ attempt: GET / ─→ mpsc
//!   └── collector ─ select! { attempt, cancel, max_duration }
//!         └── LoadTestResult { totals, latency, throughput, per_target, partial }
//! ```
//!
//! Failures never stop a test. Cancellation stops collection at once,
//! aborts the requests still in flight and returns what was counted so far.

pub mod driver;

pub use driver::{LoadTestPlan, LoadTester};
