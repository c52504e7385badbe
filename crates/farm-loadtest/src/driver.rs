//! Load-test execution.
//!
//! A test is split into lanes, each bounded by its own semaphore. Under the
//! global policy a single lane walks every target round-robin, so at most
//! `concurrency` requests are in flight for the whole test. Under the
//! per-target policy each target gets its own lane and cap.
//!
//! Attempts report back over a channel. The collector stops on completion,
//! caller cancellation or the optional `max_duration`; stopping early aborts
//! the lanes, which drops their in-flight requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use farm_core::{
    ConcurrencyPolicy, FarmError, FarmResult, Instance, LoadTestResult, TargetResult,
};
use farm_health::Probe;
use farm_health::report::{round2, summarize_latencies};

/// Every attempt is a GET against the instance root.
const TARGET_PATH: &str = "/";

/// What to run: targets in order, attempts per target and the cap.
#[derive(Debug, Clone)]
pub struct LoadTestPlan {
    pub targets: Vec<Instance>,
    /// Attempts per target.
    pub requests: u32,
    pub concurrency: u32,
    pub policy: ConcurrencyPolicy,
    /// Stop after this long and report what completed.
    pub max_duration: Option<Duration>,
}

impl LoadTestPlan {
    pub fn planned_requests(&self) -> u64 {
        self.requests as u64 * self.targets.len() as u64
    }
}

/// Runs load tests with a fixed per-request timeout.
#[derive(Debug, Clone, Copy)]
pub struct LoadTester {
    timeout: Duration,
    max_requests_per_target: u32,
}

impl LoadTester {
    pub fn new(timeout: Duration, max_requests_per_target: u32) -> Self {
        Self {
            timeout,
            max_requests_per_target,
        }
    }

    /// Reject a plan that cannot run. Called by [`run`](Self::run) before
    /// any request is sent.
    pub fn validate(&self, plan: &LoadTestPlan) -> FarmResult<()> {
        if plan.concurrency == 0 {
            return Err(FarmError::InvalidInput(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if plan.requests > self.max_requests_per_target {
            return Err(FarmError::InvalidInput(format!(
                "requests must be at most {} per target, got {}",
                self.max_requests_per_target, plan.requests
            )));
        }
        if plan.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(FarmError::InvalidInput(
                "duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Run `plan` to completion, or until `cancel` flips to `true` or
    /// `plan.max_duration` elapses; the result is then marked partial.
    pub async fn run(
        &self,
        plan: LoadTestPlan,
        cancel: watch::Receiver<bool>,
    ) -> FarmResult<LoadTestResult> {
        self.validate(&plan)?;

        let planned = plan.planned_requests();
        info!(
            targets = plan.targets.len(),
            requests = plan.requests,
            concurrency = plan.concurrency,
            policy = ?plan.policy,
            planned,
            "load test starting"
        );

        let probe = Probe::new(self.timeout);
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut lanes = JoinSet::new();
        for lane in lanes_for(&plan) {
            lanes.spawn(drive_lane(lane, probe, tx.clone()));
        }
        drop(tx);

        let mut tally = Tally::new(plan.targets.len());
        let stop = collect(&mut rx, &mut tally, cancel, plan.max_duration).await;

        lanes.abort_all();
        // Attempts that finished before the lanes were torn down.
        while let Ok(attempt) = rx.try_recv() {
            tally.record(attempt);
        }

        let partial = stop != Stop::Completed;
        if partial {
            warn!(
                reason = ?stop,
                completed = tally.successful + tally.failed,
                planned,
                "load test stopped early"
            );
        }

        let result = tally.finish(&plan, started, partial);
        info!(
            total = result.total_requests,
            successful = result.successful,
            failed = result.failed,
            duration_secs = result.duration_secs,
            throughput = result.throughput,
            partial,
            "load test complete"
        );
        Ok(result)
    }
}

// ── Lanes ─────────────────────────────────────────────────────────

/// One semaphore-bounded stream of attempts.
struct Lane {
    /// (index into the plan's targets, address)
    targets: Vec<(usize, String)>,
    rounds: u32,
    concurrency: usize,
}

fn lanes_for(plan: &LoadTestPlan) -> Vec<Lane> {
    let concurrency = plan.concurrency as usize;
    let targets: Vec<(usize, String)> = plan
        .targets
        .iter()
        .enumerate()
        .map(|(i, t)| (i, t.address.clone()))
        .collect();

    match plan.policy {
        ConcurrencyPolicy::Global => vec![Lane {
            targets,
            rounds: plan.requests,
            concurrency,
        }],
        ConcurrencyPolicy::PerTarget => targets
            .into_iter()
            .map(|t| Lane {
                targets: vec![t],
                rounds: plan.requests,
                concurrency,
            })
            .collect(),
    }
}

#[derive(Debug)]
struct Attempt {
    target: usize,
    success: bool,
    latency: Duration,
    finished: Instant,
}

async fn drive_lane(lane: Lane, probe: Probe, tx: mpsc::UnboundedSender<Attempt>) {
    let semaphore = Arc::new(Semaphore::new(lane.concurrency));
    let mut in_flight = JoinSet::new();

    for _ in 0..lane.rounds {
        for (target, address) in &lane.targets {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            // Reap finished attempts so the set stays near the cap.
            while in_flight.try_join_next().is_some() {}

            let target = *target;
            let address = address.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                let outcome = probe.get(&address, TARGET_PATH).await;
                drop(permit);
                let _ = tx.send(Attempt {
                    target,
                    success: outcome.is_success(),
                    latency: outcome.latency(),
                    finished: Instant::now(),
                });
            });
        }
    }

    while in_flight.join_next().await.is_some() {}
    debug!(targets = lane.targets.len(), "lane drained");
}

// ── Collection ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Completed,
    Cancelled,
    DeadlineReached,
}

async fn collect(
    rx: &mut mpsc::UnboundedReceiver<Attempt>,
    tally: &mut Tally,
    cancel: watch::Receiver<bool>,
    max_duration: Option<Duration>,
) -> Stop {
    let deadline = async {
        match max_duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let cancelled = cancelled(cancel);
    tokio::pin!(cancelled);

    loop {
        tokio::select! {
            attempt = rx.recv() => match attempt {
                Some(attempt) => tally.record(attempt),
                None => return Stop::Completed,
            },
            _ = &mut cancelled => return Stop::Cancelled,
            _ = &mut deadline => return Stop::DeadlineReached,
        }
    }
}

/// Resolves once the flag reads `true`. A dropped sender never cancels.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Default, Clone)]
struct TargetTally {
    successful: u64,
    failed: u64,
    latency_us: u128,
    last_finished: Option<Instant>,
}

#[derive(Debug)]
struct Tally {
    per_target: Vec<TargetTally>,
    /// Latencies of successful attempts, microseconds.
    latencies_us: Vec<u64>,
    successful: u64,
    failed: u64,
}

impl Tally {
    fn new(targets: usize) -> Self {
        Self {
            per_target: vec![TargetTally::default(); targets],
            latencies_us: Vec::new(),
            successful: 0,
            failed: 0,
        }
    }

    fn record(&mut self, attempt: Attempt) {
        let Some(t) = self.per_target.get_mut(attempt.target) else {
            return;
        };
        if attempt.success {
            let us = attempt.latency.as_micros() as u64;
            t.successful += 1;
            t.latency_us += us as u128;
            self.latencies_us.push(us);
            self.successful += 1;
        } else {
            t.failed += 1;
            self.failed += 1;
        }
        t.last_finished = Some(match t.last_finished {
            Some(prev) => prev.max(attempt.finished),
            None => attempt.finished,
        });
    }

    fn finish(self, plan: &LoadTestPlan, started: Instant, partial: bool) -> LoadTestResult {
        let elapsed = started.elapsed().as_secs_f64();
        let total = self.successful + self.failed;

        let per_target = plan
            .targets
            .iter()
            .zip(&self.per_target)
            .map(|(instance, t)| {
                let requests = t.successful + t.failed;
                let secs = t
                    .last_finished
                    .map(|f| f.duration_since(started).as_secs_f64())
                    .unwrap_or_default();
                TargetResult {
                    instance_id: instance.id,
                    requests,
                    successful: t.successful,
                    failed: t.failed,
                    average_latency_ms: if t.successful > 0 {
                        round2(t.latency_us as f64 / t.successful as f64 / 1000.0)
                    } else {
                        0.0
                    },
                    duration_secs: round2(secs),
                    requests_per_second: per_second(requests, secs),
                }
            })
            .collect();

        LoadTestResult {
            target_instances: plan.targets.iter().map(|t| t.id).collect(),
            requests_per_target: plan.requests,
            concurrency: plan.concurrency,
            policy: plan.policy,
            planned_requests: plan.planned_requests(),
            total_requests: total,
            successful: self.successful,
            failed: self.failed,
            latency: summarize_latencies(&self.latencies_us),
            duration_secs: round2(elapsed),
            throughput: per_second(total, elapsed),
            partial,
            per_target,
        }
    }
}

fn per_second(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        round2(count as f64 / secs)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instance(id: u32, address: &str) -> Instance {
        Instance {
            id,
            name: farm_core::container_name(id),
            host: "127.0.0.1".to_string(),
            port: 0,
            address: address.to_string(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    async fn closed_port() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    /// Root handler that sleeps and records the peak number of overlapping calls.
    async fn gauged(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let peak_out = peak.clone();
        let addr = serve(Router::new().route(
            "/",
            get(move || {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        ))
        .await;
        (addr, peak_out)
    }

    fn plan(targets: Vec<Instance>, requests: u32, concurrency: u32) -> LoadTestPlan {
        LoadTestPlan {
            targets,
            requests,
            concurrency,
            policy: ConcurrencyPolicy::Global,
            max_duration: None,
        }
    }

    fn tester() -> LoadTester {
        LoadTester::new(Duration::from_secs(5), 1000)
    }

    #[tokio::test]
    async fn completes_every_attempt() {
        let addr = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let (_tx, rx) = watch::channel(false);

        let result = tester()
            .run(
                plan(vec![instance(1, &addr), instance(2, &addr)], 50, 10),
                rx,
            )
            .await
            .unwrap();

        assert_eq!(result.planned_requests, 100);
        assert_eq!(result.total_requests, 100);
        assert_eq!(result.successful, 100);
        assert_eq!(result.failed, 0);
        assert!(!result.partial);
        assert!(result.throughput > 0.0);
        assert_eq!(result.target_instances, vec![1, 2]);
        assert_eq!(result.per_target.len(), 2);
        assert!(result.per_target.iter().all(|t| t.requests == 50));
        assert!(result.latency.p99_ms >= result.latency.p50_ms);
        assert!(result.latency.max_ms >= result.latency.min_ms);
    }

    #[tokio::test]
    async fn single_target_hundred_requests() {
        let addr = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let (_tx, rx) = watch::channel(false);

        let result = tester()
            .run(plan(vec![instance(1, &addr)], 100, 10), rx)
            .await
            .unwrap();

        assert_eq!(result.total_requests, 100);
        assert_eq!(result.successful, 100);
        assert_eq!(result.failed, 0);
        assert!(!result.partial);
        assert_eq!(result.per_target[0].requests, 100);
    }

    #[tokio::test]
    async fn zero_requests_complete_empty() {
        let (addr, peak) = gauged(Duration::from_millis(1)).await;
        let (_tx, rx) = watch::channel(false);

        let result = tester()
            .run(plan(vec![instance(1, &addr)], 0, 1), rx)
            .await
            .unwrap();

        assert_eq!(result.planned_requests, 0);
        assert_eq!(result.total_requests, 0);
        assert_eq!(result.successful + result.failed, 0);
        assert!(!result.partial);
        assert_eq!(result.latency, farm_core::LatencySummary::default());
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let failing = serve(Router::new().route(
            "/",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let down = closed_port().await;
        let (_tx, rx) = watch::channel(false);

        let result = tester()
            .run(plan(vec![instance(1, &failing), instance(2, &down)], 5, 2), rx)
            .await
            .unwrap();

        assert_eq!(result.total_requests, 10);
        assert_eq!(result.successful, 0);
        assert_eq!(result.failed, 10);
        assert_eq!(result.latency.average_ms, 0.0);
        assert_eq!(result.per_target[0].average_latency_ms, 0.0);
        assert!(!result.partial);
    }

    #[tokio::test]
    async fn global_cap_bounds_in_flight_requests() {
        let (addr, peak) = gauged(Duration::from_millis(20)).await;
        let (_tx, rx) = watch::channel(false);
        let targets = vec![instance(1, &addr), instance(2, &addr), instance(3, &addr)];

        let result = tester().run(plan(targets, 10, 4), rx).await.unwrap();

        assert_eq!(result.successful, 30);
        assert!(peak.load(Ordering::SeqCst) <= 4, "peak {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn per_target_policy_caps_each_target() {
        let (addr, peak) = gauged(Duration::from_millis(50)).await;
        let (_tx, rx) = watch::channel(false);
        let mut p = plan(
            vec![instance(1, &addr), instance(2, &addr), instance(3, &addr)],
            10,
            2,
        );
        p.policy = ConcurrencyPolicy::PerTarget;

        let result = tester().run(p, rx).await.unwrap();

        assert_eq!(result.successful, 30);
        assert_eq!(result.policy, ConcurrencyPolicy::PerTarget);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 6, "peak {peak}");
        assert!(peak > 2, "per-target lanes should overlap, peak {peak}");
    }

    #[tokio::test]
    async fn cancellation_returns_partial_counts() {
        let (addr, _) = gauged(Duration::from_millis(100)).await;
        let (tx, rx) = watch::channel(false);
        let p = plan(vec![instance(1, &addr)], 100, 2);

        let handle = tokio::spawn(async move { tester().run(p, rx).await });
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap().unwrap();
        assert!(result.partial);
        assert!(result.total_requests < result.planned_requests);
        assert_eq!(result.successful + result.failed, result.total_requests);
    }

    #[tokio::test]
    async fn max_duration_cuts_the_test_short() {
        let (addr, _) = gauged(Duration::from_millis(100)).await;
        let (_tx, rx) = watch::channel(false);
        let mut p = plan(vec![instance(1, &addr)], 100, 1);
        p.max_duration = Some(Duration::from_millis(300));

        let started = Instant::now();
        let result = tester().run(p, rx).await.unwrap();

        assert!(result.partial);
        assert!(result.total_requests < 100);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn dropped_cancel_sender_does_not_cancel() {
        let addr = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let result = tester().run(plan(vec![instance(1, &addr)], 5, 1), rx).await.unwrap();
        assert!(!result.partial);
        assert_eq!(result.successful, 5);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        let t = tester();
        let target = vec![instance(1, "127.0.0.1:1")];

        let err = t.validate(&plan(target.clone(), 10, 0)).unwrap_err();
        assert!(matches!(err, FarmError::InvalidInput(_)));
        assert!(t.validate(&plan(target.clone(), 0, 1)).is_ok());
        assert!(t.validate(&plan(target.clone(), 1001, 1)).is_err());
        assert!(t.validate(&plan(target.clone(), 1000, 1)).is_ok());

        let mut p = plan(target, 1, 1);
        p.max_duration = Some(Duration::ZERO);
        assert!(t.validate(&p).is_err());
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() {
        let (addr, peak) = gauged(Duration::from_millis(1)).await;
        let (_tx, rx) = watch::channel(false);
        let err = tester()
            .run(plan(vec![instance(1, &addr)], 10, 0), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, FarmError::InvalidInput(_)));
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }
}
