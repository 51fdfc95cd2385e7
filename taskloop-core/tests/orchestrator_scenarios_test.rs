//! Task orchestrator scenarios driven by scripted attempt runners

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::models::{AttemptOutcome, AttemptStatus};
use taskloop_core::workflow::{AttemptRunner, OrchestratorLimits, TaskOrchestrator};
use tokio::sync::Barrier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start(u64),
    End(u64),
}

/// Runner whose outcome and duration are fixed per attempt index
struct ScriptedRunner {
    succeed: Box<dyn Fn(u64) -> bool + Send + Sync>,
    delay: Box<dyn Fn(u64) -> Duration + Send + Sync>,
    /// Attempts that wait on a shared barrier before resolving
    barrier: Option<(HashSet<u64>, Arc<Barrier>)>,
    events: Mutex<Vec<Event>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedRunner {
    fn new(
        succeed: impl Fn(u64) -> bool + Send + Sync + 'static,
        delay: impl Fn(u64) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            succeed: Box::new(succeed),
            delay: Box::new(delay),
            barrier: None,
            events: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn with_barrier(mut self, indices: &[u64]) -> Self {
        let barrier = Arc::new(Barrier::new(indices.len()));
        self.barrier = Some((indices.iter().copied().collect(), barrier));
        self
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn started(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(i) => Some(i),
                Event::End(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl AttemptRunner for ScriptedRunner {
    async fn execute(&self, attempt_index: u64) -> AttemptOutcome {
        self.events.lock().unwrap().push(Event::Start(attempt_index));
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let delay = (self.delay)(attempt_index);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some((indices, barrier)) = &self.barrier {
            if indices.contains(&attempt_index) {
                barrier.wait().await;
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::End(attempt_index));

        if (self.succeed)(attempt_index) {
            AttemptOutcome::success()
        } else {
            AttemptOutcome::failed(format!("scripted failure {}", attempt_index))
        }
    }
}

#[tokio::test]
async fn test_fail_two_then_succeed_three() {
    // Attempts 4 and 5 resolve together, so reaching the target launches nothing further.
    let runner = Arc::new(
        ScriptedRunner::new(|i| (3..=5).contains(&i), |_| Duration::ZERO).with_barrier(&[4, 5]),
    );
    let limits = OrchestratorLimits::new(3, 2).with_max_attempts(10);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.attempts_launched, 5);
    assert_eq!(summary.shortfall(), 0);
    assert!(summary.peak_in_flight <= 2);

    let started = runner.started();
    assert_eq!(started.len(), 5);
    assert!(started.iter().all(|&i| i <= 5));
    assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_all_failures_exhaust_budget() {
    let runner = Arc::new(ScriptedRunner::new(|_| false, |_| Duration::ZERO));
    let limits = OrchestratorLimits::new(5, 2).with_max_attempts(5);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.attempts_launched, 5);
    assert_eq!(summary.shortfall(), 5);
    assert_eq!(summary.failure_count(), 5);
    assert!(!summary.target_met());
}

#[tokio::test(start_paused = true)]
async fn test_default_budget_terminates_when_everything_fails() {
    let runner = Arc::new(ScriptedRunner::new(
        |_| false,
        |i| Duration::from_millis(10 + (i * 7) % 30),
    ));
    let limits = OrchestratorLimits::new(4, 3);
    assert_eq!(limits.max_attempts, 12);

    let summary = TaskOrchestrator::new(runner, limits).run().await.unwrap();

    assert_eq!(summary.attempts_launched, 12);
    assert_eq!(summary.attempts.len(), 12);
    assert_eq!(summary.success_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_one_is_sequential() {
    let runner = Arc::new(ScriptedRunner::new(
        |i| i % 2 == 0,
        |i| Duration::from_millis(50 - (i * 13) % 40),
    ));
    let limits = OrchestratorLimits::new(3, 1).with_max_attempts(20);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.attempts_launched, 6);
    assert_eq!(summary.peak_in_flight, 1);

    let events = runner.events();
    let expected: Vec<Event> = (1..=6)
        .flat_map(|i| [Event::Start(i), Event::End(i)])
        .collect();
    assert_eq!(events, expected);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_limit() {
    let runner = Arc::new(ScriptedRunner::new(
        |i| i % 3 == 0,
        |i| Duration::from_millis(5 + (i * 37) % 50),
    ));
    let limits = OrchestratorLimits::new(10, 4).with_max_attempts(40);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    assert!(runner.max_running.load(Ordering::SeqCst) <= 4);
    assert!(summary.peak_in_flight <= 4);
    assert_eq!(summary.peak_in_flight, 4);
    assert!(summary.attempts_launched <= 40);
    assert!(summary.success_count >= 10);

    // Every launched attempt resolved exactly once
    let mut seen = HashSet::new();
    for record in &summary.attempts {
        assert!(seen.insert(record.index), "attempt {} resolved twice", record.index);
        assert!(record.status.is_terminal());
    }
    assert_eq!(seen.len() as u32, summary.attempts_launched);

    // Success counter matches the outcomes actually returned
    let succeeded = summary
        .attempts
        .iter()
        .filter(|r| r.status == AttemptStatus::Succeeded)
        .count() as u32;
    assert_eq!(succeeded, summary.success_count);
    assert!(summary
        .attempts
        .iter()
        .filter(|r| r.status == AttemptStatus::Succeeded)
        .all(|r| r.index % 3 == 0));
}

#[tokio::test(start_paused = true)]
async fn test_completions_out_of_index_order() {
    // Later attempts finish first. Attempt 3 resolves at 70ms and attempt 2
    // at 80ms, each freeing a slot while the target is still unmet, so 4 and
    // 5 launch and their successes count past the target.
    let runner = Arc::new(ScriptedRunner::new(
        |_| true,
        |i| Duration::from_millis(100 - i * 10),
    ));
    let limits = OrchestratorLimits::new(3, 3);

    let summary = TaskOrchestrator::new(runner, limits).run().await.unwrap();

    let order: Vec<u64> = summary.attempts.iter().map(|r| r.index).collect();
    assert_eq!(order[..3], [3, 2, 1]);
    let mut tail = order[3..].to_vec();
    tail.sort_unstable();
    assert_eq!(tail, [4, 5]);
    assert_eq!(summary.attempts_launched, 5);
    assert_eq!(summary.success_count, 5);
    assert!(summary.target_met());
}

#[tokio::test]
async fn test_in_flight_attempts_drain_after_target() {
    // Target 1 with three slots: all three start, all three are counted.
    let runner = Arc::new(ScriptedRunner::new(|_| true, |_| Duration::ZERO));
    let limits = OrchestratorLimits::new(1, 3);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.attempts_launched, 3);
    assert_eq!(summary.success_count, 3);
    assert_eq!(runner.started().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_launch_indices_increase() {
    let runner = Arc::new(ScriptedRunner::new(
        |i| i > 4,
        |i| Duration::from_millis((i * 17) % 23),
    ));
    let limits = OrchestratorLimits::new(2, 3).with_max_attempts(10);

    let summary = TaskOrchestrator::new(runner.clone(), limits)
        .run()
        .await
        .unwrap();

    let started = runner.started();
    assert!(started.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(started.len() as u32, summary.attempts_launched);

    let durations: HashMap<u64, Option<u64>> = summary
        .attempts
        .iter()
        .map(|r| (r.index, r.duration_ms))
        .collect();
    assert_eq!(durations.len(), started.len());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_run_aborts_in_flight_attempts() {
    let runner = Arc::new(ScriptedRunner::new(|_| true, |_| Duration::from_millis(100)));
    let orchestrator = TaskOrchestrator::new(runner.clone(), OrchestratorLimits::new(2, 2));

    let cut_short = tokio::time::timeout(Duration::from_millis(10), orchestrator.run()).await;
    assert!(cut_short.is_err());
    assert_eq!(runner.started(), [1, 2]);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(runner
        .events()
        .iter()
        .all(|e| matches!(e, Event::Start(_))));
}
