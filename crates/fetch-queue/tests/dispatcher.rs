// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Behaviour of the dispatcher as seen by callers

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use api_client::CodedError;
use fetch_queue::{
    Disposition, FetchError, FetchQueue, Job, JobKind, JobState, MemoryRateLimitStore, QueueConfig,
    QueueOptions, from_fn,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Balances,
    Collectibles,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Balances => f.write_str("balances"),
            Kind::Collectibles => f.write_str("collectiblesMetadata"),
        }
    }
}

impl JobKind for Kind {
    fn all() -> &'static [Self] {
        &[Kind::Balances, Kind::Collectibles]
    }
}

#[derive(Debug, Clone)]
struct WalletJob {
    kind: Kind,
    wallet: String,
    chain: u64,
}

impl WalletJob {
    fn balances(wallet: &str, chain: u64) -> Self {
        Self {
            kind: Kind::Balances,
            wallet: wallet.to_string(),
            chain,
        }
    }

    fn collectibles(wallet: &str, chain: u64) -> Self {
        Self {
            kind: Kind::Collectibles,
            wallet: wallet.to_string(),
            chain,
        }
    }
}

impl Job for WalletJob {
    type Kind = Kind;
    type Output = String;

    fn kind(&self) -> Kind {
        self.kind
    }

    fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.wallet.to_lowercase(), self.chain)
    }

    fn validate(&self) -> Result<(), String> {
        if self.wallet.is_empty() {
            Err("wallet is required".to_string())
        } else {
            Ok(())
        }
    }
}

fn config(limit: f64, options: QueueOptions) -> QueueConfig<Kind> {
    QueueConfig::new(
        "covalent",
        [(Kind::Balances, 10.0), (Kind::Collectibles, 11.0)],
        limit,
        Duration::from_secs(1),
    )
    .with_options(options)
}

/// Operation that sleeps, counts calls and tracks the peak number of concurrent calls
#[derive(Debug, Default)]
struct Recorder {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn run(&self, job: &WalletJob, latency: Duration) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(latency).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        format!("{}@{}", job.wallet, job.chain)
    }
}

fn start_recording(config: QueueConfig<Kind>, latency: Duration) -> (FetchQueue<WalletJob>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let op_recorder = Arc::clone(&recorder);
    let queue = FetchQueue::start(
        config,
        from_fn(move |job: WalletJob| {
            let recorder = Arc::clone(&op_recorder);
            async move { Ok::<_, CodedError>(recorder.run(&job, latency).await) }
        }),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap();
    (queue, recorder)
}

/// Operation that fails with the scripted codes in order, then succeeds
fn start_scripted(
    config: QueueConfig<Kind>,
    codes: Vec<u16>,
) -> (FetchQueue<WalletJob>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let op_calls = Arc::clone(&calls);
    let codes = Arc::new(codes);
    let queue = FetchQueue::start(
        config,
        from_fn(move |_job: WalletJob| {
            let calls = Arc::clone(&op_calls);
            let codes = Arc::clone(&codes);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                match codes.get(call) {
                    Some(&code) => Err(CodedError::new(code, format!("upstream said {code}"))),
                    None => Ok("ok".to_string()),
                }
            }
        }),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap();
    (queue, calls)
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_share_one_call() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::from_millis(200));

    let handles: Vec<_> = (0..10)
        .map(|_| queue.enqueue(WalletJob::balances("0xAbC", 1)).unwrap())
        .collect();
    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(handles[1].disposition(), Disposition::Attached);

    for handle in handles {
        assert_eq!(handle.wait().await.unwrap(), "0xAbC@1");
    }
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn wallet_case_does_not_split_dedup() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::from_millis(50));

    let upper = queue.enqueue(WalletJob::balances("0xABC", 137)).unwrap();
    let lower = queue.enqueue(WalletJob::balances("0xabc", 137)).unwrap();
    assert_eq!(upper.wait().await.unwrap(), lower.wait().await.unwrap());
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn sequential_identical_requests_call_twice() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::from_millis(10));

    queue.fetch(WalletJob::balances("0xabc", 1)).await.unwrap();
    queue.fetch(WalletJob::balances("0xabc", 1)).await.unwrap();
    assert_eq!(recorder.calls(), 2);
    assert_eq!(queue.counts().completed, 2);
}

#[tokio::test(start_paused = true)]
async fn retained_results_answer_repeat_requests_when_enabled() {
    let options = QueueOptions {
        serve_retained: true,
        ..QueueOptions::default()
    };
    let (queue, recorder) = start_recording(config(40.0, options), Duration::from_millis(10));

    queue.fetch(WalletJob::balances("0xabc", 1)).await.unwrap();
    let handle = queue.enqueue(WalletJob::balances("0xabc", 1)).unwrap();
    assert_eq!(handle.disposition(), Disposition::Retained);
    handle.wait().await.unwrap();
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_requests_each_call_once() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::from_millis(10));

    let a = queue.enqueue(WalletJob::balances("0xa", 1)).unwrap();
    let b = queue.enqueue(WalletJob::collectibles("0xa", 1)).unwrap();
    let c = queue.enqueue(WalletJob::balances("0xa", 10)).unwrap();
    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), c.id());

    a.wait().await.unwrap();
    b.wait().await.unwrap();
    c.wait().await.unwrap();
    assert_eq!(recorder.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn active_jobs_never_exceed_concurrency() {
    let options = QueueOptions {
        concurrency: Some(2),
        ..QueueOptions::default()
    };
    let (queue, recorder) = start_recording(config(1000.0, options), Duration::from_millis(100));
    assert_eq!(queue.concurrency(), 2);

    let handles: Vec<_> = (0..6)
        .map(|i| queue.enqueue(WalletJob::balances(&format!("0x{i}"), 1)).unwrap())
        .collect();
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(recorder.calls(), 6);
    assert_eq!(recorder.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn limiter_bounds_throughput() {
    // 20 points per second and jobs costing 10: two immediately, then one every 500ms
    let (queue, recorder) = start_recording(config(20.0, QueueOptions::default()), Duration::ZERO);

    let started = Instant::now();
    let handles: Vec<_> = (0..6)
        .map(|i| queue.enqueue(WalletJob::balances(&format!("0x{i}"), 1)).unwrap())
        .collect();
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(recorder.calls(), 6);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_upstream_is_retried_with_backoff() {
    let started_at = Arc::new(Mutex::new(Vec::new()));
    let op_started_at = Arc::clone(&started_at);
    let queue = FetchQueue::start(
        config(40.0, QueueOptions::default()),
        from_fn(move |_job: WalletJob| {
            let started_at = Arc::clone(&op_started_at);
            async move {
                let mut calls = started_at.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() <= 2 {
                    Err(CodedError::new(429, "slow down"))
                } else {
                    Ok("ok".to_string())
                }
            }
        }),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(queue.fetch(WalletJob::balances("0xa", 1)).await.unwrap(), "ok");

    let calls = started_at.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    // 1000ms after the first failure, 2000ms after the second
    assert!(calls[1] - calls[0] >= Duration::from_millis(1000));
    assert!(calls[2] - calls[1] >= Duration::from_millis(2000));

    let completed = queue.jobs(JobState::Completed);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_after_one_attempt() {
    let (queue, calls) = start_scripted(config(40.0, QueueOptions::default()), vec![404]);

    let err = queue.fetch(WalletJob::balances("0xa", 1)).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.to_string(), "404: upstream said 404");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let failed = queue.jobs(JobState::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn unsupported_chain_reaches_every_waiter() {
    let (queue, calls) = start_scripted(config(40.0, QueueOptions::default()), vec![422]);

    let first = queue.enqueue(WalletJob::collectibles("0xa", 999)).unwrap();
    let second = queue.enqueue(WalletJob::collectibles("0xa", 999)).unwrap();
    for handle in [first, second] {
        match handle.wait().await {
            Err(FetchError::Upstream(err)) => {
                assert_eq!(err.code(), 422);
                assert_eq!(err.message(), "upstream said 422");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_exhaust_attempts() {
    let options = QueueOptions {
        attempts: 3,
        backoff_delay: Duration::from_millis(10),
        ..QueueOptions::default()
    };
    let (queue, calls) = start_scripted(config(40.0, options), vec![503, 503, 503, 503]);

    let err = queue.fetch(WalletJob::balances("0xa", 1)).await.unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn waiting_too_long_for_capacity_fails_the_job() {
    let options = QueueOptions {
        concurrency: Some(2),
        rate_limit_wait_timeout: Duration::from_millis(300),
        ..QueueOptions::default()
    };
    // 11 points per second: one collectibles job drains the bucket for a full second
    let (queue, recorder) = start_recording(config(11.0, options), Duration::ZERO);

    queue.fetch(WalletJob::collectibles("0xa", 1)).await.unwrap();
    let err = queue.fetch(WalletJob::collectibles("0xb", 1)).await.unwrap_err();
    assert!(matches!(err, FetchError::RateLimitTimeout { .. }));
    assert_eq!(err.status_code(), 503);
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoning_one_waiter_leaves_others_intact() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::from_millis(500));
    let queue = Arc::new(queue);

    let impatient = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.fetch(WalletJob::balances("0xa", 1)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    impatient.abort();

    let patient = queue.fetch(WalletJob::balances("0xa", 1)).await.unwrap();
    assert_eq!(patient, "0xa@1");
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_jobs_never_reach_the_queue() {
    let (queue, recorder) = start_recording(config(40.0, QueueOptions::default()), Duration::ZERO);

    let err = queue.fetch(WalletJob::balances("", 1)).await.unwrap_err();
    assert_eq!(err, FetchError::Validation("wallet is required".to_string()));
    assert_eq!(err.status_code(), 400);
    assert_eq!(recorder.calls(), 0);
    assert_eq!(queue.counts().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_pending_jobs() {
    let options = QueueOptions {
        concurrency: Some(1),
        ..QueueOptions::default()
    };
    let (queue, recorder) = start_recording(config(40.0, options), Duration::from_millis(200));

    let running = queue.enqueue(WalletJob::balances("0xa", 1)).unwrap();
    let pending = queue.enqueue(WalletJob::balances("0xb", 1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.shutdown().await, 1);
    assert_eq!(running.wait().await.unwrap(), "0xa@1");
    assert_eq!(pending.wait().await.unwrap_err(), FetchError::Abandoned);
    assert_eq!(recorder.calls(), 1);
    assert!(queue.enqueue(WalletJob::balances("0xc", 1)).unwrap().wait().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn retry_pending_at_shutdown_reaches_the_waiter() {
    let queue = FetchQueue::start(
        config(40.0, QueueOptions::default()),
        from_fn(|_job: WalletJob| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err::<String, _>(CodedError::new(503, "unavailable"))
        }),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap();

    let handle = queue.enqueue(WalletJob::balances("0xa", 1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.shutdown().await, 0);
    let err = tokio::time::timeout(Duration::from_secs(3600), handle.wait())
        .await
        .expect("waiter resolves once the running attempt fails")
        .unwrap_err();
    match err {
        FetchError::Upstream(err) => assert_eq!(err.message(), "unavailable"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(queue.counts().delayed, 0);
    assert_eq!(queue.jobs(JobState::Failed)[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_token_closes_the_queue() {
    let options = QueueOptions {
        concurrency: Some(1),
        ..QueueOptions::default()
    };
    let recorder = Arc::new(Recorder::default());
    let op_recorder = Arc::clone(&recorder);
    let cancel = CancellationToken::new();
    let queue = FetchQueue::start(
        config(40.0, options),
        from_fn(move |job: WalletJob| {
            let recorder = Arc::clone(&op_recorder);
            async move { Ok::<_, CodedError>(recorder.run(&job, Duration::from_millis(200)).await) }
        }),
        Arc::new(MemoryRateLimitStore::new()),
        cancel.clone(),
    )
    .unwrap();

    let running = queue.enqueue(WalletJob::balances("0xa", 1)).unwrap();
    let pending = queue.enqueue(WalletJob::balances("0xb", 1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let late = queue.enqueue(WalletJob::balances("0xc", 1)).unwrap();
    assert_eq!(late.disposition(), Disposition::Rejected);
    assert_eq!(late.wait().await.unwrap_err(), FetchError::Abandoned);
    assert_eq!(pending.wait().await.unwrap_err(), FetchError::Abandoned);
    assert_eq!(running.wait().await.unwrap(), "0xa@1");
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let result = FetchQueue::<WalletJob>::start(
        QueueConfig::new("broken", [(Kind::Balances, 10.0)], 40.0, Duration::from_secs(1)),
        from_fn(|_job: WalletJob| async { Ok::<_, CodedError>(String::new()) }),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    );
    assert!(result.is_err());
}
