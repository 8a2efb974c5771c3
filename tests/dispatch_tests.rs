use async_trait::async_trait;
use cfpinner_rs::dispatcher::{self, DispatchMode, DispatchOptions, ProgressEvent};
use cfpinner_rs::error::ConfigError;
use cfpinner_rs::probe::Prober;
use cfpinner_rs::target::{ProbeTarget, TargetTemplate};
use cfpinner_rs::types::ProbeOutcome;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Answers HIT for even last octets, MISS for odd ones, error for `.13`.
#[derive(Clone)]
struct FakeEdge {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeEdge {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Prober for FakeEdge {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let last = target.ip.octets()[3];
        if last == 13 {
            return ProbeOutcome::failed(target.ip, "connection refused".into(), 0, String::new());
        }
        ProbeOutcome {
            ip: target.ip,
            status_code: 200,
            success: true,
            error: None,
            cache_status: if last % 2 == 0 { "HIT" } else { "MISS" }.into(),
            ray_id: "8428f15b8a9c1234-SJC".into(),
            pop: "SJC".into(),
            country: "US".into(),
            latency_ms: self.delay.as_millis() as u64,
            timestamp: String::new(),
        }
    }
}

fn targets(n: u8) -> Vec<ProbeTarget> {
    let template = TargetTemplate::parse("https://example.com/img/a.png", None).unwrap();
    let ips: Vec<Ipv4Addr> = (1..=n).map(|i| Ipv4Addr::new(104, 16, 0, i)).collect();
    template.targets(&ips)
}

fn opts(concurrency: usize) -> DispatchOptions {
    DispatchOptions {
        concurrency,
        mode: DispatchMode::Track,
    }
}

#[tokio::test]
async fn every_target_is_probed_once_in_target_order() {
    let fake = FakeEdge::new(Duration::from_millis(2));
    let peak = fake.peak.clone();
    let input = targets(23);
    let expected: Vec<Ipv4Addr> = input.iter().map(|t| t.ip).collect();

    let dispatch = dispatcher::run(
        input,
        opts(5),
        || Ok(fake.clone()),
        CancellationToken::new(),
        None,
    )
    .await
    .unwrap();

    assert!(!dispatch.cancelled);
    let got: Vec<Ipv4Addr> = dispatch.outcomes.iter().map(|o| o.ip).collect();
    assert_eq!(got, expected);
    assert!(peak.load(Ordering::SeqCst) <= 5);
    assert!(dispatch.outcomes[12].has_error());
}

#[tokio::test]
async fn progress_stream_counts_every_completion() {
    let fake = FakeEdge::new(Duration::from_millis(1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    dispatcher::run(
        targets(12),
        opts(4),
        || Ok(fake.clone()),
        CancellationToken::new(),
        Some(tx),
    )
    .await
    .unwrap();

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::Started { total: 12, workers: 4 })
    ));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Finished { done: 12, total: 12, cancelled: false })
    ));
    let done: Vec<usize> = events
        .iter()
        .filter_map(|ev| match ev {
            ProgressEvent::Completed { done, .. } => Some(*done),
            _ => None,
        })
        .collect();
    assert_eq!(done, (1..=12).collect::<Vec<_>>());
    let live = events
        .iter()
        .filter(|ev| matches!(ev, ProgressEvent::Live(_)))
        .count();
    // Even last octets 2..=12 are HITs.
    assert_eq!(live, 6);
}

#[tokio::test]
async fn cancellation_returns_partial_results() {
    let fake = FakeEdge::new(Duration::from_millis(50));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let input = targets(40);
    let order: Vec<Ipv4Addr> = input.iter().map(|t| t.ip).collect();
    let dispatch = dispatcher::run(input, opts(2), || Ok(fake.clone()), cancel, None)
        .await
        .unwrap();

    assert!(dispatch.cancelled);
    assert!(dispatch.outcomes.len() < 40);
    let positions: Vec<usize> = dispatch
        .outcomes
        .iter()
        .map(|o| order.iter().position(|ip| *ip == o.ip).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn surplus_workers_are_not_spawned() {
    let fake = FakeEdge::new(Duration::ZERO);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatch = dispatcher::run(
        targets(3),
        opts(usize::MAX),
        || Ok(fake.clone()),
        CancellationToken::new(),
        Some(tx),
    )
    .await
    .unwrap();

    assert_eq!(dispatch.outcomes.len(), 3);
    assert!(matches!(
        rx.recv().await,
        Some(ProgressEvent::Started { total: 3, workers: 3 })
    ));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_work() {
    let fake = FakeEdge::new(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let dispatch = dispatcher::run(targets(4), opts(2), || Ok(fake.clone()), cancel, None)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(dispatch.cancelled);
    assert!(dispatch.outcomes.is_empty());
}

#[tokio::test]
async fn setup_errors_are_reported() {
    let fake = FakeEdge::new(Duration::ZERO);
    let err = dispatcher::run(
        Vec::new(),
        opts(4),
        || Ok(fake.clone()),
        CancellationToken::new(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConfigError::NoTargets));

    let err = dispatcher::run(
        targets(3),
        opts(0),
        || Ok(fake.clone()),
        CancellationToken::new(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConfigError::ZeroConcurrency));

    let err = dispatcher::run::<FakeEdge, _>(
        targets(3),
        opts(2),
        || Err(ConfigError::ZeroCap),
        CancellationToken::new(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConfigError::ZeroCap));
}
