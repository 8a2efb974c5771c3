use crate::error::ConfigError;
use crate::probe::{EdgeProbe, Prober};
use crate::target::ProbeTarget;
use crate::types::{ProbeOutcome, Verdict};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// What the batch is looking for; decides which outcomes get a live line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Tracking a cached resource: HITs are interesting.
    Track,
    /// Discovery pass: every responsive node is interesting.
    Discover,
}

impl DispatchMode {
    pub fn is_interesting(&self, outcome: &ProbeOutcome) -> bool {
        match self {
            DispatchMode::Track => outcome.verdict() == Verdict::Hit,
            DispatchMode::Discover => outcome.is_alive(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub mode: DispatchMode,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            mode: DispatchMode::Track,
        }
    }
}

/// Events streamed to a single progress consumer while a batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { total: usize, workers: usize },
    /// Emitted for interesting outcomes, before the matching `Completed`.
    Live(ProbeOutcome),
    Completed {
        done: usize,
        total: usize,
        verdict: Verdict,
    },
    Finished { done: usize, total: usize, cancelled: bool },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Outcomes of a batch, in target order.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    pub outcomes: Vec<ProbeOutcome>,
    /// True when cancellation stopped the batch before every target ran.
    pub cancelled: bool,
}

/// Split `len` items into `workers` contiguous slices of `ceil(len / workers)`.
///
/// Trailing slices may be shorter or empty; every index appears exactly once.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let per_worker = len.div_ceil(workers);
    (0..workers)
        .map(|w| {
            let start = (w * per_worker).min(len);
            let end = (start + per_worker).min(len);
            start..end
        })
        .collect()
}

/// Probe every target with a pool of `opts.concurrency` workers.
///
/// Each worker gets its own prober from `make_probe` and walks a contiguous
/// slice of `targets` in order. Outcomes travel over a channel to this task,
/// which is the only place that counts progress and talks to `progress`.
/// The result is re-ordered to match `targets`, so reports do not depend on
/// worker timing.
///
/// Returns once every worker finished its slice, or stopped early because
/// `cancel` fired. Per-target failures are data in the outcomes; only setup
/// problems (no targets, zero concurrency, prober construction) are errors.
pub async fn run<P, F>(
    targets: Vec<ProbeTarget>,
    opts: DispatchOptions,
    mut make_probe: F,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
) -> Result<Dispatch, ConfigError>
where
    P: Prober,
    F: FnMut() -> Result<P, ConfigError>,
{
    if targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }
    if opts.concurrency == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }

    let total = targets.len();
    // More workers than targets would only add empty slices.
    let slices: Vec<Range<usize>> = partition(total, opts.concurrency.min(total))
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect();
    let probes = slices
        .iter()
        .map(|_| make_probe())
        .collect::<Result<Vec<P>, ConfigError>>()?;

    let emit = |ev: ProgressEvent| {
        if let Some(tx) = &progress {
            let _ = tx.send(ev);
        }
    };
    emit(ProgressEvent::Started {
        total,
        workers: slices.len(),
    });

    let targets = Arc::new(targets);
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ProbeOutcome)>();
    let mut set = JoinSet::new();

    for (worker, (range, probe)) in slices.into_iter().zip(probes).enumerate() {
        let targets = targets.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            debug!(worker, start = range.start, end = range.end, "worker started");
            for idx in range {
                if cancel.is_cancelled() {
                    break;
                }
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = probe.probe(&targets[idx]) => outcome,
                };
                if tx.send((idx, outcome)).is_err() {
                    break;
                }
            }
            debug!(worker, "worker finished");
        });
    }
    drop(tx);

    let mut slots: Vec<Option<ProbeOutcome>> = vec![None; total];
    let mut done = 0usize;
    while let Some((idx, outcome)) = rx.recv().await {
        done += 1;
        if opts.mode.is_interesting(&outcome) {
            emit(ProgressEvent::Live(outcome.clone()));
        }
        emit(ProgressEvent::Completed {
            done,
            total,
            verdict: outcome.verdict(),
        });
        slots[idx] = Some(outcome);
    }

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            warn!("probe worker failed: {e}");
        }
    }

    let cancelled = done < total;
    emit(ProgressEvent::Finished {
        done,
        total,
        cancelled,
    });

    Ok(Dispatch {
        outcomes: slots.into_iter().flatten().collect(),
        cancelled,
    })
}

/// `run` with one [`EdgeProbe`] per worker.
pub async fn run_edge(
    targets: Vec<ProbeTarget>,
    opts: DispatchOptions,
    timeout: Duration,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
) -> Result<Dispatch, ConfigError> {
    run(targets, opts, || EdgeProbe::new(timeout), cancel, progress).await
}
