use crate::alive::AliveSet;
use crate::dispatcher::{self, DispatchMode, DispatchOptions, ProgressSender};
use crate::error::ConfigError;
use crate::sampler::{expand_all, AddressBlock, SampleCap};
use crate::target::TargetTemplate;
use crate::types::BatchReport;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Where probe addresses come from. The two sources are exclusive.
#[derive(Debug, Clone)]
pub enum TargetSource {
    Blocks {
        blocks: Vec<AddressBlock>,
        cap: SampleCap,
    },
    Alive(AliveSet),
}

impl TargetSource {
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        match self {
            TargetSource::Blocks { blocks, cap } => expand_all(blocks, *cap),
            TargetSource::Alive(set) => set.to_sorted_vec(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TargetSource::Blocks { blocks, cap } => {
                format!("{} address blocks ({cap})", blocks.len())
            }
            TargetSource::Alive(set) => format!("alive cache ({} addresses)", set.len()),
        }
    }
}

/// Tracking run: where is a given resource cached?
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub template: TargetTemplate,
    pub source: TargetSource,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Discovery run: which edge nodes answer at all?
#[derive(Debug, Clone)]
pub struct DiscoverRequest {
    pub domain: String,
    pub blocks: Vec<AddressBlock>,
    pub cap: SampleCap,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl DiscoverRequest {
    pub fn template(&self) -> Result<TargetTemplate, ConfigError> {
        TargetTemplate::root(&self.domain)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        expand_all(&self.blocks, self.cap)
    }
}

/// Probe every address of `req.source` for the tracked resource.
pub async fn track(
    req: TrackRequest,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
) -> Result<BatchReport, ConfigError> {
    let addrs = req.source.addresses();
    info!(
        "tracking {} on {} edge addresses from {} with {} workers",
        req.template.domain(),
        addrs.len(),
        req.source.describe(),
        req.concurrency
    );
    let targets = req.template.targets(&addrs);
    let opts = DispatchOptions {
        concurrency: req.concurrency,
        mode: DispatchMode::Track,
    };
    let dispatch = dispatcher::run_edge(targets, opts, req.timeout, cancel, progress).await?;
    let mut report = BatchReport::summarize(dispatch.outcomes);
    report.cancelled = dispatch.cancelled;
    Ok(report)
}

/// Discovery pass over the blocks; returns the full report and the alive set.
pub async fn discover(
    req: DiscoverRequest,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
) -> Result<(BatchReport, AliveSet), ConfigError> {
    let template = req.template()?;
    let addrs = req.addresses();
    info!(
        "discovering alive nodes among {} addresses from {} blocks ({})",
        addrs.len(),
        req.blocks.len(),
        req.cap
    );
    let targets = template.targets(&addrs);
    let opts = DispatchOptions {
        concurrency: req.concurrency,
        mode: DispatchMode::Discover,
    };
    let dispatch = dispatcher::run_edge(targets, opts, req.timeout, cancel, progress).await?;
    let alive = AliveSet::from_outcomes(&dispatch.outcomes);
    let mut report = BatchReport::summarize(dispatch.outcomes);
    report.cancelled = dispatch.cancelled;
    Ok((report, alive))
}

/// Rough worst-case duration of a batch in seconds: every worker times out
/// on every target of its slice.
pub fn estimate_secs(targets: usize, concurrency: usize, timeout: Duration) -> u64 {
    if concurrency == 0 {
        return 0;
    }
    targets.div_ceil(concurrency) as u64 * timeout.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_source_replaces_block_expansion() {
        let set: AliveSet = [Ipv4Addr::new(104, 16, 0, 7)].into_iter().collect();
        assert_eq!(
            TargetSource::Alive(set).addresses(),
            vec![Ipv4Addr::new(104, 16, 0, 7)]
        );

        let blocks = vec!["198.51.100.0/30".parse().unwrap(), "203.0.113.5".parse().unwrap()];
        let source = TargetSource::Blocks {
            blocks,
            cap: SampleCap::limited(10).unwrap(),
        };
        assert_eq!(
            source.addresses(),
            vec![
                Ipv4Addr::new(198, 51, 100, 1),
                Ipv4Addr::new(198, 51, 100, 2),
                Ipv4Addr::new(203, 0, 113, 5),
            ]
        );
    }

    #[test]
    fn discovery_cap_is_per_call() {
        let blocks: Vec<AddressBlock> = vec!["104.16.0.0/13".parse().unwrap()];
        let wide = DiscoverRequest {
            domain: "www.cloudflare.com".into(),
            blocks: blocks.clone(),
            cap: SampleCap::limited(100).unwrap(),
            concurrency: 10,
            timeout: Duration::from_secs(1),
        };
        let narrow = DiscoverRequest {
            cap: SampleCap::limited(10).unwrap(),
            ..wide.clone()
        };
        assert_eq!(wide.addresses().len(), 100);
        assert_eq!(narrow.addresses().len(), 10);
    }

    #[test]
    fn estimate_is_slice_times_timeout() {
        assert_eq!(estimate_secs(23, 5, Duration::from_secs(2)), 10);
        assert_eq!(estimate_secs(0, 5, Duration::from_secs(2)), 0);
    }
}
