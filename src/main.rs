use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cfpinner_rs::config::{
    Paths, ALIVE_MAX_AGE_DAYS, DEFAULT_BLOCKS_SOURCE, DEFAULT_DISCOVER_CAP,
    DEFAULT_DISCOVER_DOMAIN, DEFAULT_DISCOVER_TIMEOUT, DEFAULT_TRACK_CAP, DEFAULT_TRACK_TIMEOUT,
};
use cfpinner_rs::dispatcher::{DispatchMode, DEFAULT_CONCURRENCY};
use cfpinner_rs::lists::{self, BlockList};
use cfpinner_rs::sampler::SampleCap;
use cfpinner_rs::target::TargetTemplate;
use cfpinner_rs::tracker::{self, DiscoverRequest, TargetSource, TrackRequest};
use cfpinner_rs::types::BatchReport;
use cfpinner_rs::{logging, progress, report, server, updater};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// cfpinner-rs: find which CDN edge nodes hold a cached copy of a resource.
#[derive(Debug, Parser)]
#[command(
    name = "cfpinner-rs",
    version,
    about = "Find which CDN edge nodes hold a cached copy of a resource.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// State directory holding the block list and alive cache
    /// (default: $CFPINNER_HOME or ~/.cfpinner).
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ProbeArgs {
    /// Number of parallel probe workers.
    #[arg(long = "threads", visible_alias = "num-threads", default_value_t = DEFAULT_CONCURRENCY)]
    threads: usize,

    /// Per-probe timeout in milliseconds (default: 5000 for track, 1000 for alive).
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Expand every block completely instead of sampling. May mean 500k+ probes.
    #[arg(long = "force-all", default_value_t = false)]
    force_all: bool,

    /// Addresses sampled per block (default: 10 for track, 100 for alive).
    #[arg(long)]
    cap: Option<usize>,

    /// Address block file to use instead of the managed one.
    #[arg(long)]
    blocks: Option<PathBuf>,

    /// Write the batch report as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl ProbeArgs {
    fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe edge nodes for a tracked URL and report HIT/MISS per address.
    Track {
        /// URL of the tracked resource, e.g. https://example.com/img/abc.png
        url: String,

        /// Virtual host to present (default: the URL's host).
        #[arg(long)]
        domain: Option<String>,

        /// Ignore a fresh alive cache and expand the block list instead.
        #[arg(long = "no-alive-cache", default_value_t = false)]
        no_alive_cache: bool,

        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Discover responsive edge nodes and cache them for later tracking.
    Alive {
        /// Virtual host presented during discovery.
        #[arg(long, default_value = DEFAULT_DISCOVER_DOMAIN)]
        domain: String,

        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Download the published edge address blocks.
    Update {
        /// Download even if the local list is still fresh.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Where the block list is published.
        #[arg(long, default_value = DEFAULT_BLOCKS_SOURCE)]
        source: String,
    },
    /// Serve the tracking API over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,

        /// Address block file to use instead of the managed one.
        #[arg(long)]
        blocks: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let paths = match cli.state_dir.as_deref() {
        Some(dir) => Paths::in_dir(dir),
        None => Paths::from_env()?,
    };
    paths
        .ensure_dir()
        .with_context(|| format!("failed to create state dir {}", paths.dir.display()))?;

    match cli.command {
        Command::Track {
            url,
            domain,
            no_alive_cache,
            probe,
        } => run_track(&paths, &url, domain.as_deref(), no_alive_cache, &probe).await,
        Command::Alive { domain, probe } => run_alive(&paths, &domain, &probe).await,
        Command::Update { force, source } => {
            updater::update_blocks(&paths, &source, force).await?;
            Ok(())
        }
        Command::Serve { bind, blocks } => {
            let list = load_blocks(&paths, blocks.as_deref()).await?;
            println!("API server starting at http://{} (Ctrl+C to stop)", bind);
            tokio::select! {
                res = server::spawn_server(&bind, list.blocks) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    }
}

async fn run_track(
    paths: &Paths,
    url: &str,
    domain: Option<&str>,
    no_alive_cache: bool,
    args: &ProbeArgs,
) -> Result<()> {
    let template = TargetTemplate::parse(url, domain)?;
    let timeout = args.timeout_or(DEFAULT_TRACK_TIMEOUT);
    let skip_cache = skip_alive_cache(no_alive_cache, args.blocks.is_some());
    let source = match fresh_alive_cache(paths, skip_cache) {
        Some(set) => TargetSource::Alive(set),
        None => {
            let list = load_blocks(paths, args.blocks.as_deref()).await?;
            TargetSource::Blocks {
                blocks: list.blocks,
                cap: SampleCap::from_flags(args.cap.unwrap_or(DEFAULT_TRACK_CAP), args.force_all)?,
            }
        }
    };

    println!("cfpinner-rs track:");
    println!("  url          : {}", url);
    println!("  virtual host : {}", template.domain());
    println!("  targets      : {}", source.describe());
    println!("  threads      : {}", args.threads);
    println!("  timeout_ms   : {}", timeout.as_millis());
    println!();

    let req = TrackRequest {
        template,
        source,
        concurrency: args.threads,
        timeout,
    };
    let cancel = cancel_on_ctrl_c();
    let (tx, printer) = progress::spawn_console(DispatchMode::Track);
    let res = tracker::track(req, cancel, Some(tx)).await;
    let _ = printer.await;
    let report = res?;

    println!("\nScan complete!");
    print!("{}", report::render_table(&report));
    write_output(args.output.as_deref(), &report);
    Ok(())
}

async fn run_alive(paths: &Paths, domain: &str, args: &ProbeArgs) -> Result<()> {
    let list = load_blocks(paths, args.blocks.as_deref()).await?;
    let timeout = args.timeout_or(DEFAULT_DISCOVER_TIMEOUT);
    let req = DiscoverRequest {
        domain: domain.to_string(),
        cap: SampleCap::from_flags(args.cap.unwrap_or(DEFAULT_DISCOVER_CAP), args.force_all)?,
        blocks: list.blocks,
        concurrency: args.threads,
        timeout,
    };
    let planned = req.addresses().len();
    println!(
        "Testing {} edge addresses from {} blocks ({}) using {} threads...",
        planned,
        req.blocks.len(),
        req.cap,
        args.threads
    );
    println!(
        "Note: this may take up to ~{} minutes.\n",
        tracker::estimate_secs(planned, args.threads, timeout) / 60
    );

    let cancel = cancel_on_ctrl_c();
    let (tx, printer) = progress::spawn_console(DispatchMode::Discover);
    let res = tracker::discover(req, cancel, Some(tx)).await;
    let _ = printer.await;
    let (report, alive) = res?;

    println!("\nScan complete!");
    println!(
        "Found {} alive edge nodes out of {} tested{}",
        alive.len(),
        report.total(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    write_output(args.output.as_deref(), &report);

    if alive.is_empty() {
        bail!("no alive edge nodes found");
    }
    lists::save_alive(&paths.alive_file, &alive)?;
    println!("Saved alive addresses to: {}", paths.alive_file.display());
    Ok(())
}

/// Load the block list, refreshing the managed copy first when it is stale.
async fn load_blocks(paths: &Paths, explicit: Option<&Path>) -> Result<BlockList> {
    if let Some(path) = explicit {
        return lists::load_blocks_from_path(path);
    }
    if updater::needs_update(paths) {
        info!("address block list missing or stale, downloading");
        if let Err(e) = updater::update_blocks(paths, DEFAULT_BLOCKS_SOURCE, false).await {
            warn!("failed to update address blocks, using existing file if any: {e:#}");
        }
    }
    lists::load_blocks_from_path(&paths.blocks_file)
        .context("no usable address block list; try: cfpinner-rs update")
}

/// An explicit block file asks for block expansion, like `--no-alive-cache`.
fn skip_alive_cache(no_alive_cache: bool, explicit_blocks: bool) -> bool {
    no_alive_cache || explicit_blocks
}

/// The alive cache, if it exists, is recent and non-empty.
fn fresh_alive_cache(paths: &Paths, disabled: bool) -> Option<cfpinner_rs::alive::AliveSet> {
    if disabled {
        return None;
    }
    let age = lists::file_age_days(&paths.alive_file)?;
    if age >= ALIVE_MAX_AGE_DAYS {
        info!("alive cache is {age} days old; run `cfpinner-rs alive` to refresh");
        return None;
    }
    match lists::load_alive_from_path(&paths.alive_file) {
        Ok(set) if !set.is_empty() => {
            info!("using alive cache ({} addresses, age: {age} days)", set.len());
            Some(set)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("ignoring alive cache: {e:#}");
            None
        }
    }
}

/// Cancel the running batch on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, aborting in-flight probes");
            token.cancel();
        }
    });
    cancel
}

fn write_output(path: Option<&Path>, report: &BatchReport) {
    if let Some(path) = path {
        if let Err(e) = write_results_json(path, report) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }
}

fn write_results_json(path: &Path, report: &BatchReport) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_block_file_bypasses_alive_cache() {
        assert!(!skip_alive_cache(false, false));
        assert!(skip_alive_cache(true, false));
        assert!(skip_alive_cache(false, true));
    }

    #[test]
    fn disabled_cache_is_never_read() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::in_dir(dir.path());
        let alive: cfpinner_rs::alive::AliveSet =
            [std::net::Ipv4Addr::new(104, 16, 0, 1)].into_iter().collect();
        lists::save_alive(&paths.alive_file, &alive).unwrap();

        assert_eq!(fresh_alive_cache(&paths, false), Some(alive));
        assert_eq!(fresh_alive_cache(&paths, skip_alive_cache(false, true)), None);
    }

    #[test]
    fn track_flags_parse() {
        let cli = Cli::try_parse_from([
            "cfpinner-rs",
            "track",
            "https://example.com/a.png",
            "--blocks",
            "/tmp/blocks.txt",
            "--threads",
            "4",
        ])
        .unwrap();
        let Command::Track { probe, no_alive_cache, .. } = cli.command else {
            panic!("expected track");
        };
        assert!(!no_alive_cache);
        assert_eq!(probe.threads, 4);
        assert_eq!(probe.blocks.as_deref(), Some(Path::new("/tmp/blocks.txt")));
    }
}
