use crate::dispatcher::{DispatchMode, ProgressEvent, ProgressSender};
use crate::types::ProbeOutcome;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How often (in completed probes) the progress line is advanced.
const PROGRESS_EVERY: usize = 10;
const PROGRESS_TEMPLATE: &str = "[{percent:>3}%] Checking IP {pos} of {len}...";

/// Drives the progress bar and the live per-address lines for a running
/// batch. Live lines go through the bar so they never interleave with it.
pub struct ConsolePrinter {
    bar: ProgressBar,
    mode: DispatchMode,
}

impl ConsolePrinter {
    pub fn new(bar: ProgressBar, mode: DispatchMode) -> Self {
        bar.set_style(progress_style());
        Self { bar, mode }
    }

    pub fn stdout(mode: DispatchMode) -> Self {
        Self::new(
            ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout()),
            mode,
        )
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { total, .. } => self.bar.set_length(*total as u64),
            ProgressEvent::Live(outcome) => self.bar.println(live_line(outcome, self.mode)),
            ProgressEvent::Completed { done, total, .. } => {
                if done % PROGRESS_EVERY == 0 || done == total {
                    self.bar.set_position(*done as u64);
                }
            }
            ProgressEvent::Finished { .. } => self.bar.finish_and_clear(),
        }
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(PROGRESS_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// One status line for an interesting address, e.g. `104.16.0.1  ✓ HIT [HIT]`.
pub fn live_line(outcome: &ProbeOutcome, mode: DispatchMode) -> String {
    let ip = outcome.ip.to_string();
    match mode {
        DispatchMode::Track => format!("{ip:<20} ✓ HIT [{}]", outcome.cache_status),
        DispatchMode::Discover => format!("{ip:<20} ✓ ALIVE [{}]", outcome.status_code),
    }
}

/// Spawn a stdout consumer for batch progress. Drop the sender (the
/// dispatcher does when it finishes) and await the handle to flush.
pub fn spawn_console(mode: DispatchMode) -> (ProgressSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = tokio::spawn(async move {
        let mut printer = ConsolePrinter::stdout(mode);
        while let Some(ev) = rx.recv().await {
            printer.handle(&ev);
        }
    });
    (tx, handle)
}
