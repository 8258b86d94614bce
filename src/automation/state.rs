//! Loop bookkeeping: the shutdown flag and per-cycle reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::dispatch::ActionOutcome;

/// How often a sleeping loop looks at the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Cooperative stop signal shared between the loop and the Ctrl+C handler.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, waking early on shutdown.
    /// Returns false if shutdown was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Everything one cycle did.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub device: String,
    /// Winning state, `None` when classification did not run
    pub state: Option<String>,
    pub action: ActionOutcome,
    pub events_parsed: usize,
    pub events_forwarded: usize,
    pub events_failed: usize,
    pub duplicates: usize,
    /// Set when the capture failed and nothing else ran
    pub skipped: Option<String>,
    /// Non-fatal component failures (matcher, OCR)
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn new(cycle: u64, device: &str) -> Self {
        Self {
            cycle,
            device: device.to_string(),
            state: None,
            action: ActionOutcome::None,
            events_parsed: 0,
            events_forwarded: 0,
            events_failed: 0,
            duplicates: 0,
            skipped: None,
            errors: Vec::new(),
        }
    }
}

/// Totals over a whole run, printed when the loop exits.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub skipped: u64,
    pub taps: u64,
    pub tap_failures: u64,
    pub events_forwarded: u64,
    pub events_failed: u64,
    pub duplicates: u64,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn add(&mut self, report: &CycleReport) {
        self.cycles += 1;
        if report.skipped.is_some() {
            self.skipped += 1;
        }
        match report.action {
            ActionOutcome::Tapped { .. } => self.taps += 1,
            ActionOutcome::Failed { .. } => self.tap_failures += 1,
            ActionOutcome::None => {}
        }
        self.events_forwarded += report.events_forwarded as u64;
        self.events_failed += report.events_failed as u64;
        self.duplicates += report.duplicates as u64;
    }
}
