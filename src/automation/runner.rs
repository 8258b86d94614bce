//! Per-device polling loop.
//!
//! Each cycle: capture one frame, classify it and act on the winning state,
//! then read the chat box and forward any new title requests. Cycles never
//! overlap, so the deduplicator needs no locking.

use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::config::{ChatConfig, CycleConfig};
use super::dedup::Deduplicator;
use super::dispatch::Dispatcher;
use super::sink::EventSink;
use super::state::{CycleReport, RunSummary, ShutdownFlag};
use crate::capture::{Actuator, CaptureDevice, Frame, Region};
use crate::detection::{classify, save_highlight, Cascade};
use crate::error::{ConfigError, OcrError};
use crate::ocr::{OcrEngine, Preprocess, TextExtractor};
use crate::parse::{CandidateEvent, EventParser};

/// Chat box region, OCR and parser bundled together.
pub struct ChatReader<E> {
    extractor: TextExtractor<E>,
    region: Region,
    preprocess: Preprocess,
    parser: EventParser,
}

impl<E: OcrEngine> ChatReader<E> {
    pub fn new(engine: E, config: &ChatConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            extractor: TextExtractor::new(engine, config.ocr_options()),
            region: config.region,
            preprocess: config.preprocess.clone(),
            parser: EventParser::new(&config.home_kingdom)?,
        })
    }

    /// OCRs the chat box and parses every request in it. Not deduplicated.
    pub fn read(&self, frame: &Frame) -> Result<Vec<CandidateEvent>, OcrError> {
        let text = self.extractor.extract(frame, &self.region, &self.preprocess)?;
        Ok(self.parser.parse(&text))
    }
}

pub struct Runner<D, A, S, E> {
    device: D,
    cascade: Option<Cascade>,
    chat: Option<ChatReader<E>>,
    dedup: Deduplicator,
    dispatcher: Dispatcher<A, S>,
    cycle: CycleConfig,
    debug_dir: Option<PathBuf>,
    cycles_run: u64,
    rng: StdRng,
}

impl<D, A, S, E> Runner<D, A, S, E>
where
    D: CaptureDevice,
    A: Actuator,
    S: EventSink,
    E: OcrEngine,
{
    pub fn new(device: D, dispatcher: Dispatcher<A, S>, dedup: Deduplicator, cycle: CycleConfig) -> Self {
        Self {
            device,
            cascade: None,
            chat: None,
            dedup,
            dispatcher,
            cycle,
            debug_dir: None,
            cycles_run: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Enables the classification path (if `cycle.classify` is set).
    pub fn with_cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Enables the chat path (if `cycle.read_chat` is set).
    pub fn with_chat(mut self, chat: ChatReader<E>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher<A, S> {
        &self.dispatcher
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Runs one capture → classify → act → read chat → forward pass.
    ///
    /// Never fails: capture, matcher and OCR problems are recorded in the
    /// report and the next cycle starts fresh.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles_run += 1;
        let mut report = CycleReport::new(self.cycles_run, self.device.device_id());

        let frame = match self.device.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %report.device, cycle = report.cycle, error = %e, "capture failed, skipping cycle");
                report.skipped = Some(e.to_string());
                return report;
            }
        };

        if self.cycle.classify {
            self.classify_and_act(&frame, &mut report);
        }

        if self.cycle.read_chat {
            self.read_and_forward(&frame, &mut report);
        }

        debug!(
            device = %report.device,
            cycle = report.cycle,
            state = ?report.state,
            forwarded = report.events_forwarded,
            "cycle finished"
        );
        report
    }

    fn classify_and_act(&mut self, frame: &Frame, report: &mut CycleReport) {
        let Some(cascade) = &self.cascade else {
            return;
        };

        let state = match classify(frame, cascade) {
            Ok(state) => state,
            Err(e) => {
                warn!(device = %report.device, error = %e, "classification failed");
                report.errors.push(e.to_string());
                return;
            }
        };

        if let (Some(dir), Some(matched)) = (&self.debug_dir, &state.matched) {
            if let Err(e) = save_highlight(dir, &report.device, &state.state, frame, matched) {
                warn!(error = %e, "failed to save debug image");
            }
        }

        report.action = self.dispatcher.dispatch_action(&state, frame.width(), frame.height());
        report.state = Some(state.state);
    }

    fn read_and_forward(&mut self, frame: &Frame, report: &mut CycleReport) {
        let Some(chat) = &self.chat else {
            return;
        };

        let events = match chat.read(frame) {
            Ok(events) => events,
            Err(e) => {
                warn!(device = %report.device, error = %e, "chat read failed");
                report.errors.push(e.to_string());
                return;
            }
        };

        report.events_parsed = events.len();
        for event in &events {
            if !self.dedup.accept(event) {
                report.duplicates += 1;
                continue;
            }
            match self.dispatcher.dispatch_event(event) {
                Ok(()) => report.events_forwarded += 1,
                Err(_) => report.events_failed += 1,
            }
        }
    }

    fn next_delay(&mut self) -> Duration {
        let jitter = if self.cycle.jitter_ms > 0 {
            self.rng.gen_range(0..=self.cycle.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.cycle.delay_ms + jitter)
    }

    /// Runs cycles until shutdown is requested or `max_cycles` is reached.
    ///
    /// Shutdown is checked before each cycle and while sleeping between
    /// cycles; a cycle in progress always finishes.
    pub fn run(&mut self, shutdown: &ShutdownFlag, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            device = %self.device.device_id(),
            max_cycles = ?max_cycles,
            dedup = ?self.dedup.policy(),
            "loop started"
        );

        loop {
            if shutdown.is_requested() {
                summary.interrupted = true;
                break;
            }
            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            let report = self.run_cycle();
            summary.add(&report);

            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            let delay = self.next_delay();
            if !shutdown.sleep(delay) {
                summary.interrupted = true;
                break;
            }
        }

        info!(
            device = %self.device.device_id(),
            cycles = summary.cycles,
            taps = summary.taps,
            forwarded = summary.events_forwarded,
            interrupted = summary.interrupted,
            "loop stopped"
        );
        summary
    }
}
