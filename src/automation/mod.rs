//! The per-device loop around detection and chat reading.
//!
//! This module provides:
//! - JSON configuration for one device
//! - Deduplication of title requests
//! - Dispatching taps and events to the actuator and sink
//! - The polling loop with cooperative shutdown

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod runner;
pub mod sink;
pub mod state;

pub use config::{AppConfig, ChatConfig, CycleConfig, DedupConfig};
pub use dedup::{DedupPolicy, Deduplicator};
pub use dispatch::{ActionOutcome, Dispatcher};
pub use runner::{ChatReader, Runner};
pub use sink::{CsvEventLog, EventSink, LogSink, SinkConfig, WebhookSink};
pub use state::{CycleReport, RunSummary, ShutdownFlag};
