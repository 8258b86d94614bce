//! Bounded retry around frame capture.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::device::CaptureDevice;
use super::frame::Frame;
use crate::error::CaptureError;

/// How many times to try a capture and how long to wait around each try.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after a failed attempt, multiplied by the attempt number
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Delay before every attempt, lets the device settle after a tap
    #[serde(default = "default_stabilize_ms")]
    pub stabilize_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_stabilize_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            stabilize_ms: default_stabilize_ms(),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. The last error is wrapped
    /// in `CaptureError::Exhausted`.
    pub fn run<T>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, CaptureError>,
    ) -> Result<T, CaptureError> {
        let attempts = self.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            if self.stabilize_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.stabilize_ms));
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "capture attempt failed");
                    last = Some(e);
                }
            }

            if attempt < attempts && self.backoff_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.backoff_ms * attempt as u64));
            }
        }

        Err(CaptureError::Exhausted {
            attempts,
            last: Box::new(last.unwrap_or_else(|| CaptureError::Transport("no attempt made".into()))),
        })
    }
}

/// A capture device that applies a `RetryPolicy` to every capture.
pub struct RetryingCapture<D> {
    device: D,
    policy: RetryPolicy,
}

impl<D: CaptureDevice> RetryingCapture<D> {
    pub fn new(device: D, policy: RetryPolicy) -> Self {
        Self { device, policy }
    }

    pub fn inner(&self) -> &D {
        &self.device
    }
}

impl<D: CaptureDevice> CaptureDevice for RetryingCapture<D> {
    fn device_id(&self) -> &str {
        self.device.device_id()
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let device = &mut self.device;
        self.policy.run(|_| device.capture())
    }
}
