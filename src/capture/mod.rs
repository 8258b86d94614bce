//! Screen capture and input for the controlled device.
//!
//! This module provides:
//! - Immutable frames and pixel regions (`Frame`, `Region`)
//! - Device traits and the adb-backed implementation (`CaptureDevice`, `Actuator`)
//! - Bounded capture retries (`RetryPolicy`, `RetryingCapture`)

pub mod device;
pub mod frame;
pub mod retry;

pub use device::{Actuator, AdbDevice, CaptureDevice, DryRunActuator, FileDevice};
pub use frame::{Frame, Region};
pub use retry::{RetryPolicy, RetryingCapture};
