//! Turns classification results into taps and accepted events into sink sends.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use super::sink::EventSink;
use crate::capture::{Actuator, Region};
use crate::detection::{ActionTag, ClassifiedState};
use crate::error::SinkError;
use crate::parse::CandidateEvent;

/// What happened to a state's action in one cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// No action attached, or the tap point fell outside the frame
    None,
    Tapped { x: u32, y: u32 },
    Failed { x: u32, y: u32, reason: String },
}

impl ActionOutcome {
    pub fn tapped(&self) -> bool {
        matches!(self, ActionOutcome::Tapped { .. })
    }
}

pub struct Dispatcher<A, S> {
    actuator: A,
    sink: S,
    rng: StdRng,
}

impl<A: Actuator, S: EventSink> Dispatcher<A, S> {
    pub fn new(actuator: A, sink: S) -> Self {
        Self {
            actuator,
            sink,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed seed for reproducible jitter.
    pub fn with_seed(actuator: A, sink: S, seed: u64) -> Self {
        Self {
            actuator,
            sink,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Picks the screen point for the state's action, or `None` when there is
    /// nothing to tap. This is the only place jitter is applied.
    pub fn resolve_tap(&mut self, state: &ClassifiedState, frame_width: u32, frame_height: u32) -> Option<(u32, u32)> {
        let action = state.action.as_ref()?;
        let point = match action {
            ActionTag::Report => return None,
            ActionTag::TapMatch { jitter } => {
                let bounds = state.matched.as_ref()?.bounds();
                if *jitter {
                    self.random_point(&bounds)?
                } else {
                    bounds.center()
                }
            }
            ActionTag::TapRegion { region } => self.random_point(&region.clamp_to(frame_width, frame_height))?,
            ActionTag::TapPoint { x, y } => (*x, *y),
        };

        if point.0 >= frame_width || point.1 >= frame_height {
            warn!(
                state = %state.state,
                x = point.0,
                y = point.1,
                frame_width,
                frame_height,
                "tap point outside frame"
            );
            return None;
        }
        Some(point)
    }

    fn random_point(&mut self, region: &Region) -> Option<(u32, u32)> {
        if region.is_empty() {
            return None;
        }
        let x = self.rng.gen_range(region.x..region.right());
        let y = self.rng.gen_range(region.y..region.bottom());
        Some((x, y))
    }

    /// Issues at most one tap for the winning state. Tap failures are logged
    /// and reported, never retried.
    pub fn dispatch_action(&mut self, state: &ClassifiedState, frame_width: u32, frame_height: u32) -> ActionOutcome {
        let Some((x, y)) = self.resolve_tap(state, frame_width, frame_height) else {
            return ActionOutcome::None;
        };

        match self.actuator.tap(x, y) {
            Ok(()) => {
                info!(state = %state.state, x, y, "action dispatched");
                ActionOutcome::Tapped { x, y }
            }
            Err(e) => {
                warn!(state = %state.state, error = %e, "tap failed");
                ActionOutcome::Failed {
                    x,
                    y,
                    reason: e.reason,
                }
            }
        }
    }

    /// Forwards one accepted event. A failed send is reported to the caller;
    /// the event stays accepted in the deduplicator.
    pub fn dispatch_event(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
        match self.sink.send(event) {
            Ok(()) => {
                info!(title = %event.title, kingdom = %event.kingdom, x = event.x, y = event.y, "event forwarded");
                Ok(())
            }
            Err(e) => {
                warn!(title = %event.title, kingdom = %event.kingdom, error = %e, "event not delivered");
                Err(e)
            }
        }
    }
}
