//! Placeholder backends used when no model is loaded, and in tests.

use tracing::debug;

use super::{Detection, FrontEnd, FrontEndAnnotations, WakeWordDetector};

/// Front end that forwards the microphone unchanged.
#[derive(Debug, Default)]
pub struct PassthroughFrontEnd;

impl FrontEnd for PassthroughFrontEnd {
    fn process(
        &mut self,
        mic: &[i16],
        _reference: &[i16],
        out: &mut Vec<i16>,
    ) -> FrontEndAnnotations {
        out.clear();
        out.extend_from_slice(mic);
        FrontEndAnnotations::default()
    }
}

/// Crude echo suppression: subtract a scaled copy of the speaker reference.
///
/// Only useful when mic and reference are already time-aligned (e.g. the
/// simulated board), but it keeps the reference path exercised end to end.
#[derive(Debug, Clone)]
pub struct ReferenceSubtractFrontEnd {
    /// Echo path gain in [0, 1].
    pub echo_gain: f32,
}

impl Default for ReferenceSubtractFrontEnd {
    fn default() -> Self {
        Self { echo_gain: 1.0 }
    }
}

impl FrontEnd for ReferenceSubtractFrontEnd {
    fn process(&mut self, mic: &[i16], reference: &[i16], out: &mut Vec<i16>) -> FrontEndAnnotations {
        out.clear();
        out.extend(mic.iter().zip(reference.iter().chain(std::iter::repeat(&0))).map(
            |(m, r)| {
                let v = *m as f32 - *r as f32 * self.echo_gain;
                v.clamp(i16::MIN as f32, i16::MAX as f32) as i16
            },
        ));
        FrontEndAnnotations::default()
    }
}

/// Detector that never fires. Wake-word mode still runs (and can still be
/// exercised), the assistant is just only reachable via a manual trigger.
#[derive(Debug, Default)]
pub struct NeverWake;

impl WakeWordDetector for NeverWake {
    fn detect(&mut self, _samples: &[i16]) -> Detection {
        Detection::Miss
    }

    fn set_threshold(&mut self, threshold: f32) {
        debug!(threshold, "NeverWake ignores threshold updates");
    }

    fn reset(&mut self) {}
}
