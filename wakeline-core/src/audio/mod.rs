//! Microphone input for the capture engine.
//!
//! The feed worker owns exactly one `AudioSource` and drains it continually.
//! Boards plug their codec read path in here; the host build offers a
//! simulated microphone, WAV replay and (feature `audio-cpal`) the default
//! host input device.
//!
//! # Contract
//!
//! `read` must return within roughly `timeout` so the feed worker can observe
//! a stop request promptly. `Ok(0)` means "nothing arrived in time" and is not
//! an error. Transient hardware trouble is reported as
//! `WakelineError::AudioIo`; the worker retries those with backoff.

pub mod agc;
#[cfg(feature = "audio-cpal")]
pub mod cpal_source;
pub mod resample;
pub mod sim;

pub use agc::Agc;
#[cfg(feature = "audio-cpal")]
pub use cpal_source::{list_input_devices, CpalSource};
pub use resample::PcmResampler;
pub use sim::{SimMic, SimSource, WavSource};

use std::time::Duration;

use crate::{buffering::frame::FRONT_END_SAMPLE_RATE, error::Result};

/// Blocking, timeout-bounded source of mono 16-bit PCM.
pub trait AudioSource: Send + 'static {
    /// Read up to `buf.len()` samples, waiting at most `timeout`.
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize>;

    /// Rate of the samples `read` produces.
    fn sample_rate(&self) -> u32 {
        FRONT_END_SAMPLE_RATE
    }
}
