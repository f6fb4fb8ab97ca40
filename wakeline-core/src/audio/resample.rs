//! Host-microphone rate conversion to the 16 kHz front-end rate.
//!
//! Host devices capture at their native rate (commonly 44.1 or 48 kHz) in
//! f32. The front end wants 16 kHz mono i16. `PcmResampler` runs a rubato
//! `FastFixedIn` session on the feed worker and emits saturated i16 PCM.
//! Equal rates skip rubato entirely.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, WakelineError};

/// Converts mono f32 device audio to mono i16 PCM at a fixed target rate.
pub struct PcmResampler {
    /// `None` when device rate == target rate.
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    chunk_size: usize,
    scratch: Vec<Vec<f32>>,
}

impl PcmResampler {
    /// # Errors
    /// Returns `WakelineError::AudioIo` if rubato fails to initialise.
    pub fn new(device_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / device_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| WakelineError::AudioIo(format!("resampler init: {e}")))?;
        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(device_rate, target_rate, chunk_size, "microphone resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            chunk_size,
            scratch,
        })
    }

    /// Feed device samples; append converted PCM to `out`.
    ///
    /// Input is buffered until a full rubato block is available.
    pub fn process(&mut self, samples: &[f32], out: &mut Vec<i16>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend(samples.iter().map(|s| to_pcm(*s)));
            return;
        };

        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_size {
            let block = &self.pending[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_consumed, produced)) => {
                    out.extend(self.scratch[0][..produced].iter().map(|s| to_pcm(*s)));
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.chunk_size);
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// f32 in [-1, 1] → saturated i16.
pub fn to_pcm(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
