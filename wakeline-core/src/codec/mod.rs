//! Codec resource arbiter.
//!
//! The board has one audio codec shared by capture, wake word, tones, TTS and
//! music. `CodecArbiter` is the only thing allowed to open or close its paths.
//! Every operation runs to completion under one mutex, so a caller (or a
//! `snapshot`) never sees a half-applied configuration.
//!
//! Path ordering on a full reconfigure:
//!
//! ```text
//! close record → close playback → open playback → open record → restore volume
//! ```
//!
//! Opening the output path resets the hardware gain registers, so the last
//! configured volume is re-applied after every playback open.
//!
//! Anything written to the speaker through the arbiter is also pushed into
//! the reference ring for the echo canceller.

pub mod sim;

pub use sim::{CodecOp, SimCodec};

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    buffering::{frame::FRONT_END_SAMPLE_RATE, ReferenceWriter},
    error::{Result, WakelineError},
};

/// Output volume used when nothing else has been configured.
pub const DEFAULT_VOLUME: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Mono,
    Stereo,
}

impl ChannelMode {
    pub fn count(self) -> u16 {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        }
    }
}

/// One codec path configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecFormat {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: ChannelMode,
}

impl CodecFormat {
    /// The front-end format: 16 kHz, 16-bit, mono.
    pub const VOICE: CodecFormat = CodecFormat {
        sample_rate: FRONT_END_SAMPLE_RATE,
        bit_depth: 16,
        channels: ChannelMode::Mono,
    };

    pub const fn new(sample_rate: u32, bit_depth: u16, channels: ChannelMode) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
        }
    }

    /// Bytes of PCM per second of audio.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * (self.bit_depth as u64 / 8) * self.channels.count() as u64
    }
}

/// Hardware access. Implemented by the board support layer.
///
/// The arbiter serialises all calls; implementations need not lock.
pub trait CodecDriver: Send + Sync + 'static {
    fn open_record(&self, format: CodecFormat) -> Result<()>;
    fn close_record(&self) -> Result<()>;
    fn open_playback(&self, format: CodecFormat) -> Result<()>;
    fn close_playback(&self) -> Result<()>;
    /// Output volume, 0–100.
    fn set_output_volume(&self, volume: u8) -> Result<()>;
    /// Blocking PCM write to the output path. Returns bytes accepted.
    fn write(&self, pcm: &[u8]) -> Result<usize>;
    fn set_mute(&self, mute: bool) -> Result<()>;
}

/// Atomic view of the codec configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecSnapshot {
    pub record: Option<CodecFormat>,
    pub playback: Option<CodecFormat>,
    pub volume: u8,
    pub muted: bool,
}

#[derive(Debug)]
struct CodecState {
    record: Option<CodecFormat>,
    playback: Option<CodecFormat>,
    volume: u8,
    muted: bool,
}

pub struct CodecArbiter {
    driver: Arc<dyn CodecDriver>,
    state: Mutex<CodecState>,
    reference: Mutex<Option<ReferenceWriter>>,
}

impl CodecArbiter {
    pub fn new(driver: Arc<dyn CodecDriver>) -> Self {
        Self {
            driver,
            state: Mutex::new(CodecState {
                record: None,
                playback: None,
                volume: DEFAULT_VOLUME,
                muted: false,
            }),
            reference: Mutex::new(None),
        }
    }

    /// Attach the producer half of the AEC reference ring.
    pub fn attach_reference(&self, writer: ReferenceWriter) {
        *self.reference.lock() = Some(writer);
    }

    /// Full reconfigure of both paths to `format`.
    ///
    /// On failure the state reflects whatever is actually open.
    pub fn reconfigure(&self, format: CodecFormat) -> Result<()> {
        let mut st = self.state.lock();
        if st.record == Some(format) && st.playback == Some(format) {
            debug!(?format, "codec already configured");
            return Ok(());
        }

        if st.record.is_some() {
            self.driver.close_record()?;
            st.record = None;
        }
        if st.playback.is_some() {
            self.driver.close_playback()?;
            st.playback = None;
        }

        self.driver.open_playback(format)?;
        st.playback = Some(format);
        self.driver.open_record(format)?;
        st.record = Some(format);

        if let Err(e) = self.driver.set_output_volume(st.volume) {
            warn!("failed to restore output volume after reconfigure: {e}");
        }
        info!(
            sample_rate = format.sample_rate,
            bit_depth = format.bit_depth,
            channels = format.channels.count(),
            volume = st.volume,
            "codec reconfigured"
        );
        Ok(())
    }

    /// Reopen only the output path (tones, TTS). Record is left as is.
    pub fn open_playback_only(&self, format: CodecFormat) -> Result<()> {
        let mut st = self.state.lock();
        if st.playback.is_some() {
            self.driver.close_playback()?;
            st.playback = None;
        }
        self.driver.open_playback(format)?;
        st.playback = Some(format);
        if let Err(e) = self.driver.set_output_volume(st.volume) {
            warn!("failed to restore output volume after playback open: {e}");
        }
        debug!(?format, "playback path opened");
        Ok(())
    }

    /// Write PCM to the speaker and tap it into the echo reference.
    pub fn write(&self, pcm: &[u8]) -> Result<usize> {
        let st = self.state.lock();
        let Some(format) = st.playback else {
            return Err(WakelineError::CodecClosed("playback"));
        };
        let written = self.driver.write(pcm)?;
        drop(st);

        // The echo canceller only understands the front-end format.
        if format == CodecFormat::VOICE {
            if let Some(reference) = self.reference.lock().as_mut() {
                reference.write(&pcm[..written]);
            }
        }
        Ok(written)
    }

    pub fn set_volume(&self, volume: u8) -> Result<()> {
        let volume = volume.min(100);
        let mut st = self.state.lock();
        st.volume = volume;
        if st.playback.is_some() {
            self.driver.set_output_volume(volume)?;
        }
        Ok(())
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().volume
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        let mut st = self.state.lock();
        self.driver.set_mute(mute)?;
        st.muted = mute;
        Ok(())
    }

    pub fn snapshot(&self) -> CodecSnapshot {
        let st = self.state.lock();
        CodecSnapshot {
            record: st.record,
            playback: st.playback,
            volume: st.volume,
            muted: st.muted,
        }
    }

    /// Close both paths, record first.
    pub fn close_all(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.record.is_some() {
            self.driver.close_record()?;
            st.record = None;
        }
        if st.playback.is_some() {
            self.driver.close_playback()?;
            st.playback = None;
        }
        info!("codec closed");
        Ok(())
    }

    /// Back to the voice format on both paths.
    pub fn resume_default(&self) -> Result<()> {
        self.reconfigure(CodecFormat::VOICE)
    }
}

impl std::fmt::Debug for CodecArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecArbiter")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_reference_buffer;

    fn arbiter() -> (CodecArbiter, Arc<SimCodec>) {
        let sim = Arc::new(SimCodec::new());
        (CodecArbiter::new(sim.clone()), sim)
    }

    const TTS: CodecFormat = CodecFormat::new(24_000, 16, ChannelMode::Mono);

    #[test]
    fn reconfigure_orders_close_and_open() {
        let (arb, sim) = arbiter();
        arb.reconfigure(CodecFormat::VOICE).unwrap();
        sim.take_ops();

        arb.reconfigure(TTS).unwrap();
        assert_eq!(
            sim.take_ops(),
            vec![
                CodecOp::CloseRecord,
                CodecOp::ClosePlayback,
                CodecOp::OpenPlayback(TTS),
                CodecOp::OpenRecord(TTS),
                CodecOp::Volume(DEFAULT_VOLUME),
            ]
        );
    }

    #[test]
    fn open_playback_only_leaves_record_alone() {
        let (arb, sim) = arbiter();
        arb.reconfigure(CodecFormat::VOICE).unwrap();
        arb.set_volume(55).unwrap();
        sim.take_ops();

        arb.open_playback_only(TTS).unwrap();
        assert_eq!(
            sim.take_ops(),
            vec![
                CodecOp::ClosePlayback,
                CodecOp::OpenPlayback(TTS),
                CodecOp::Volume(55),
            ]
        );
        let snap = arb.snapshot();
        assert_eq!(snap.record, Some(CodecFormat::VOICE));
        assert_eq!(snap.playback, Some(TTS));
    }

    #[test]
    fn write_requires_open_playback() {
        let (arb, _sim) = arbiter();
        assert!(matches!(
            arb.write(&[0, 0]),
            Err(WakelineError::CodecClosed("playback"))
        ));
    }

    #[test]
    fn voice_writes_feed_the_echo_reference() {
        let (arb, _sim) = arbiter();
        let (w, mut r) = create_reference_buffer(64);
        arb.attach_reference(w);
        arb.reconfigure(CodecFormat::VOICE).unwrap();
        arb.write(&[1, 0, 2, 0]).unwrap();
        assert_eq!(r.available(), 4);

        arb.open_playback_only(TTS).unwrap();
        arb.write(&[3, 0]).unwrap();
        assert_eq!(r.available(), 4);
    }

    #[test]
    fn failed_open_leaves_consistent_state() {
        let (arb, sim) = arbiter();
        sim.fail_next_open_record();
        assert!(arb.reconfigure(CodecFormat::VOICE).is_err());
        let snap = arb.snapshot();
        assert_eq!(snap.record, None);
        assert_eq!(snap.playback, Some(CodecFormat::VOICE));
        // A retry closes the half-open playback path first.
        arb.reconfigure(CodecFormat::VOICE).unwrap();
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn volume_is_clamped_and_only_applied_when_open() {
        let (arb, sim) = arbiter();
        arb.set_volume(250).unwrap();
        assert_eq!(arb.volume(), 100);
        assert!(sim.take_ops().is_empty());
    }

    #[test]
    fn close_all_then_resume_default() {
        let (arb, _sim) = arbiter();
        arb.reconfigure(TTS).unwrap();
        arb.close_all().unwrap();
        assert_eq!(arb.snapshot().record, None);
        arb.resume_default().unwrap();
        assert_eq!(arb.snapshot().record, Some(CodecFormat::VOICE));
    }
}
