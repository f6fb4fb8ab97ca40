//! In-memory codec driver that records every operation.
//!
//! Used by tests and the host binary. It also checks the arbiter's contract:
//! opening a path that is already open, or closing one that is not, counts
//! as a violation.

use std::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::{CodecDriver, CodecFormat};
use crate::error::{Result, WakelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOp {
    OpenRecord(CodecFormat),
    CloseRecord,
    OpenPlayback(CodecFormat),
    ClosePlayback,
    Volume(u8),
    /// Consecutive writes are merged into one entry.
    Write(usize),
    Mute(bool),
}

#[derive(Debug, Default)]
struct SimState {
    ops: Vec<CodecOp>,
    record: Option<CodecFormat>,
    playback: Option<CodecFormat>,
    bytes_written: u64,
}

#[derive(Debug, Default)]
pub struct SimCodec {
    state: Mutex<SimState>,
    violations: AtomicU32,
    fail_open_record: AtomicBool,
    /// Block in `write` for the duration of the audio written.
    realtime: bool,
}

impl SimCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose writes take as long as the audio they carry.
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    pub fn ops(&self) -> Vec<CodecOp> {
        self.state.lock().ops.clone()
    }

    pub fn take_ops(&self) -> Vec<CodecOp> {
        std::mem::take(&mut self.state.lock().ops)
    }

    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Contract violations observed so far.
    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Make the next `open_record` fail.
    pub fn fail_next_open_record(&self) {
        self.fail_open_record.store(true, Ordering::Relaxed);
    }

    fn violation(&self, what: &str) {
        warn!(what, "codec contract violation");
        self.violations.fetch_add(1, Ordering::Relaxed);
    }
}

impl CodecDriver for SimCodec {
    fn open_record(&self, format: CodecFormat) -> Result<()> {
        if self.fail_open_record.swap(false, Ordering::Relaxed) {
            return Err(WakelineError::Codec("simulated record open failure".into()));
        }
        let mut st = self.state.lock();
        if st.record.is_some() {
            self.violation("open_record while open");
        }
        st.record = Some(format);
        st.ops.push(CodecOp::OpenRecord(format));
        Ok(())
    }

    fn close_record(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.record.take().is_none() {
            self.violation("close_record while closed");
        }
        st.ops.push(CodecOp::CloseRecord);
        Ok(())
    }

    fn open_playback(&self, format: CodecFormat) -> Result<()> {
        let mut st = self.state.lock();
        if st.playback.is_some() {
            self.violation("open_playback while open");
        }
        st.playback = Some(format);
        st.ops.push(CodecOp::OpenPlayback(format));
        Ok(())
    }

    fn close_playback(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.playback.take().is_none() {
            self.violation("close_playback while closed");
        }
        st.ops.push(CodecOp::ClosePlayback);
        Ok(())
    }

    fn set_output_volume(&self, volume: u8) -> Result<()> {
        self.state.lock().ops.push(CodecOp::Volume(volume));
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<usize> {
        let byte_rate = {
            let mut st = self.state.lock();
            let Some(format) = st.playback else {
                return Err(WakelineError::CodecClosed("playback"));
            };
            st.bytes_written += pcm.len() as u64;
            match st.ops.last_mut() {
                Some(CodecOp::Write(n)) => *n += pcm.len(),
                _ => st.ops.push(CodecOp::Write(pcm.len())),
            }
            format.byte_rate()
        };
        trace!(bytes = pcm.len(), "sim codec write");
        if self.realtime && byte_rate > 0 {
            thread::sleep(Duration::from_micros(
                pcm.len() as u64 * 1_000_000 / byte_rate,
            ));
        }
        Ok(pcm.len())
    }

    fn set_mute(&self, mute: bool) -> Result<()> {
        self.state.lock().ops.push(CodecOp::Mute(mute));
        Ok(())
    }
}
