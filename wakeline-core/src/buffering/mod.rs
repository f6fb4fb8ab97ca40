//! Reference-audio ring buffer (AEC reference tap).
//!
//! Whatever the playback path writes to the speaker is also pushed here so the
//! capture feed worker can hand the echo canceller a matching reference frame.
//!
//! Uses `ringbuf::HeapRb<u8>` split into a producer (playback path) and a
//! consumer (feed worker). The halves only share atomic head/tail positions,
//! so neither side ever takes a lock or blocks.

pub mod frame;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Capacity: 0.5 s of 16 kHz mono 16-bit audio. Sized to absorb scheduling
/// jitter between the playback writer and the capture feed worker.
pub const REFERENCE_CAPACITY: usize = 16_000;

/// Counters shared by both halves.
#[derive(Debug, Default)]
pub struct ReferenceStats {
    pub bytes_written: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_zero_filled: AtomicU64,
}

/// Producer half, held by the playback path.
pub struct ReferenceWriter {
    prod: HeapProd<u8>,
    stats: Arc<ReferenceStats>,
}

/// Consumer half, held by the capture feed worker.
pub struct ReferenceReader {
    cons: HeapCons<u8>,
    scratch: Vec<u8>,
    stats: Arc<ReferenceStats>,
}

/// Create a matched writer/reader pair over a heap ring of `capacity` bytes.
pub fn create_reference_buffer(capacity: usize) -> (ReferenceWriter, ReferenceReader) {
    // Round down to whole 16-bit samples so a full ring never holds half a sample.
    let capacity = (capacity & !1).max(2);
    let (prod, cons) = HeapRb::<u8>::new(capacity).split();
    let stats = Arc::new(ReferenceStats::default());
    (
        ReferenceWriter {
            prod,
            stats: Arc::clone(&stats),
        },
        ReferenceReader {
            cons,
            scratch: Vec::new(),
            stats,
        },
    )
}

impl ReferenceWriter {
    /// Best-effort, non-blocking write.
    ///
    /// Only whole samples are stored. When the ring is full the newest bytes
    /// are dropped; the playback path is never stalled.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let room = self.prod.vacant_len() & !1;
        let take = bytes.len().min(room) & !1;
        let written = if take > 0 {
            self.prod.push_slice(&bytes[..take])
        } else {
            0
        };
        self.stats
            .bytes_written
            .fetch_add(written as u64, Ordering::Relaxed);
        let dropped = bytes.len() - written;
        if dropped > 0 {
            self.stats
                .bytes_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }

    /// Convenience for i16 PCM producers.
    pub fn write_samples(&mut self, samples: &[i16]) -> usize {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.write(&bytes)
    }

    pub fn stats(&self) -> Arc<ReferenceStats> {
        Arc::clone(&self.stats)
    }
}

impl ReferenceReader {
    /// Fill `dest` completely: real reference bytes first, silence after.
    ///
    /// Returns how many of the bytes were real reference audio. Never blocks
    /// and never signals an error.
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }
        let n = self.cons.pop_slice(dest);
        dest[n..].fill(0);
        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        if n < dest.len() {
            self.stats
                .bytes_zero_filled
                .fetch_add((dest.len() - n) as u64, Ordering::Relaxed);
        }
        n
    }

    /// Fill `dest` with reference samples (zero-filled on shortfall).
    ///
    /// Returns the number of real samples delivered.
    pub fn read_samples(&mut self, dest: &mut [i16]) -> usize {
        let byte_len = dest.len() * 2;
        if self.scratch.len() < byte_len {
            self.scratch.resize(byte_len, 0);
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        let n = self.read(&mut scratch[..byte_len]);
        for (sample, pair) in dest.iter_mut().zip(scratch[..byte_len].chunks_exact(2)) {
            *sample = i16::from_le_bytes([pair[0], pair[1]]);
        }
        self.scratch = scratch;
        n / 2
    }

    /// Discard anything buffered (e.g. stale audio from before a mode switch).
    pub fn clear(&mut self) -> usize {
        self.cons.clear()
    }

    pub fn available(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn stats(&self) -> Arc<ReferenceStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_zero_fills_when_empty() {
        let (_w, mut r) = create_reference_buffer(64);
        let mut dest = [0xAAu8; 16];
        assert_eq!(r.read(&mut dest), 0);
        assert!(dest.iter().all(|b| *b == 0));
    }

    #[test]
    fn read_always_fills_requested_length() {
        let (mut w, mut r) = create_reference_buffer(64);
        w.write(&[1, 2, 3, 4]);
        let mut dest = [0xFFu8; 10];
        let real = r.read(&mut dest);
        assert_eq!(real, 4);
        assert_eq!(&dest[..4], &[1, 2, 3, 4]);
        assert_eq!(&dest[4..], &[0; 6]);
    }

    #[test]
    fn full_ring_drops_newest_without_blocking() {
        let (mut w, mut r) = create_reference_buffer(8);
        assert_eq!(w.write(&[1, 1, 2, 2, 3, 3]), 6);
        // Only two bytes of room left: the tail of this write is dropped.
        assert_eq!(w.write(&[4, 4, 5, 5]), 2);
        assert_eq!(w.stats().bytes_dropped.load(Ordering::Relaxed), 2);

        let mut dest = [0u8; 8];
        assert_eq!(r.read(&mut dest), 8);
        assert_eq!(dest, [1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn odd_writes_never_store_half_samples() {
        let (mut w, mut r) = create_reference_buffer(16);
        assert_eq!(w.write(&[9, 9, 9]), 2);
        assert_eq!(r.available(), 2);
    }

    #[test]
    fn read_samples_round_trips_pcm() {
        let (mut w, mut r) = create_reference_buffer(64);
        w.write_samples(&[100, -200, 300]);
        let mut out = [7i16; 5];
        assert_eq!(r.read_samples(&mut out), 3);
        assert_eq!(out, [100, -200, 300, 0, 0]);
    }

    #[test]
    fn writer_and_reader_work_across_threads() {
        let (mut w, mut r) = create_reference_buffer(REFERENCE_CAPACITY);
        let writer = std::thread::spawn(move || {
            for _ in 0..200 {
                w.write(&[1u8; 320]);
            }
        });
        let mut dest = vec![0u8; 1024];
        for _ in 0..200 {
            let n = r.read(&mut dest);
            assert!(n <= dest.len());
            assert_eq!(n % 2, 0);
        }
        writer.join().expect("writer thread panicked");
    }
}
