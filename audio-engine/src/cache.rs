//! Stream-buffer cache (§4.12).
//!
//! [`StreamBuffer::new`] drains a [`Sound`]'s reader into an owned,
//! interleaved buffer once; every reader created afterwards is a cheap
//! seekable cursor over that buffer rather than a re-decode. Grounded on
//! `asset-manager::streaming_loader`'s drain-into-owned-storage pattern for
//! assets that need repeated, seekable playback.

use std::sync::Arc;

use crate::spec::{Buffer, Specs};
use crate::stream::{Reader, Sound};

const DRAIN_CHUNK_FRAMES: usize = 4096;

struct BufferedReader {
    specs: Specs,
    channels: usize,
    data: Arc<Vec<f32>>,
    frames: usize,
    position: usize,
}

impl Reader for BufferedReader {
    fn specs(&self) -> Specs {
        self.specs
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn length(&self) -> i64 {
        self.frames as i64
    }

    fn position(&self) -> i64 {
        self.position as i64
    }

    fn seek(&mut self, position: i64) -> bool {
        if position < 0 {
            return false;
        }
        self.position = (position as usize).min(self.frames);
        true
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let remaining = self.frames - self.position;
        let produced = len.min(remaining);
        let start = self.position * self.channels;
        let end = start + produced * self.channels;
        out[..produced * self.channels].copy_from_slice(&self.data[start..end]);
        self.position += produced;
        *eos = self.position >= self.frames;
        produced
    }
}

/// A [`Sound`] whose content was fully decoded once at construction and is
/// shared (via `Arc`) across every reader it creates.
pub struct StreamBuffer {
    specs: Specs,
    channels: usize,
    data: Arc<Vec<f32>>,
    frames: usize,
}

impl StreamBuffer {
    pub fn new(sound: Arc<dyn Sound>) -> Arc<dyn Sound> {
        let mut reader = sound.create_reader();
        let specs = reader.specs();
        let channels = specs.channels.channel_count() as usize;

        let mut scratch = Buffer::new();
        let mut data = Vec::new();
        loop {
            scratch.assure_size(DRAIN_CHUNK_FRAMES * channels, false);
            let mut eos = false;
            let produced = reader.read(DRAIN_CHUNK_FRAMES, &mut eos, scratch.as_mut_slice());
            data.extend_from_slice(&scratch.as_slice()[..produced * channels]);
            if eos || produced == 0 {
                break;
            }
        }

        let frames = if channels == 0 { 0 } else { data.len() / channels };
        Arc::new(StreamBuffer { specs, channels, data: Arc::new(data), frames })
    }
}

impl Sound for StreamBuffer {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(BufferedReader {
            specs: self.specs,
            channels: self.channels,
            data: self.data.clone(),
            frames: self.frames,
            position: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Limiter;
    use crate::generators::Generator;

    #[test]
    fn buffered_reader_matches_source_and_is_seekable() {
        let source = Limiter::new(Generator::sine(100.0, 8_000.0), 0.0, 100.0 / 8_000.0);
        let buffered = StreamBuffer::new(source.clone());

        let mut source_reader = source.create_reader();
        let mut buffered_reader = buffered.create_reader();
        assert!(buffered_reader.is_seekable());
        assert_eq!(buffered_reader.length(), 100);

        let mut a_eos = false;
        let mut b_eos = false;
        let mut a = vec![0.0f32; 100];
        let mut b = vec![0.0f32; 100];
        source_reader.read(100, &mut a_eos, &mut a);
        buffered_reader.read(100, &mut b_eos, &mut b);
        assert_eq!(a, b);

        assert!(buffered_reader.seek(10));
        let mut c = vec![0.0f32; 5];
        let mut c_eos = false;
        buffered_reader.read(5, &mut c_eos, &mut c);
        assert_eq!(&c[..], &a[10..15]);
    }
}
