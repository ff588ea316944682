use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::spec::Specs;
use crate::stream::{Reader, Sound};

struct ReverseReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    length: i64,
    position: i64,
    scratch: Vec<f32>,
}

impl Reader for ReverseReader {
    fn specs(&self) -> Specs {
        self.upstream.specs()
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn length(&self) -> i64 {
        self.length
    }
    fn position(&self) -> i64 {
        self.position
    }
    fn seek(&mut self, position: i64) -> bool {
        self.position = position.clamp(0, self.length);
        true
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let remaining = self.length - self.position;
        if remaining <= 0 {
            *eos = true;
            return 0;
        }
        let n = (len as i64).min(remaining) as usize;
        let upstream_start = self.length - self.position - n as i64;
        self.upstream.seek(upstream_start);

        self.scratch.clear();
        self.scratch.resize(n * self.channels, 0.0);
        let mut sub_eos = false;
        let got = self.upstream.read(n, &mut sub_eos, &mut self.scratch);

        for frame in 0..got {
            let src = (got - 1 - frame) * self.channels;
            let dst = frame * self.channels;
            out[dst..dst + self.channels].copy_from_slice(&self.scratch[src..src + self.channels]);
        }

        self.position += got as i64;
        *eos = self.position >= self.length;
        got
    }
}

/// Plays a bounded, seekable upstream sound back to front.
pub struct Reverse {
    upstream: Arc<dyn Sound>,
}

impl Reverse {
    /// Fails fast if the upstream is not seekable or has unknown length —
    /// reversing an unbounded stream is not meaningful.
    pub fn new(upstream: Arc<dyn Sound>) -> Result<Arc<dyn Sound>> {
        let probe = upstream.create_reader();
        if !probe.is_seekable() || probe.length() < 0 {
            return Err(EngineError::Specs(
                "Reverse requires a seekable, bounded-length upstream".into(),
            ));
        }
        Ok(Arc::new(Reverse { upstream }))
    }
}

impl Sound for Reverse {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let specs = upstream.specs();
        let length = upstream.length().max(0);
        Box::new(ReverseReader {
            upstream,
            channels: specs.channels.channel_count() as usize,
            length,
            position: 0,
            scratch: Vec::new(),
        })
    }
}
