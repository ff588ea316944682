use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

struct VolumeReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    gain: f32,
}

impl Reader for VolumeReader {
    fn specs(&self) -> Specs {
        self.upstream.specs()
    }
    fn is_seekable(&self) -> bool {
        self.upstream.is_seekable()
    }
    fn length(&self) -> i64 {
        self.upstream.length()
    }
    fn position(&self) -> i64 {
        self.upstream.position()
    }
    fn seek(&mut self, position: i64) -> bool {
        self.upstream.seek(position)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        let n = produced * self.channels;
        for s in &mut out[..n] {
            *s *= self.gain;
        }
        produced
    }
}

/// Multiplies every sample by a fixed scalar. Not clamped: callers choose
/// safe gain values.
pub struct Volume {
    upstream: Arc<dyn Sound>,
    gain: f32,
}

impl Volume {
    pub fn new(upstream: Arc<dyn Sound>, gain: f32) -> Arc<dyn Sound> {
        Arc::new(Volume { upstream, gain })
    }
}

impl Sound for Volume {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        Box::new(VolumeReader { upstream, channels, gain: self.gain })
    }
}
