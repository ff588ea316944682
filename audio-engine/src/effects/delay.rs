use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

struct DelayReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    prefix_frames: i64,
    position: i64,
}

impl Reader for DelayReader {
    fn specs(&self) -> Specs {
        self.upstream.specs()
    }

    fn is_seekable(&self) -> bool {
        self.upstream.is_seekable()
    }

    fn length(&self) -> i64 {
        let up = self.upstream.length();
        if up == UNKNOWN_LENGTH {
            UNKNOWN_LENGTH
        } else {
            self.prefix_frames + up
        }
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn seek(&mut self, position: i64) -> bool {
        if !self.upstream.is_seekable() {
            return false;
        }
        self.position = position.max(0);
        let upstream_pos = (self.position - self.prefix_frames).max(0);
        self.upstream.seek(upstream_pos)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let remaining_prefix = (self.prefix_frames - self.position).max(0) as usize;
        let zero_frames = remaining_prefix.min(len);
        out[..zero_frames * self.channels].fill(0.0);

        let mut produced = zero_frames;
        let want = len - zero_frames;
        if want > 0 {
            let start = zero_frames * self.channels;
            let end = (zero_frames + want) * self.channels;
            produced += self.upstream.read(want, eos, &mut out[start..end]);
        }
        self.position += produced as i64;
        produced
    }
}

/// Prepends `seconds * rate` silent frames ahead of the upstream signal.
pub struct Delay {
    upstream: Arc<dyn Sound>,
    seconds: f64,
}

impl Delay {
    pub fn new(upstream: Arc<dyn Sound>, seconds: f64) -> Arc<dyn Sound> {
        Arc::new(Delay { upstream, seconds })
    }
}

impl Sound for Delay {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let specs = upstream.specs();
        let prefix_frames = (self.seconds * specs.rate).round().max(0.0) as i64;
        Box::new(DelayReader {
            upstream,
            channels: specs.channels.channel_count() as usize,
            prefix_frames,
            position: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;

    #[test]
    fn prefix_is_silent_then_passes_through() {
        let sound = Delay::new(Generator::square(100.0, 1000.0), 0.01); // 10 zero frames
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![9.0f32; 20];
        r.read(20, &mut eos, &mut buf);
        assert!(buf[..10].iter().all(|&s| s == 0.0));
        assert!(buf[10..].iter().any(|&s| s != 0.0));
    }
}
