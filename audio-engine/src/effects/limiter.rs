use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

struct LimiterReader {
    upstream: Box<dyn Reader>,
    start_frame: i64,
    /// `-1` means "until upstream EOS".
    end_frame: i64,
    position: i64,
}

impl Reader for LimiterReader {
    fn specs(&self) -> Specs {
        self.upstream.specs()
    }

    fn is_seekable(&self) -> bool {
        self.upstream.is_seekable()
    }

    fn length(&self) -> i64 {
        if self.end_frame < 0 {
            UNKNOWN_LENGTH
        } else {
            self.end_frame - self.start_frame
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
        self.upstream.seek(self.start_frame + self.position)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let window_remaining = if self.end_frame < 0 {
            len
        } else {
            let remaining = self.end_frame - (self.start_frame + self.position);
            if remaining <= 0 {
                *eos = true;
                return 0;
            }
            len.min(remaining as usize)
        };

        let produced = self.upstream.read(window_remaining, eos, out);
        self.position += produced as i64;
        if self.end_frame >= 0 && self.start_frame + self.position >= self.end_frame {
            *eos = true;
        }
        produced
    }
}

/// Restricts playback to `[start, end)` seconds of the upstream timeline.
/// `end < 0` means "until upstream EOS".
pub struct Limiter {
    upstream: Arc<dyn Sound>,
    start: f64,
    end: f64,
}

impl Limiter {
    pub fn new(upstream: Arc<dyn Sound>, start: f64, end: f64) -> Arc<dyn Sound> {
        Arc::new(Limiter { upstream, start, end })
    }
}

impl Sound for Limiter {
    fn create_reader(&self) -> Box<dyn Reader> {
        let mut upstream = self.upstream.create_reader();
        let rate = upstream.specs().rate;
        let start_frame = (self.start * rate).round().max(0.0) as i64;
        let end_frame = if self.end < 0.0 {
            -1
        } else {
            (self.end * rate).round().max(0.0) as i64
        };
        upstream.seek(start_frame);
        Box::new(LimiterReader { upstream, start_frame, end_frame, position: 0 })
    }
}
