use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

struct PitchReader {
    upstream: Box<dyn Reader>,
    factor: f64,
}

impl Reader for PitchReader {
    fn specs(&self) -> Specs {
        let mut s = self.upstream.specs();
        s.rate *= self.factor;
        s
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
        self.upstream.read(len, eos, out)
    }
}

/// Re-labels the upstream's nominal sample rate by `factor`, producing the
/// same samples at a different rate — a pitch shift via rate change.
/// Combine with a resampler to keep the output rate fixed.
pub struct Pitch {
    upstream: Arc<dyn Sound>,
    factor: f64,
}

impl Pitch {
    pub fn new(upstream: Arc<dyn Sound>, factor: f64) -> Arc<dyn Sound> {
        Arc::new(Pitch { upstream, factor })
    }
}

impl Sound for Pitch {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(PitchReader { upstream: self.upstream.create_reader(), factor: self.factor })
    }
}
