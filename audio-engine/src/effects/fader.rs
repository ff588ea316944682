use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaderKind {
    In,
    Out,
}

fn gain(kind: FaderKind, frame: i64, start: i64, length: i64) -> f32 {
    if frame < start {
        return if kind == FaderKind::In { 0.0 } else { 1.0 };
    }
    if length <= 0 || frame >= start + length {
        return if kind == FaderKind::In { 1.0 } else { 0.0 };
    }
    let t = (frame - start) as f64 / length as f64;
    match kind {
        FaderKind::In => t as f32,
        FaderKind::Out => (1.0 - t) as f32,
    }
}

struct FaderReader {
    upstream: Box<dyn Reader>,
    kind: FaderKind,
    channels: usize,
    start_frame: i64,
    length_frames: i64,
    position: i64,
}

impl Reader for FaderReader {
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
        self.position
    }
    fn seek(&mut self, position: i64) -> bool {
        if self.upstream.seek(position) {
            self.position = position;
            true
        } else {
            false
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        for frame in 0..produced {
            let g = gain(self.kind, self.position + frame as i64, self.start_frame, self.length_frames);
            let base = frame * self.channels;
            for c in 0..self.channels {
                out[base + c] *= g;
            }
        }
        self.position += produced as i64;
        produced
    }
}

/// Linear fade-in or fade-out window applied over `[start, start+length)`
/// seconds of upstream time.
pub struct Fader {
    upstream: Arc<dyn Sound>,
    kind: FaderKind,
    start: f64,
    length: f64,
}

impl Fader {
    pub fn new(upstream: Arc<dyn Sound>, kind: FaderKind, start: f64, length: f64) -> Arc<dyn Sound> {
        Arc::new(Fader { upstream, kind, start, length })
    }
}

impl Sound for Fader {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let rate = upstream.specs().rate;
        let channels = upstream.specs().channels.channel_count() as usize;
        Box::new(FaderReader {
            upstream,
            kind: self.kind,
            channels,
            start_frame: (self.start * rate).round().max(0.0) as i64,
            length_frames: (self.length * rate).round().max(0.0) as i64,
            position: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_in_ramps_zero_to_one() {
        assert_eq!(gain(FaderKind::In, 0, 0, 100), 0.0);
        assert_eq!(gain(FaderKind::In, 50, 0, 100), 0.5);
        assert_eq!(gain(FaderKind::In, 100, 0, 100), 1.0);
    }

    #[test]
    fn fade_out_ramps_one_to_zero() {
        assert_eq!(gain(FaderKind::Out, 0, 0, 100), 1.0);
        assert_eq!(gain(FaderKind::Out, 50, 0, 100), 0.5);
        assert_eq!(gain(FaderKind::Out, 100, 0, 100), 0.0);
    }
}
