//! Per-sample envelope/analysis effects (§4.3). Grounded on
//! `original_source/include/fx/{Accumulator,Square,Rectify}.h`: these are
//! thin per-sample filters historically hosted in a generic callback-IIR
//! reader; here each gets its own small stateful [`Reader`].

use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

macro_rules! passthrough_reader_meta {
    () => {
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
    };
}

struct SumReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    running: Vec<f32>,
}

impl Reader for SumReader {
    passthrough_reader_meta!();

    fn seek(&mut self, position: i64) -> bool {
        if self.upstream.seek(position) {
            self.running.iter_mut().for_each(|v| *v = 0.0);
            true
        } else {
            false
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        for frame in 0..produced {
            let base = frame * self.channels;
            for c in 0..self.channels {
                self.running[c] += out[base + c];
                out[base + c] = self.running[c];
            }
        }
        produced
    }
}

/// Running per-channel sum: `out[n] = out[n-1] + in[n]`.
pub struct Sum {
    upstream: Arc<dyn Sound>,
}

impl Sum {
    pub fn new(upstream: Arc<dyn Sound>) -> Arc<dyn Sound> {
        Arc::new(Sum { upstream })
    }
}

impl Sound for Sum {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        Box::new(SumReader { upstream, channels, running: vec![0.0; channels] })
    }
}

struct AccumulatorReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    additive: bool,
    last_input: Vec<f32>,
    last_output: Vec<f32>,
}

impl Reader for AccumulatorReader {
    passthrough_reader_meta!();

    fn seek(&mut self, position: i64) -> bool {
        if self.upstream.seek(position) {
            self.last_input.iter_mut().for_each(|v| *v = 0.0);
            self.last_output.iter_mut().for_each(|v| *v = 0.0);
            true
        } else {
            false
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        for frame in 0..produced {
            let base = frame * self.channels;
            for c in 0..self.channels {
                let input = out[base + c];
                let diff = input - self.last_input[c];
                let mut output = self.last_output[c];
                if self.additive {
                    output += diff;
                }
                if diff > 0.0 {
                    output += diff;
                }
                self.last_input[c] = input;
                self.last_output[c] = output;
                out[base + c] = output;
            }
        }
        produced
    }
}

/// Adds the positive difference from the previous sample onto the running
/// output; in additive mode the (possibly negative) difference is always
/// added as well, so a positive step gets added twice.
pub struct Accumulator {
    upstream: Arc<dyn Sound>,
    additive: bool,
}

impl Accumulator {
    pub fn new(upstream: Arc<dyn Sound>, additive: bool) -> Arc<dyn Sound> {
        Arc::new(Accumulator { upstream, additive })
    }
}

impl Sound for Accumulator {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        Box::new(AccumulatorReader {
            upstream,
            channels,
            additive: self.additive,
            last_input: vec![0.0; channels],
            last_output: vec![0.0; channels],
        })
    }
}

struct ThresholdReader {
    upstream: Box<dyn Reader>,
    threshold: f32,
}

impl Reader for ThresholdReader {
    passthrough_reader_meta!();
    fn seek(&mut self, position: i64) -> bool {
        self.upstream.seek(position)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        let channels = self.upstream.specs().channels.channel_count() as usize;
        for s in &mut out[..produced * channels] {
            *s = if s.abs() >= self.threshold { 1.0 } else { 0.0 };
        }
        produced
    }
}

/// Binarises the signal: `1.0` where `|x| >= threshold`, else `0.0`.
pub struct Threshold {
    upstream: Arc<dyn Sound>,
    threshold: f32,
}

impl Threshold {
    pub fn new(upstream: Arc<dyn Sound>, threshold: f32) -> Arc<dyn Sound> {
        Arc::new(Threshold { upstream, threshold })
    }
}

impl Sound for Threshold {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(ThresholdReader { upstream: self.upstream.create_reader(), threshold: self.threshold })
    }
}

struct RectifyReader {
    upstream: Box<dyn Reader>,
}

impl Reader for RectifyReader {
    passthrough_reader_meta!();
    fn seek(&mut self, position: i64) -> bool {
        self.upstream.seek(position)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        let channels = self.upstream.specs().channels.channel_count() as usize;
        for s in &mut out[..produced * channels] {
            *s = s.abs();
        }
        produced
    }
}

/// Full-wave rectifier: `out = |in|`.
pub struct Rectify {
    upstream: Arc<dyn Sound>,
}

impl Rectify {
    pub fn new(upstream: Arc<dyn Sound>) -> Arc<dyn Sound> {
        Arc::new(Rectify { upstream })
    }
}

impl Sound for Rectify {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(RectifyReader { upstream: self.upstream.create_reader() })
    }
}

struct SquareShaperReader {
    upstream: Box<dyn Reader>,
    threshold: f32,
}

impl Reader for SquareShaperReader {
    passthrough_reader_meta!();
    fn seek(&mut self, position: i64) -> bool {
        self.upstream.seek(position)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let produced = self.upstream.read(len, eos, out);
        let channels = self.upstream.specs().channels.channel_count() as usize;
        for s in &mut out[..produced * channels] {
            *s = if *s >= self.threshold {
                1.0
            } else if *s <= -self.threshold {
                -1.0
            } else {
                0.0
            };
        }
        produced
    }
}

/// Hard-clips the signal to `{-1, 0, 1}` around a symmetric threshold
/// (`original_source/src/fx/Square.cpp`).
pub struct SquareShaper {
    upstream: Arc<dyn Sound>,
    threshold: f32,
}

impl SquareShaper {
    pub fn new(upstream: Arc<dyn Sound>, threshold: f32) -> Arc<dyn Sound> {
        Arc::new(SquareShaper { upstream, threshold })
    }
}

impl Sound for SquareShaper {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(SquareShaperReader { upstream: self.upstream.create_reader(), threshold: self.threshold })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;

    #[test]
    fn square_shaper_is_tri_state() {
        let sound = SquareShaper::new(Generator::sine(1000.0, 48_000.0), 0.1);
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![0.0f32; 512];
        r.read(512, &mut eos, &mut buf);
        assert!(buf.iter().all(|&s| s == -1.0 || s == 0.0 || s == 1.0));
    }

    #[test]
    fn rectify_is_nonnegative() {
        let sound = Rectify::new(Generator::sine(440.0, 48_000.0));
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![0.0f32; 256];
        r.read(256, &mut eos, &mut buf);
        assert!(buf.iter().all(|&s| s >= 0.0));
    }
}
