//! Generators and the opaque file-source adapter (§4.2, C3).
//!
//! Generators are infinite, seekable mono sources. Seeking sets the phase
//! accumulator directly from the target sample index so that
//! `seek(p); read(n)` reproduces the same samples as draining from `0` to
//! `p + n` (the seek round-trip invariant in §8).

use std::sync::Arc;

use crate::spec::{ChannelLayout, SampleFormat, Specs};
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

fn wave_value(kind: Waveform, phase_fraction: f64) -> f32 {
    // `phase_fraction` is the wrapped position within one period, in [0, 1).
    match kind {
        Waveform::Sine => (2.0 * std::f64::consts::PI * phase_fraction).sin() as f32,
        Waveform::Square => {
            if (2.0 * std::f64::consts::PI * phase_fraction).sin() >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Triangle => (4.0 * (phase_fraction - 0.5).abs() - 1.0) as f32,
        Waveform::Sawtooth => (2.0 * phase_fraction - 1.0) as f32,
    }
}

struct Oscillator {
    kind: Waveform,
    freq: f64,
    rate: f64,
    index: i64,
}

impl Reader for Oscillator {
    fn specs(&self) -> Specs {
        Specs::new(self.rate, ChannelLayout::Mono, SampleFormat::F32)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn length(&self) -> i64 {
        UNKNOWN_LENGTH
    }

    fn position(&self) -> i64 {
        self.index
    }

    fn seek(&mut self, position: i64) -> bool {
        self.index = position.max(0);
        true
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        for i in 0..len {
            let cycles = self.freq * (self.index as f64) / self.rate;
            let frac = cycles.fract();
            let frac = if frac < 0.0 { frac + 1.0 } else { frac };
            out[i] = wave_value(self.kind, frac);
            self.index += 1;
        }
        len
    }
}

/// One of the closed-form waveform generators: sine, square, triangle, or
/// sawtooth, at a fixed frequency and sample rate.
pub struct Generator {
    kind: Waveform,
    freq: f64,
    rate: f64,
}

impl Generator {
    fn mk(kind: Waveform, freq: f64, rate: f64) -> Arc<dyn Sound> {
        Arc::new(Generator { kind, freq, rate })
    }

    pub fn sine(freq: f64, rate: f64) -> Arc<dyn Sound> {
        Self::mk(Waveform::Sine, freq, rate)
    }
    pub fn square(freq: f64, rate: f64) -> Arc<dyn Sound> {
        Self::mk(Waveform::Square, freq, rate)
    }
    pub fn triangle(freq: f64, rate: f64) -> Arc<dyn Sound> {
        Self::mk(Waveform::Triangle, freq, rate)
    }
    pub fn sawtooth(freq: f64, rate: f64) -> Arc<dyn Sound> {
        Self::mk(Waveform::Sawtooth, freq, rate)
    }
}

impl Sound for Generator {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(Oscillator { kind: self.kind, freq: self.freq, rate: self.rate, index: 0 })
    }
}

struct SilenceReader {
    rate: f64,
}

impl Reader for SilenceReader {
    fn specs(&self) -> Specs {
        Specs::new(self.rate, ChannelLayout::Mono, SampleFormat::F32)
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn length(&self) -> i64 {
        UNKNOWN_LENGTH
    }
    fn position(&self) -> i64 {
        0
    }
    fn seek(&mut self, _position: i64) -> bool {
        true
    }
    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        out[..len].fill(0.0);
        len
    }
}

/// Infinite, seekable mono silence.
pub struct Silence {
    rate: f64,
}

impl Silence {
    pub fn new(rate: f64) -> Arc<dyn Sound> {
        Arc::new(Silence { rate })
    }
}

impl Sound for Silence {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(SilenceReader { rate: self.rate })
    }
}

/// One track reported by [`FileSource::query_streams`].
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub specs: Specs,
    pub start: i64,
    pub duration: i64,
}

/// The opaque, host-provided file/container decoder (§4.2). The core never
/// implements container/codec decoding itself; it only consumes this
/// contract. Any type satisfying [`Sound`] plus stream enumeration qualifies.
pub trait FileSource: Sound {
    fn query_streams(&self) -> Vec<StreamInfo>;
}

/// Picks one of several candidate sounds each time a reader is created
/// (supplemental feature grounded on `original_source/include/fx/SoundList.h`).
/// Not part of the real-time read path: the pick happens once, at
/// `create_reader` time, driven by a caller-supplied index function so the
/// core stays free of a hidden RNG dependency.
pub struct SoundList {
    candidates: Vec<Arc<dyn Sound>>,
    picker: Box<dyn Fn(usize) -> usize + Send + Sync>,
}

impl SoundList {
    /// `picker(n)` must return an index in `[0, n)`; it is called once per
    /// `create_reader` with `n = candidates.len()`.
    pub fn new(
        candidates: Vec<Arc<dyn Sound>>,
        picker: impl Fn(usize) -> usize + Send + Sync + 'static,
    ) -> Arc<dyn Sound> {
        Arc::new(SoundList { candidates, picker: Box::new(picker) })
    }
}

impl Sound for SoundList {
    fn create_reader(&self) -> Box<dyn Reader> {
        if self.candidates.is_empty() {
            return Box::new(SilenceReader { rate: 48_000.0 });
        }
        let idx = (self.picker)(self.candidates.len()).min(self.candidates.len() - 1);
        self.candidates[idx].create_reader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_seek_round_trip() {
        let sound = Generator::sine(440.0, 48_000.0);
        let mut direct = sound.create_reader();
        let mut eos = false;
        let mut full = vec![0.0f32; 2000];
        direct.read(2000, &mut eos, &mut full);

        let mut seeked = sound.create_reader();
        seeked.seek(1000);
        let mut tail = vec![0.0f32; 500];
        seeked.read(500, &mut eos, &mut tail);

        assert_eq!(&full[1000..1500], &tail[..]);
    }

    #[test]
    fn square_is_bipolar_unit() {
        let sound = Generator::square(100.0, 48_000.0);
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![0.0f32; 256];
        r.read(256, &mut eos, &mut buf);
        assert!(buf.iter().all(|&s| s == 1.0 || s == -1.0));
    }

    #[test]
    fn silence_is_always_zero() {
        let sound = Silence::new(48_000.0);
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![1.0f32; 64];
        r.read(64, &mut eos, &mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert!(!eos);
    }
}
