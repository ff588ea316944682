use std::f64::consts::PI;
use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

/// Normalised direct-form-I biquad coefficients: `a[0]` is always 1 after
/// construction (the raw `a[0]` passed in is treated as `1` if given as
/// `0`, per the upstream convention of leaving it unset).
#[derive(Debug, Clone)]
pub struct Biquad {
    b: Vec<f32>,
    a: Vec<f32>,
}

impl Biquad {
    pub fn new(b: Vec<f32>, a: Vec<f32>) -> Self {
        let divisor = a.first().copied().filter(|&v| v != 0.0).unwrap_or(1.0);
        let b = b.iter().map(|v| v / divisor).collect();
        let a = a.iter().map(|v| v / divisor).collect();
        Self { b, a }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
}

fn rbj_biquad(kind: FilterKind, freq: f64, q: f64, rate: f64) -> Biquad {
    let w0 = 2.0 * PI * freq / rate;
    let (sin_w0, cos_w0) = w0.sin_cos();
    let alpha = sin_w0 / (2.0 * q);

    let (b0, b1, b2, a0, a1, a2) = match kind {
        FilterKind::LowPass => (
            (1.0 - cos_w0) / 2.0,
            1.0 - cos_w0,
            (1.0 - cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        ),
        FilterKind::HighPass => (
            (1.0 + cos_w0) / 2.0,
            -(1.0 + cos_w0),
            (1.0 + cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        ),
        FilterKind::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
    };

    Biquad::new(
        vec![b0 as f32, b1 as f32, b2 as f32],
        vec![a0 as f32, a1 as f32, a2 as f32],
    )
}

struct ChannelHistory {
    x: Vec<f32>,
    y: Vec<f32>,
}

impl ChannelHistory {
    fn new(b_len: usize, a_len: usize) -> Self {
        Self { x: vec![0.0; b_len], y: vec![0.0; a_len.saturating_sub(1)] }
    }

    fn reset(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
        self.y.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Direct-form-I update, shifting history by one sample.
    fn step(&mut self, input: f32, b: &[f32], a: &[f32]) -> f32 {
        self.x.rotate_right(1);
        self.x[0] = input;
        let mut out: f32 = b.iter().zip(self.x.iter()).map(|(c, x)| c * x).sum();
        out -= a[1..].iter().zip(self.y.iter()).map(|(c, y)| c * y).sum::<f32>();
        if !self.y.is_empty() {
            self.y.rotate_right(1);
            self.y[0] = out;
        }
        out
    }
}

struct BiquadReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    coeffs: Biquad,
    history: Vec<ChannelHistory>,
}

impl Reader for BiquadReader {
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
        if self.upstream.seek(position) {
            self.history.iter_mut().for_each(ChannelHistory::reset);
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
                out[base + c] = self.history[c].step(out[base + c], &self.coeffs.b, &self.coeffs.a);
            }
        }
        produced
    }
}

/// Fixed-coefficient direct-form-I biquad IIR filter.
pub struct IirFilter {
    upstream: Arc<dyn Sound>,
    coeffs: Biquad,
}

impl IirFilter {
    pub fn new(upstream: Arc<dyn Sound>, b: Vec<f32>, a: Vec<f32>) -> Arc<dyn Sound> {
        Arc::new(IirFilter { upstream, coeffs: Biquad::new(b, a) })
    }
}

impl Sound for IirFilter {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        let b_len = self.coeffs.b.len();
        let a_len = self.coeffs.a.len();
        Box::new(BiquadReader {
            upstream,
            channels,
            coeffs: self.coeffs.clone(),
            history: (0..channels).map(|_| ChannelHistory::new(b_len, a_len)).collect(),
        })
    }
}

struct DynamicIirReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    kind: FilterKind,
    freq: f64,
    q: f64,
    cached_rate: f64,
    coeffs: Biquad,
    history: Vec<ChannelHistory>,
}

impl Reader for DynamicIirReader {
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
        if self.upstream.seek(position) {
            self.history.iter_mut().for_each(ChannelHistory::reset);
            true
        } else {
            false
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let rate = self.upstream.specs().rate;
        if rate != self.cached_rate {
            self.coeffs = rbj_biquad(self.kind, self.freq, self.q, rate);
            self.cached_rate = rate;
        }

        let produced = self.upstream.read(len, eos, out);
        for frame in 0..produced {
            let base = frame * self.channels;
            for c in 0..self.channels {
                out[base + c] = self.history[c].step(out[base + c], &self.coeffs.b, &self.coeffs.a);
            }
        }
        produced
    }
}

/// Biquad filter whose coefficients are recomputed from `(kind, freq, q)`
/// whenever the upstream sample rate changes, at most once per block.
pub struct DynamicIir {
    upstream: Arc<dyn Sound>,
    kind: FilterKind,
    freq: f64,
    q: f64,
}

impl DynamicIir {
    pub fn new(upstream: Arc<dyn Sound>, kind: FilterKind, freq: f64, q: f64) -> Arc<dyn Sound> {
        Arc::new(DynamicIir { upstream, kind, freq, q })
    }
}

impl Sound for DynamicIir {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        let rate = upstream.specs().rate;
        let coeffs = rbj_biquad(self.kind, self.freq, self.q, rate);
        let history = (0..channels).map(|_| ChannelHistory::new(coeffs.b.len(), coeffs.a.len())).collect();
        Box::new(DynamicIirReader {
            upstream,
            channels,
            kind: self.kind,
            freq: self.freq,
            q: self.q,
            cached_rate: rate,
            coeffs,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;

    #[test]
    fn lowpass_step_response_settles_near_unity() {
        let rate = 48_000.0;
        // A square wave well below `rate` stays in its high (+1) half for
        // the whole test window, acting as a step input.
        let step = Generator::square(1.0, rate);
        let sound = DynamicIir::new(step, FilterKind::LowPass, 0.1 * rate, 0.707);
        let mut r = sound.create_reader();
        let mut eos = false;
        let mut buf = vec![0.0f32; 200];
        r.read(200, &mut eos, &mut buf);
        let tail_avg: f32 = buf[150..].iter().sum::<f32>() / 50.0;
        assert!((tail_avg - 1.0).abs() < 0.05, "tail average {tail_avg} not near 1.0");
    }
}
