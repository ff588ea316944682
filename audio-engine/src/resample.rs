//! Resampling and channel mapping (§4.4, C5).
//!
//! The quality path is grounded on
//! `asset-manager::streaming_loader::ensure_resampler` (planar `rubato`
//! usage, `InterpolationParameters`/`SincFixedIn`); the linear path and the
//! channel mapper have no teacher counterpart and are written directly from
//! the specification in the same reader-wrapper idiom.

use std::sync::Arc;

use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};

use crate::spec::{ChannelLayout, Specs};
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

struct LinearResampleReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    source_rate: f64,
    target_rate: f64,
    /// Input-frame advance per output frame: `source_rate / target_rate`.
    step: f64,
    /// Fractional offset within `[prev, cur)`, normally kept in `[0, 1)`.
    spos: f64,
    prev: Vec<f32>,
    cur: Vec<f32>,
    scratch: Vec<f32>,
    primed: bool,
    upstream_eos: bool,
    position: i64,
}

impl LinearResampleReader {
    fn pull_into_cur(&mut self) -> bool {
        let mut eos = false;
        let got = self.upstream.read(1, &mut eos, &mut self.scratch);
        if got == 1 {
            self.cur.copy_from_slice(&self.scratch[..self.channels]);
            true
        } else {
            false
        }
    }
}

impl Reader for LinearResampleReader {
    fn specs(&self) -> Specs {
        let mut s = self.upstream.specs();
        s.rate = self.target_rate;
        s
    }
    fn is_seekable(&self) -> bool {
        self.upstream.is_seekable()
    }
    fn length(&self) -> i64 {
        let up = self.upstream.length();
        if up == UNKNOWN_LENGTH {
            UNKNOWN_LENGTH
        } else {
            (up as f64 * self.target_rate / self.source_rate).round() as i64
        }
    }
    fn position(&self) -> i64 {
        self.position
    }

    fn seek(&mut self, position: i64) -> bool {
        let input_frame = (position as f64 * self.source_rate / self.target_rate).round() as i64;
        if !self.upstream.seek(input_frame.max(0)) {
            return false;
        }
        self.primed = false;
        self.spos = 0.0;
        self.upstream_eos = false;
        self.position = position;
        true
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        if !self.primed {
            if !self.pull_into_cur() {
                self.upstream_eos = true;
            }
            self.prev.copy_from_slice(&self.cur);
            self.primed = true;
        }

        let mut produced = 0usize;
        while produced < len {
            while self.spos >= 1.0 {
                if self.upstream_eos {
                    break;
                }
                self.prev.copy_from_slice(&self.cur);
                if !self.pull_into_cur() {
                    self.upstream_eos = true;
                    break;
                }
                self.spos -= 1.0;
            }
            if self.upstream_eos && self.spos >= 1.0 {
                *eos = true;
                break;
            }
            let base = produced * self.channels;
            let t = self.spos as f32;
            for c in 0..self.channels {
                out[base + c] = self.prev[c] + t * (self.cur[c] - self.prev[c]);
            }
            self.spos += self.step;
            produced += 1;
        }
        self.position += produced as i64;
        produced
    }
}

/// Linear-interpolation resampler: cheap, used on the real-time playback
/// path when the device rate differs from a voice's rate.
pub struct LinearResample {
    upstream: Arc<dyn Sound>,
    target_rate: f64,
}

impl LinearResample {
    pub fn new(upstream: Arc<dyn Sound>, target_rate: f64) -> Arc<dyn Sound> {
        Arc::new(LinearResample { upstream, target_rate })
    }
}

impl Sound for LinearResample {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let source_rate = upstream.specs().rate;
        let channels = upstream.specs().channels.channel_count() as usize;
        Box::new(LinearResampleReader {
            upstream,
            channels,
            source_rate,
            target_rate: self.target_rate,
            step: source_rate / self.target_rate,
            spos: 0.0,
            prev: vec![0.0; channels],
            cur: vec![0.0; channels],
            scratch: vec![0.0; channels],
            primed: false,
            upstream_eos: false,
            position: 0,
        })
    }
}

const QUALITY_CHUNK_FRAMES: usize = 1024;

struct QualityResampleReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    source_rate: f64,
    target_rate: f64,
    resampler: SincFixedIn<f32>,
    input_planar: Vec<Vec<f32>>,
    interleave_scratch: Vec<f32>,
    output_planar: Vec<Vec<f32>>,
    output_pos: usize,
    upstream_eos: bool,
    drained: bool,
    position: i64,
}

impl QualityResampleReader {
    fn refill(&mut self) {
        if self.upstream_eos {
            return;
        }
        let mut eos = false;
        self.interleave_scratch.clear();
        self.interleave_scratch.resize(QUALITY_CHUNK_FRAMES * self.channels, 0.0);
        let got = self.upstream.read(QUALITY_CHUNK_FRAMES, &mut eos, &mut self.interleave_scratch);

        for plane in &mut self.input_planar {
            plane.clear();
        }
        for f in 0..got {
            for c in 0..self.channels {
                self.input_planar[c].push(self.interleave_scratch[f * self.channels + c]);
            }
        }
        if got < QUALITY_CHUNK_FRAMES {
            for plane in &mut self.input_planar {
                plane.resize(QUALITY_CHUNK_FRAMES, 0.0);
            }
            self.upstream_eos = true;
        }

        match self.resampler.process(&self.input_planar, None) {
            Ok(out) => {
                self.output_planar = out;
                self.output_pos = 0;
            }
            Err(_) => {
                self.output_planar = (0..self.channels).map(|_| Vec::new()).collect();
                self.output_pos = 0;
            }
        }
    }
}

impl Reader for QualityResampleReader {
    fn specs(&self) -> Specs {
        let mut s = self.upstream.specs();
        s.rate = self.target_rate;
        s
    }
    fn is_seekable(&self) -> bool {
        false
    }
    fn length(&self) -> i64 {
        let up = self.upstream.length();
        if up == UNKNOWN_LENGTH {
            UNKNOWN_LENGTH
        } else {
            (up as f64 * self.target_rate / self.source_rate).round() as i64
        }
    }
    fn position(&self) -> i64 {
        self.position
    }
    fn seek(&mut self, _position: i64) -> bool {
        false
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let mut produced = 0usize;
        while produced < len {
            let avail = self.output_planar.first().map_or(0, Vec::len) - self.output_pos;
            if avail == 0 {
                if self.drained {
                    *eos = true;
                    break;
                }
                self.refill();
                let fresh = self.output_planar.first().map_or(0, Vec::len);
                if fresh == 0 {
                    if self.upstream_eos {
                        self.drained = true;
                        *eos = true;
                    }
                    break;
                }
                continue;
            }
            let take = (len - produced).min(avail);
            for f in 0..take {
                for c in 0..self.channels {
                    out[(produced + f) * self.channels + c] = self.output_planar[c][self.output_pos + f];
                }
            }
            self.output_pos += take;
            produced += take;
        }
        self.position += produced as i64;
        produced
    }
}

/// Windowed-sinc (polyphase) resampler for the offline/"quality" rendering
/// path. Not cheaply seekable: rebuild the sound to restart.
pub struct QualityResample {
    upstream: Arc<dyn Sound>,
    target_rate: f64,
}

impl QualityResample {
    pub fn new(upstream: Arc<dyn Sound>, target_rate: f64) -> Arc<dyn Sound> {
        Arc::new(QualityResample { upstream, target_rate })
    }
}

impl Sound for QualityResample {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let specs = upstream.specs();
        let channels = specs.channels.channel_count() as usize;
        let ratio = self.target_rate / specs.rate;

        let params = InterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: InterpolationType::Cubic,
            oversampling_factor: 32,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 0.95, params, QUALITY_CHUNK_FRAMES, channels)
            .expect("failed to create rubato resampler");

        Box::new(QualityResampleReader {
            upstream,
            channels,
            source_rate: specs.rate,
            target_rate: self.target_rate,
            resampler,
            input_planar: vec![Vec::with_capacity(QUALITY_CHUNK_FRAMES); channels],
            interleave_scratch: Vec::new(),
            output_planar: (0..channels).map(|_| Vec::new()).collect(),
            output_pos: 0,
            upstream_eos: false,
            drained: false,
            position: 0,
        })
    }
}

/// Per-pair gain via the cosine-of-half-angle-distance law, normalised so
/// every output channel's contributing gains sum to 1.
fn build_matrix(
    in_layout: ChannelLayout,
    out_layout: ChannelLayout,
    mono_angle_override: Option<f32>,
) -> Vec<Vec<f32>> {
    let mut in_angles = in_layout.channel_angles();
    if in_layout == ChannelLayout::Mono {
        if let Some(angle) = mono_angle_override {
            in_angles[0] = Some(angle);
        }
    }
    let out_angles = out_layout.channel_angles();

    out_angles
        .iter()
        .map(|&out_angle| match out_angle {
            None => {
                let mut row = vec![0.0f32; in_angles.len()];
                if let Some(lfe_in) = in_angles.iter().position(Option::is_none) {
                    row[lfe_in] = 1.0;
                }
                row
            }
            Some(out_deg) => {
                let mut row: Vec<f32> = in_angles
                    .iter()
                    .map(|&in_angle| match in_angle {
                        None => 0.0,
                        Some(in_deg) => {
                            let mut d = (in_deg - out_deg).abs() % 360.0;
                            if d > 180.0 {
                                d = 360.0 - d;
                            }
                            (d.to_radians() / 2.0).cos().max(0.0)
                        }
                    })
                    .collect();
                let sum: f32 = row.iter().sum();
                if sum > 0.0 {
                    row.iter_mut().for_each(|g| *g /= sum);
                }
                row
            }
        })
        .collect()
}

struct ChannelMapperReader {
    upstream: Box<dyn Reader>,
    out_layout: ChannelLayout,
    matrix: Vec<Vec<f32>>,
    scratch_in: Vec<f32>,
}

impl Reader for ChannelMapperReader {
    fn specs(&self) -> Specs {
        let mut s = self.upstream.specs();
        s.channels = self.out_layout;
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
        let n_in = self.matrix.first().map_or(0, Vec::len);
        let n_out = self.matrix.len();
        self.scratch_in.clear();
        self.scratch_in.resize(len * n_in, 0.0);
        let produced = self.upstream.read(len, eos, &mut self.scratch_in);

        for frame in 0..produced {
            let in_base = frame * n_in;
            let out_base = frame * n_out;
            for o in 0..n_out {
                let mut acc = 0.0f32;
                for i in 0..n_in {
                    acc += self.matrix[o][i] * self.scratch_in[in_base + i];
                }
                out[out_base + o] = acc;
            }
        }
        produced
    }
}

/// Converts between channel layouts via an azimuth-derived gain matrix
/// (§4.4). Applied before the device mixer sums voices.
pub struct ChannelMapper {
    upstream: Arc<dyn Sound>,
    out_layout: ChannelLayout,
    mono_angle: Option<f32>,
}

impl ChannelMapper {
    pub fn new(upstream: Arc<dyn Sound>, out_layout: ChannelLayout, mono_angle: Option<f32>) -> Arc<dyn Sound> {
        Arc::new(ChannelMapper { upstream, out_layout, mono_angle })
    }
}

impl Sound for ChannelMapper {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let in_layout = upstream.specs().channels;
        let matrix = build_matrix(in_layout, self.out_layout, self.mono_angle);
        Box::new(ChannelMapperReader { upstream, out_layout: self.out_layout, matrix, scratch_in: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;

    #[test]
    fn stereo_to_mono_to_stereo_preserves_half_amplitude() {
        let rate = 48_000.0;
        // A square wave well below `rate` stays at +1 for the whole window,
        // acting as a constant-amplitude signal.
        let mono_source = Generator::square(0.0001, rate);
        let stereo = ChannelMapper::new(mono_source, ChannelLayout::Stereo, None);
        let mono = ChannelMapper::new(stereo, ChannelLayout::Mono, None);
        let back = ChannelMapper::new(mono, ChannelLayout::Stereo, None);
        let mut r = back.create_reader();
        let mut eos = false;
        let mut buf = vec![0.0f32; 2 * 32];
        r.read(32, &mut eos, &mut buf);
        for frame in buf.chunks(2) {
            assert!((frame[0] - 0.5).abs() < 0.05);
            assert!((frame[1] - 0.5).abs() < 0.05);
        }
    }
}
