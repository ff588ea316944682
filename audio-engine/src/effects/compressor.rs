use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

const RMS_WINDOW_SECONDS: f64 = 0.02;

struct ChannelState {
    rms_env: f32,
    gain_db: f32,
    lookahead: Vec<f32>,
    lookahead_pos: usize,
}

struct CompressorReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    threshold_db: f32,
    ratio: f32,
    knee_db: f32,
    makeup_db: f32,
    alpha_rms: f32,
    alpha_attack: f32,
    alpha_release: f32,
    lookahead_samples: usize,
    state: Vec<ChannelState>,
}

fn gain_computer(level_db: f32, threshold_db: f32, ratio: f32, knee_db: f32) -> f32 {
    let half_knee = knee_db / 2.0;
    if level_db < threshold_db - half_knee {
        0.0
    } else if level_db > threshold_db + half_knee {
        threshold_db + (level_db - threshold_db) / ratio - level_db
    } else if knee_db > 0.0 {
        let x = level_db - threshold_db + half_knee;
        ((1.0 / ratio - 1.0) * x * x) / (2.0 * knee_db)
    } else {
        0.0
    }
}

impl Reader for CompressorReader {
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
            for s in &mut self.state {
                s.rms_env = 0.0;
                s.gain_db = 0.0;
                s.lookahead.iter_mut().for_each(|v| *v = 0.0);
                s.lookahead_pos = 0;
            }
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
                let x = out[base + c];
                let st = &mut self.state[c];

                st.rms_env = self.alpha_rms * st.rms_env + (1.0 - self.alpha_rms) * x * x;
                let level_db = 10.0 * (st.rms_env + 1e-10).log10();
                let target_db = gain_computer(level_db, self.threshold_db, self.ratio, self.knee_db);

                let alpha = if target_db < st.gain_db { self.alpha_attack } else { self.alpha_release };
                st.gain_db = alpha * st.gain_db + (1.0 - alpha) * target_db;

                let gain_lin = 10f32.powf((st.gain_db + self.makeup_db) / 20.0);

                let delayed = if self.lookahead_samples > 0 {
                    let read_pos = st.lookahead_pos;
                    let delayed = st.lookahead[read_pos];
                    st.lookahead[read_pos] = x;
                    st.lookahead_pos = (st.lookahead_pos + 1) % st.lookahead.len();
                    delayed
                } else {
                    x
                };

                out[base + c] = delayed * gain_lin;
            }
        }
        produced
    }
}

/// Per-channel RMS-envelope soft-knee compressor with optional lookahead
/// (§4.3). `attack`/`release` are one-pole time constants in seconds,
/// `threshold`/`knee`/`makeup_gain` in dB.
pub struct Compressor {
    upstream: Arc<dyn Sound>,
    threshold_db: f32,
    ratio: f32,
    attack: f64,
    release: f64,
    makeup_db: f32,
    knee_db: f32,
    lookahead: f64,
}

impl Compressor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upstream: Arc<dyn Sound>,
        threshold_db: f32,
        ratio: f32,
        attack: f64,
        release: f64,
        makeup_db: f32,
        knee_db: f32,
        lookahead: f64,
    ) -> Arc<dyn Sound> {
        Arc::new(Compressor {
            upstream,
            threshold_db,
            ratio: ratio.max(1.0),
            attack,
            release,
            makeup_db,
            knee_db: knee_db.max(0.0),
            lookahead,
        })
    }
}

impl Sound for Compressor {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let specs = upstream.specs();
        let channels = specs.channels.channel_count() as usize;
        let rate = specs.rate;
        let lookahead_samples = (self.lookahead * rate).round().max(0.0) as usize;
        let line_len = lookahead_samples.max(1);

        let state = (0..channels)
            .map(|_| ChannelState {
                rms_env: 0.0,
                gain_db: 0.0,
                lookahead: vec![0.0; line_len],
                lookahead_pos: 0,
            })
            .collect();

        Box::new(CompressorReader {
            upstream,
            channels,
            threshold_db: self.threshold_db,
            ratio: self.ratio,
            knee_db: self.knee_db,
            makeup_db: self.makeup_db,
            alpha_rms: (-1.0 / (RMS_WINDOW_SECONDS * rate)).exp() as f32,
            alpha_attack: (-1.0 / (self.attack.max(1e-6) * rate)).exp() as f32,
            alpha_release: (-1.0 / (self.release.max(1e-6) * rate)).exp() as f32,
            lookahead_samples,
            state,
        })
    }
}
