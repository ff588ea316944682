use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound};

fn envelope(t: f64, attack: f64, decay: f64, sustain: f32) -> f32 {
    if t < attack {
        if attack <= 0.0 {
            1.0
        } else {
            (t / attack) as f32
        }
    } else if t < attack + decay {
        if decay <= 0.0 {
            sustain
        } else {
            let k = (t - attack) / decay;
            1.0 - (1.0 - sustain) * k as f32
        }
    } else {
        sustain
    }
}

struct AdsrReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    rate: f64,
    attack: f64,
    decay: f64,
    sustain: f32,
    position: i64,
}

impl Reader for AdsrReader {
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
            let t = (self.position + frame as i64) as f64 / self.rate;
            let g = envelope(t, self.attack, self.decay, self.sustain);
            let base = frame * self.channels;
            for c in 0..self.channels {
                out[base + c] *= g;
            }
        }
        self.position += produced as i64;
        produced
    }
}

/// Attack/decay/sustain/release envelope generator multiplied into the
/// signal. `release` is accepted and stored for API parity with
/// `original_source/include/fx/ADSR.h` but is not triggerable at runtime in
/// this core: there is no note-off event in the streaming model, so the
/// envelope rises through attack/decay and then holds at `sustain`
/// indefinitely (a documented limitation, not a bug).
pub struct Adsr {
    upstream: Arc<dyn Sound>,
    attack: f64,
    decay: f64,
    sustain: f32,
    #[allow(dead_code)]
    release: f64,
}

impl Adsr {
    pub fn new(upstream: Arc<dyn Sound>, attack: f64, decay: f64, sustain: f32, release: f64) -> Arc<dyn Sound> {
        Arc::new(Adsr { upstream, attack, decay, sustain, release })
    }
}

impl Sound for Adsr {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let specs = upstream.specs();
        Box::new(AdsrReader {
            upstream,
            channels: specs.channels.channel_count() as usize,
            rate: specs.rate,
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            position: 0,
        })
    }
}
