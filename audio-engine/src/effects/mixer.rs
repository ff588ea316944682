//! N-ary sample-summing combinator (`original_source/include/fx/Superpose.h`,
//! generalised from its two-input form). Distinct from [`crate::effects::Sum`],
//! which is a single-input running total; this sums several independent
//! [`Sound`]s into one stream, the same way [`crate::device::Device::mix_into`]
//! sums voices, but usable standalone outside of a device.

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::spec::Specs;
use crate::stream::{Reader, Sound};

struct MixerReader {
    channels: usize,
    upstreams: Vec<Box<dyn Reader>>,
    done: Vec<bool>,
    scratch: Vec<f32>,
}

impl Reader for MixerReader {
    fn specs(&self) -> Specs {
        self.upstreams[0].specs()
    }

    fn is_seekable(&self) -> bool {
        self.upstreams.iter().all(|r| r.is_seekable())
    }

    fn length(&self) -> i64 {
        let mut max_len = 0i64;
        for r in &self.upstreams {
            let l = r.length();
            if l < 0 {
                return -1;
            }
            max_len = max_len.max(l);
        }
        max_len
    }

    fn position(&self) -> i64 {
        self.upstreams[0].position()
    }

    fn seek(&mut self, position: i64) -> bool {
        let mut all_ok = true;
        for (r, done) in self.upstreams.iter_mut().zip(self.done.iter_mut()) {
            all_ok &= r.seek(position);
            *done = false;
        }
        all_ok
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let frame_floats = len * self.channels;
        out[..frame_floats].fill(0.0);
        if self.scratch.len() < frame_floats {
            self.scratch.resize(frame_floats, 0.0);
        }
        let mut max_produced = 0;

        for (upstream, done) in self.upstreams.iter_mut().zip(self.done.iter_mut()) {
            if *done {
                continue;
            }
            let mut sub_eos = false;
            self.scratch[..frame_floats].fill(0.0);
            let produced = upstream.read(len, &mut sub_eos, &mut self.scratch);
            for i in 0..produced * self.channels {
                out[i] += self.scratch[i];
            }
            max_produced = max_produced.max(produced);
            if sub_eos {
                *done = true;
            }
        }

        *eos = self.done.iter().all(|&d| d);
        max_produced
    }
}

/// Sums `N` independently-decoded sounds sample-by-sample. All inputs must
/// share the same channel count; the result runs until every input has
/// reached EOS.
pub struct Mixer {
    upstreams: Vec<Arc<dyn Sound>>,
}

impl Mixer {
    pub fn new(upstreams: Vec<Arc<dyn Sound>>) -> Result<Arc<dyn Sound>> {
        if upstreams.is_empty() {
            return Err(EngineError::Specs("Mixer requires at least one input".into()));
        }
        Ok(Arc::new(Mixer { upstreams }))
    }
}

impl Sound for Mixer {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstreams: Vec<Box<dyn Reader>> = self.upstreams.iter().map(|s| s.create_reader()).collect();
        let channels = upstreams[0].specs().channels.channel_count() as usize;
        let count = upstreams.len();
        Box::new(MixerReader {
            channels,
            upstreams,
            done: vec![false; count],
            scratch: vec![0.0; 0],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;

    #[test]
    fn two_sines_sum_linearly() {
        let mixer = Mixer::new(vec![Generator::sine(100.0, 8_000.0), Generator::sine(100.0, 8_000.0)]).unwrap();
        let mut r = mixer.create_reader();
        let mut eos = false;
        let mut out = vec![0.0f32; 32];
        r.read(32, &mut eos, &mut out);

        let solo = Generator::sine(100.0, 8_000.0);
        let mut solo_r = solo.create_reader();
        let mut solo_eos = false;
        let mut solo_out = vec![0.0f32; 32];
        solo_r.read(32, &mut solo_eos, &mut solo_out);

        for i in 0..32 {
            assert!((out[i] - 2.0 * solo_out[i]).abs() < 1e-5);
        }
    }
}
