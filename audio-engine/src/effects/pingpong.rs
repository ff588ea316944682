use std::sync::Arc;

use super::reverse::Reverse;
use crate::error::Result;
use crate::spec::Specs;
use crate::stream::{Reader, Sound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Forward,
    Reverse,
}

struct PingPongReader {
    forward: Box<dyn Reader>,
    reverse: Box<dyn Reader>,
    channels: usize,
    fwd_length: i64,
    position: i64,
    phase: Phase,
}

impl Reader for PingPongReader {
    fn specs(&self) -> Specs {
        self.forward.specs()
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn length(&self) -> i64 {
        self.fwd_length * 2
    }
    fn position(&self) -> i64 {
        self.position
    }

    fn seek(&mut self, position: i64) -> bool {
        let position = position.clamp(0, self.fwd_length * 2);
        self.position = position;
        if position < self.fwd_length {
            self.phase = Phase::Forward;
            self.forward.seek(position)
        } else {
            self.phase = Phase::Reverse;
            self.reverse.seek(position - self.fwd_length)
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let mut produced = 0usize;
        while produced < len {
            let start = produced * self.channels;
            let end = len * self.channels;
            let mut sub_eos = false;
            match self.phase {
                Phase::Forward => {
                    let got = self.forward.read(len - produced, &mut sub_eos, &mut out[start..end]);
                    produced += got;
                    if sub_eos {
                        self.phase = Phase::Reverse;
                        self.reverse.seek(0);
                    } else if got == 0 {
                        break;
                    }
                }
                Phase::Reverse => {
                    let got = self.reverse.read(len - produced, &mut sub_eos, &mut out[start..end]);
                    produced += got;
                    if sub_eos {
                        *eos = true;
                        break;
                    } else if got == 0 {
                        break;
                    }
                }
            }
        }
        self.position += produced as i64;
        produced
    }
}

/// Plays the upstream sound forward, then immediately backward.
pub struct PingPong {
    upstream: Arc<dyn Sound>,
    reversed: Arc<dyn Sound>,
}

impl PingPong {
    pub fn new(upstream: Arc<dyn Sound>) -> Result<Arc<dyn Sound>> {
        let reversed = Reverse::new(upstream.clone())?;
        Ok(Arc::new(PingPong { upstream, reversed }))
    }
}

impl Sound for PingPong {
    fn create_reader(&self) -> Box<dyn Reader> {
        let forward = self.upstream.create_reader();
        let reverse = self.reversed.create_reader();
        let channels = forward.specs().channels.channel_count() as usize;
        let fwd_length = forward.length().max(0);
        Box::new(PingPongReader { forward, reverse, channels, fwd_length, position: 0, phase: Phase::Forward })
    }
}
