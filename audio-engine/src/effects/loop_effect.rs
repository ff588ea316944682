use std::sync::Arc;

use crate::spec::Specs;
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

struct LoopReader {
    upstream: Box<dyn Reader>,
    channels: usize,
    /// Total playthroughs; `-1` means infinite.
    total_loops: i64,
    /// Restarts still allowed after the current one; `-1` means infinite.
    remaining_restarts: i64,
    position: i64,
}

impl Reader for LoopReader {
    fn specs(&self) -> Specs {
        self.upstream.specs()
    }

    fn is_seekable(&self) -> bool {
        self.upstream.is_seekable() && self.upstream.length() > 0
    }

    fn length(&self) -> i64 {
        if self.total_loops < 0 {
            return UNKNOWN_LENGTH;
        }
        let up = self.upstream.length();
        if up == UNKNOWN_LENGTH {
            UNKNOWN_LENGTH
        } else {
            up * self.total_loops
        }
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn seek(&mut self, position: i64) -> bool {
        let up_len = self.upstream.length();
        if !self.upstream.is_seekable() || up_len <= 0 {
            return false;
        }
        let position = position.max(0);
        let loop_index = position / up_len;
        if self.total_loops >= 0 && loop_index >= self.total_loops {
            return false;
        }
        self.remaining_restarts = if self.total_loops < 0 {
            -1
        } else {
            (self.total_loops - 1 - loop_index).max(0)
        };
        self.position = position;
        self.upstream.seek(position % up_len)
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let mut produced = 0usize;
        while produced < len {
            let mut sub_eos = false;
            let start = produced * self.channels;
            let end = len * self.channels;
            let got = self.upstream.read(len - produced, &mut sub_eos, &mut out[start..end]);
            produced += got;
            if sub_eos {
                if self.remaining_restarts == 0 {
                    *eos = true;
                    break;
                }
                if self.remaining_restarts > 0 {
                    self.remaining_restarts -= 1;
                }
                if !self.upstream.seek(0) {
                    *eos = true;
                    break;
                }
            } else if got == 0 {
                break;
            }
        }
        self.position += produced as i64;
        produced
    }
}

/// Repeats the upstream sound `n` times; `n < 0` loops forever.
pub struct Loop {
    upstream: Arc<dyn Sound>,
    n: i64,
}

impl Loop {
    pub fn new(upstream: Arc<dyn Sound>, n: i64) -> Arc<dyn Sound> {
        Arc::new(Loop { upstream, n })
    }
}

impl Sound for Loop {
    fn create_reader(&self) -> Box<dyn Reader> {
        let upstream = self.upstream.create_reader();
        let channels = upstream.specs().channels.channel_count() as usize;
        let remaining_restarts = if self.n < 0 { -1 } else { (self.n - 1).max(0) };
        Box::new(LoopReader {
            upstream,
            channels,
            total_loops: self.n,
            remaining_restarts,
            position: 0,
        })
    }
}
