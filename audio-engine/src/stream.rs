//! The streaming contract every DSP node implements (§4.1).
//!
//! A [`Sound`] is an immutable, sharable factory; calling [`Sound::create_reader`]
//! materialises an independent [`Reader`] cursor. Nodes composed of an
//! upstream reader hold it by exclusive (`Box`) ownership.

use crate::spec::Specs;

/// Unbounded/unknown length sentinel for [`Reader::length`].
pub const UNKNOWN_LENGTH: i64 = -1;

/// A mutable, pull-based cursor over interleaved `f32` samples.
///
/// Invariants (§3):
/// - `specs()` never changes across the life of one reader.
/// - `position() ∈ [0, length]` when `length` is known; `length() == -1`
///   means unbounded/unknown.
/// - `read` yields `n ∈ [0, req]` frames, sets `eos` when the stream is
///   terminally exhausted, and advances `position` by `n`. `n == 0` with
///   `eos == false` is allowed only transiently.
/// - Once `eos` has been observed true, any further `read` with `len > 0`
///   returns `0` frames with `eos` true (terminal).
/// - `read` never fails: catastrophic upstream failure emits silence, sets
///   `eos`, and the reader becomes permanently terminal (§4.1, §7).
pub trait Reader: Send {
    fn specs(&self) -> Specs;
    fn is_seekable(&self) -> bool;
    /// Total frame count, or [`UNKNOWN_LENGTH`] if unbounded/unknown.
    fn length(&self) -> i64;
    fn position(&self) -> i64;
    /// Only valid when `is_seekable()`. Returns `false` (no-op) otherwise.
    /// Seeking past `length` clamps and the next read reports `eos`.
    fn seek(&mut self, position: i64) -> bool;
    /// `out` has capacity for at least `len * channels` floats. Returns the
    /// number of frames actually produced (`<= len`) and sets `*eos`.
    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize;
}

/// An immutable DSP-graph node. Safe to call concurrently; every created
/// reader is independent. Sounds form a DAG: the same [`Sound`] may be
/// shared into more than one chain (see [`crate::cache::StreamBuffer`]).
pub trait Sound: Send + Sync {
    fn create_reader(&self) -> Box<dyn Reader>;
}

/// Helper used throughout the effect modules: fills `out[..len*channels]`
/// with silence and reports terminal EOS. Keeps every "upstream failed, go
/// silent" branch identical in shape (§4.1/§7).
pub(crate) fn silence_out(len_frames: usize, channels: usize, eos: &mut bool, out: &mut [f32]) -> usize {
    let n = len_frames * channels;
    out[..n.min(out.len())].fill(0.0);
    *eos = true;
    0
}
