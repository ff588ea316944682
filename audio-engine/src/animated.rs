//! Animated properties (§4.7, C8): a scalar or small vector value with
//! per-frame keyframes, cubic-Hermite interpolation, and sparse
//! "unknown range" tracking for holes left by partial writes.
//!
//! Grounded on `audio-system`'s pattern of sharing small mutable state
//! behind `Arc<parking_lot::...>` rather than a hand-rolled lock; here the
//! lock must be reentrant because the sequence mixer reads a property while
//! holding its entry lock and may re-enter through nested evaluation.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;

enum State {
    /// One value, applied for every frame.
    Static(Vec<f32>),
    Animated { data: Vec<f32>, unknown: Vec<(i64, i64)> },
}

struct Inner {
    count: usize,
    state: State,
}

fn hermite_basis(t: f32) -> (f32, f32, f32, f32) {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    (h00, h10, h01, h11)
}

/// A keyframed `count`-component property, shared and mutated behind a
/// reentrant lock. Cloning shares the same underlying storage.
#[derive(Clone)]
pub struct AnimatedProperty {
    inner: Arc<ReentrantMutex<RefCell<Inner>>>,
}

impl AnimatedProperty {
    /// Creates a static property holding `initial` (length `count`).
    pub fn new(count: usize, initial: Vec<f32>) -> Self {
        debug_assert_eq!(initial.len(), count);
        Self { inner: Arc::new(ReentrantMutex::new(RefCell::new(Inner { count, state: State::Static(initial) }))) }
    }

    pub fn count(&self) -> usize {
        let guard = self.inner.lock();
        guard.borrow().count
    }

    /// Overwrites the whole property with a new constant value, discarding
    /// any animation.
    pub fn write_static(&self, value: &[f32]) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        debug_assert_eq!(value.len(), inner.count);
        inner.state = State::Static(value.to_vec());
    }

    /// Writes `frames` keyframes of `count`-wide data starting at frame
    /// `position`, extending the dense vector and trimming/splitting any
    /// unknown interval the write overlaps (§4.7).
    pub fn write(&self, data: &[f32], position: i64, frames: usize) {
        let position = position.max(0);
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let count = inner.count;
        debug_assert_eq!(data.len(), frames * count);

        if let State::Static(value) = &inner.state {
            let value = value.clone();
            inner.state = State::Animated { data: value, unknown: Vec::new() };
        }

        let (dense, unknown) = match &mut inner.state {
            State::Animated { data, unknown } => (data, unknown),
            State::Static(_) => unreachable!(),
        };

        let prev_frames = dense.len() / count;
        let target_frames = (position as usize + frames).max(prev_frames);
        if target_frames > prev_frames {
            let fill: Vec<f32> = if prev_frames > 0 {
                dense[(prev_frames - 1) * count..prev_frames * count].to_vec()
            } else {
                vec![0.0; count]
            };
            dense.resize(target_frames * count, 0.0);
            for f in prev_frames..target_frames {
                dense[f * count..(f + 1) * count].copy_from_slice(&fill);
            }
        }

        if (prev_frames as i64) < position {
            unknown.push((prev_frames as i64, position - 1));
        }

        for f in 0..frames {
            let frame_idx = position as usize + f;
            dense[frame_idx * count..(frame_idx + 1) * count].copy_from_slice(&data[f * count..(f + 1) * count]);
        }

        let write_start = position;
        let write_end = position + frames as i64 - 1;
        let mut trimmed = Vec::with_capacity(unknown.len());
        for &(s, e) in unknown.iter() {
            if e < write_start || s > write_end {
                trimmed.push((s, e));
                continue;
            }
            if s < write_start {
                trimmed.push((s, write_start - 1));
            }
            if e > write_end {
                trimmed.push((write_end + 1, e));
            }
        }
        *unknown = trimmed;
    }

    /// Reads the `count`-wide value at fractional frame `frame` into `out`.
    pub fn read_into(&self, frame: f64, out: &mut [f32]) {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        debug_assert_eq!(out.len(), inner.count);
        let count = inner.count;

        match &inner.state {
            State::Static(value) => out.copy_from_slice(value),
            State::Animated { data, .. } => {
                let num_frames = data.len() / count;
                if num_frames == 0 {
                    out.fill(0.0);
                    return;
                }
                let f = frame.clamp(0.0, (num_frames - 1) as f64);
                let i = f.floor() as usize;
                let t = (f - i as f64) as f32;

                if t == 0.0 || i + 1 >= num_frames {
                    out.copy_from_slice(&data[i * count..(i + 1) * count]);
                    return;
                }

                let (h00, h10, h01, h11) = hermite_basis(t);
                for c in 0..count {
                    let v1 = data[i * count + c];
                    let v2 = data[(i + 1) * count + c];
                    let v0 = if i == 0 { v1 } else { data[(i - 1) * count + c] };
                    let v3 = if i + 2 >= num_frames { v2 } else { data[(i + 2) * count + c] };
                    let m0 = (v2 - v0) / 2.0;
                    let m1 = (v3 - v1) / 2.0;
                    out[c] = h00 * v1 + h10 * m0 + h01 * v2 + h11 * m1;
                }
            }
        }
    }

    /// Convenience accessor for single-component (scalar) properties.
    pub fn read(&self, frame: f64) -> f32 {
        let mut out = [0.0f32; 1];
        self.read_into(frame, &mut out);
        out[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_region_reads_back_the_constant() {
        let prop = AnimatedProperty::new(1, vec![0.0]);
        prop.write(&[2.0, 2.0, 2.0, 2.0], 10, 4);
        for f in 10..14 {
            assert!((prop.read(f as f64) - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn hole_then_fill_matches_dense_write() {
        let sparse = AnimatedProperty::new(1, vec![1.0]);
        sparse.write(&[1.0, 1.0], 0, 2);
        sparse.write(&[5.0, 5.0], 10, 2);
        // frames [2, 9] are an unknown hole, held at the last known value (1.0).
        assert!((sparse.read(5.0) - 1.0).abs() < 1e-6);

        sparse.write(&[1.0; 8], 2, 8);
        let dense = AnimatedProperty::new(1, vec![1.0]);
        dense.write(&[1.0; 12], 0, 12);
        for f in 0..12 {
            assert!((sparse.read(f as f64) - dense.read(f as f64)).abs() < 1e-6);
        }
    }
}
