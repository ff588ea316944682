//! Software mixer, voice handles, and 3D spatialisation math (§4.9, C10).
//!
//! The device here is backend-agnostic: it exposes [`Device::mix_into`] for
//! a real-time callback to pull mixed, device-format-ready samples from, and
//! an open/close state listener hook so a concrete backend (`audio-engine-
//! backend`) can open/close hardware without this crate depending on it —
//! mirrors the teacher's `audio-backend` crate not depending on
//! `audio-system`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::animated::AnimatedProperty;
use crate::resample::{ChannelMapper, LinearResample};
use crate::spec::Specs;
use crate::stream::{Reader, Sound};

/// A lock-free single-float shared volume (§5 "VolumeStorage uses an atomic
/// float").
#[derive(Debug)]
pub struct VolumeStorage(AtomicU32);

impl VolumeStorage {
    pub fn new(initial: f32) -> Self {
        Self(AtomicU32::new(initial.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for VolumeStorage {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Playing,
    Paused,
    Stopped,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModel {
    Invalid,
    Inverse,
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}

/// Per-voice 3D attenuation/cone parameters (§4.9, §6 `update_all`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params3D {
    pub relative: bool,
    pub distance_model: DistanceModel,
    pub distance_ref: f32,
    pub distance_max: f32,
    pub attenuation: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_volume: f32,
    pub vol_min: f32,
    pub vol_max: f32,
}

impl Default for Params3D {
    fn default() -> Self {
        Self {
            relative: false,
            distance_model: DistanceModel::Invalid,
            distance_ref: 1.0,
            distance_max: f32::MAX,
            attenuation: 1.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_volume: 1.0,
            vol_min: 0.0,
            vol_max: 1.0,
        }
    }
}

/// Position, orientation (quaternion, `xyzw` at this API boundary), and
/// velocity of a listener or a 3D voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub location: [f32; 3],
    pub orientation: [f32; 4],
    pub velocity: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self { location: [0.0; 3], orientation: [0.0, 0.0, 0.0, 1.0], velocity: [0.0; 3] }
    }
}

#[derive(Debug, Clone, Copy)]
struct Listener {
    pose: Pose,
    speed_of_sound: f32,
    doppler_factor: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self { pose: Pose::default(), speed_of_sound: 343.3, doppler_factor: 1.0 }
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f32; 3]) -> f32 {
    dot(a, a).sqrt()
}

/// Rotates `v` by quaternion `q` (`xyzw`).
fn quat_rotate(q: [f32; 4], v: [f32; 3]) -> [f32; 3] {
    let (x, y, z, w) = (q[0], q[1], q[2], q[3]);
    let qv = [x, y, z];
    let uv = [qv[1] * v[2] - qv[2] * v[1], qv[2] * v[0] - qv[0] * v[2], qv[0] * v[1] - qv[1] * v[0]];
    let uuv = [qv[1] * uv[2] - qv[2] * uv[1], qv[2] * uv[0] - qv[0] * uv[2], qv[0] * uv[1] - qv[1] * uv[0]];
    [
        v[0] + 2.0 * (w * uv[0] + uuv[0]),
        v[1] + 2.0 * (w * uv[1] + uuv[1]),
        v[2] + 2.0 * (w * uv[2] + uuv[2]),
    ]
}

fn distance_gain(model: DistanceModel, mut d: f32, dist_ref: f32, dist_max: f32, rolloff: f32) -> f32 {
    let clamp = |d: f32| d.clamp(dist_ref, dist_max);
    match model {
        DistanceModel::Invalid => 1.0,
        DistanceModel::Inverse => dist_ref / (dist_ref + rolloff * (d.max(dist_ref) - dist_ref)),
        DistanceModel::InverseClamped => {
            d = clamp(d);
            dist_ref / (dist_ref + rolloff * (d - dist_ref))
        }
        DistanceModel::Linear => (1.0 - rolloff * (d.max(dist_ref) - dist_ref) / (dist_max - dist_ref).max(1e-6)).clamp(0.0, 1.0),
        DistanceModel::LinearClamped => {
            d = clamp(d);
            (1.0 - rolloff * (d - dist_ref) / (dist_max - dist_ref).max(1e-6)).clamp(0.0, 1.0)
        }
        DistanceModel::Exponent => (d.max(dist_ref) / dist_ref).powf(-rolloff),
        DistanceModel::ExponentClamped => {
            d = clamp(d);
            (d / dist_ref).powf(-rolloff)
        }
    }
}

fn cone_gain(angle_deg: f32, inner_deg: f32, outer_deg: f32, outer_volume: f32) -> f32 {
    let half_inner = inner_deg / 2.0;
    let half_outer = outer_deg / 2.0;
    if angle_deg <= half_inner {
        1.0
    } else if angle_deg >= half_outer {
        outer_volume
    } else {
        let t = (angle_deg - half_inner) / (half_outer - half_inner).max(1e-6);
        1.0 + t * (outer_volume - 1.0)
    }
}

/// Computes `(gain, doppler_pitch_factor)` for one 3D voice against the
/// current listener pose (§4.9 "3D attenuation").
fn spatialize(listener: &Listener, voice_pose: &Pose, params: &Params3D) -> (f32, f32) {
    let (l_pos, l_vel) = if params.relative { ([0.0; 3], [0.0; 3]) } else { (listener.pose.location, listener.pose.velocity) };
    let to_source = sub(voice_pose.location, l_pos);
    let distance = norm(to_source).max(1e-6);

    let mut gain = distance_gain(params.distance_model, distance, params.distance_ref, params.distance_max, params.attenuation);

    let forward = quat_rotate(voice_pose.orientation, [0.0, 0.0, -1.0]);
    let to_listener = sub(l_pos, voice_pose.location);
    let to_listener_norm = norm(to_listener).max(1e-6);
    let cos_angle = (dot(forward, to_listener) / to_listener_norm).clamp(-1.0, 1.0);
    let angle_deg = cos_angle.acos().to_degrees();
    gain *= cone_gain(angle_deg, params.cone_inner_angle, params.cone_outer_angle, params.cone_outer_volume);
    gain = gain.clamp(params.vol_min, params.vol_max);

    let axis = if distance > 1e-6 { [to_source[0] / distance, to_source[1] / distance, to_source[2] / distance] } else { [0.0, 0.0, 0.0] };
    let v_l = dot(l_vel, axis) * listener.doppler_factor;
    let v_s = dot(voice_pose.velocity, axis) * listener.doppler_factor;
    let c = listener.speed_of_sound;
    let denom = (c - v_s).max(c * 0.01);
    let doppler = (c - v_l) / denom;

    (gain, doppler)
}

/// Equal-power pan law: `pan` runs from `-1.0` (hard left) through `0.0`
/// (center) to `1.0` (hard right). At center both channels sit at unity
/// power (`~0.707` amplitude each) rather than dropping to `0.5`.
fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Simple one-frame-cache linear resampler with a runtime-mutable ratio,
/// used to apply the Doppler pitch shift on top of a voice's fixed-rate
/// conversion to device rate.
struct DopplerStage {
    upstream: Box<dyn Reader>,
    channels: usize,
    ratio: f64,
    spos: f64,
    prev: Vec<f32>,
    cur: Vec<f32>,
    scratch: Vec<f32>,
    primed: bool,
    eos: bool,
}

impl DopplerStage {
    fn new(upstream: Box<dyn Reader>) -> Self {
        let channels = upstream.specs().channels.channel_count() as usize;
        Self {
            upstream,
            channels,
            ratio: 1.0,
            spos: 0.0,
            prev: vec![0.0; channels],
            cur: vec![0.0; channels],
            scratch: vec![0.0; channels],
            primed: false,
            eos: false,
        }
    }

    fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.max(0.05);
    }

    fn position(&self) -> i64 {
        self.upstream.position()
    }

    /// Seeks upstream and resets the interpolation cache so the next read
    /// doesn't blend across the discontinuity.
    fn seek(&mut self, position: i64) -> bool {
        let ok = self.upstream.seek(position);
        self.spos = 0.0;
        self.primed = false;
        self.eos = false;
        ok
    }

    fn pull(&mut self) -> bool {
        let mut sub_eos = false;
        let got = self.upstream.read(1, &mut sub_eos, &mut self.scratch);
        if got == 1 {
            self.cur.copy_from_slice(&self.scratch[..self.channels]);
            true
        } else {
            false
        }
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        if !self.primed {
            if !self.pull() {
                self.eos = true;
            }
            self.prev.copy_from_slice(&self.cur);
            self.primed = true;
        }
        let mut produced = 0;
        while produced < len {
            while self.spos >= 1.0 {
                if self.eos {
                    break;
                }
                self.prev.copy_from_slice(&self.cur);
                if !self.pull() {
                    self.eos = true;
                    break;
                }
                self.spos -= 1.0;
            }
            if self.eos && self.spos >= 1.0 {
                *eos = true;
                break;
            }
            let base = produced * self.channels;
            let t = self.spos as f32;
            for c in 0..self.channels {
                out[base + c] = self.prev[c] + t * (self.cur[c] - self.prev[c]);
            }
            self.spos += self.ratio;
            produced += 1;
        }
        produced
    }
}

struct Voice {
    /// Every voice runs through a mutable-ratio resample stage so
    /// `Handle::set_pitch` and 3D Doppler can both steer playback rate at
    /// block granularity without rebuilding the reader chain.
    stage: DopplerStage,
    state: HandleState,
    keep: bool,
    /// Remaining repetitions: `< 0` is infinite, `0` means "don't loop".
    /// Decremented on each upstream EOS before `keep`/stop-callback apply.
    loop_count: i64,
    volume: f32,
    volume_anim: Option<AnimatedProperty>,
    pan: f32,
    pitch: f32,
    is_3d: bool,
    pose: Pose,
    params3d: Params3D,
    stop_callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// A live voice on a [`Device`]. Operations are no-ops returning `false` once
/// the underlying voice has been invalidated (§4.9 "Handle operations").
#[derive(Clone)]
pub struct Handle {
    device: Arc<Device>,
    index: usize,
    generation: u64,
}

impl Handle {
    fn with_voice<R>(&self, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        let mut voices = self.device.voices.lock();
        let slot = voices.get_mut(self.index)?;
        if slot.generation != self.generation {
            return None;
        }
        if slot.voice.state == HandleState::Invalid {
            return None;
        }
        Some(f(&mut slot.voice))
    }

    pub fn pause(&self) -> bool {
        self.with_voice(|v| v.state = HandleState::Paused).is_some()
    }

    pub fn resume(&self) -> bool {
        self.with_voice(|v| v.state = HandleState::Playing).is_some()
    }

    pub fn stop(&self) -> bool {
        self.with_voice(|v| v.state = HandleState::Invalid).is_some()
    }

    pub fn seek(&self, position: i64) -> bool {
        self.with_voice(|v| v.stage.seek(position)).unwrap_or(false)
    }

    pub fn set_volume(&self, volume: f32) -> bool {
        self.with_voice(|v| v.volume = volume).is_some()
    }

    /// Stereo pan balance in `[-1.0, 1.0]` (left to right, `0.0` center).
    /// A no-op on mono/passthrough for layouts with no left/right pair.
    pub fn set_pan(&self, pan: f32) -> bool {
        self.with_voice(|v| v.pan = pan).is_some()
    }

    pub fn set_pitch(&self, pitch: f32) -> bool {
        self.with_voice(|v| v.pitch = pitch).is_some()
    }

    pub fn set_keep(&self, keep: bool) -> bool {
        self.with_voice(|v| v.keep = keep).is_some()
    }

    /// `count < 0` loops forever; `count == 0` disables looping. A no-op
    /// (returns `false`) on an already-invalidated handle — per design,
    /// a handle that reached EOS with `keep=false` is rejected rather than
    /// implicitly resurrected (§9 open question).
    pub fn set_loop_count(&self, count: i64) -> bool {
        self.with_voice(|v| v.loop_count = count).is_some()
    }

    /// Registers a callback fired once, from inside the mix callback, when
    /// this voice hits EOS with `keep=false` (§6 "stop_callback"). Replaces
    /// any previously-registered callback.
    pub fn set_stop_callback(&self, callback: Arc<dyn Fn() + Send + Sync>) -> bool {
        self.with_voice(|v| v.stop_callback = Some(callback)).is_some()
    }

    pub fn set_3d(&self, enabled: bool) -> bool {
        self.with_voice(|v| v.is_3d = enabled).is_some()
    }

    pub fn set_pose(&self, pose: Pose) -> bool {
        self.with_voice(|v| v.pose = pose).is_some()
    }

    pub fn set_params_3d(&self, params: Params3D) -> bool {
        self.with_voice(|v| v.params3d = params).is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.with_voice(|_| ()).is_some()
    }

    pub fn state(&self) -> Option<HandleState> {
        self.with_voice(|v| v.state)
    }

    /// Current upstream position in seconds, at `sample_rate` frames/sec.
    /// Returns `0.0` on an invalidated handle rather than `Option`, since
    /// callers (e.g. [`crate::sync::Synchronizer`]) treat a dead handle's
    /// position as "stuck at last-known", not an error.
    pub fn position_seconds(&self, sample_rate: f64) -> f64 {
        self.with_voice(|v| v.stage.position()).unwrap_or(0) as f64 / sample_rate
    }
}

struct VoiceSlot {
    voice: Voice,
    generation: u64,
}

/// Notified when the device transitions between actively-playing and idle,
/// so a concrete backend can open/close real hardware off the callback
/// thread (§4.9 "This path must never be taken on the real-time callback
/// thread").
pub trait OpenCloseListener: Send + Sync {
    fn on_open(&self);
    fn on_close(&self);
}

struct IdleGate {
    lock: Mutex<bool>, // true while the gate thread should keep running
    cv: Condvar,
}

/// Software mixer + voice registry, target specs fixed at construction.
pub struct Device {
    specs: Specs,
    voices: Mutex<Vec<VoiceSlot>>,
    next_generation: AtomicU32,
    listener: Mutex<Listener>,
    master_volume: VolumeStorage,
    is_open: AtomicBool,
    playing: AtomicBool,
    idle_delay: Duration,
    last_stopped_at: Mutex<Option<Instant>>,
    open_close_listener: Mutex<Option<Arc<dyn OpenCloseListener>>>,
    idle_gate: Arc<IdleGate>,
}

impl Device {
    pub fn open(specs: Specs, idle_delay: Duration) -> Arc<Self> {
        info!(rate = specs.rate, channels = ?specs.channels, "opening software device");
        Arc::new(Self {
            specs,
            voices: Mutex::new(Vec::new()),
            next_generation: AtomicU32::new(0),
            listener: Mutex::new(Listener::default()),
            master_volume: VolumeStorage::new(1.0),
            is_open: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            idle_delay,
            last_stopped_at: Mutex::new(None),
            open_close_listener: Mutex::new(None),
            idle_gate: Arc::new(IdleGate { lock: Mutex::new(false), cv: Condvar::new() }),
        })
    }

    pub fn specs(&self) -> Specs {
        self.specs
    }

    pub fn set_open_close_listener(&self, listener: Arc<dyn OpenCloseListener>) {
        *self.open_close_listener.lock() = Some(listener);
    }

    pub fn set_volume(&self, volume: f32) {
        self.master_volume.store(volume);
    }

    pub fn volume(&self) -> f32 {
        self.master_volume.load()
    }

    pub fn set_listener_pose(&self, pose: Pose) {
        self.listener.lock().pose = pose;
    }

    pub fn set_listener_3d(&self, speed_of_sound: f32, doppler_factor: f32) {
        let mut l = self.listener.lock();
        l.speed_of_sound = speed_of_sound;
        l.doppler_factor = doppler_factor;
    }

    /// `sound` is adapted to the device's rate/channel layout at play time.
    pub fn play(self: &Arc<Self>, sound: Arc<dyn Sound>, keep: bool) -> Handle {
        let adapted = ChannelMapper::new(LinearResample::new(sound, self.specs.rate), self.specs.channels, None);
        let reader = adapted.create_reader();

        let voice = Voice {
            stage: DopplerStage::new(reader),
            state: HandleState::Playing,
            keep,
            loop_count: 0,
            volume: 1.0,
            volume_anim: None,
            pan: 0.0,
            pitch: 1.0,
            is_3d: false,
            pose: Pose::default(),
            params3d: Params3D::default(),
            stop_callback: None,
        };

        let mut voices = self.voices.lock();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) as u64;
        let index = voices.len();
        voices.push(VoiceSlot { voice, generation });
        drop(voices);

        self.mark_playing();
        Handle { device: self.clone(), index, generation }
    }

    pub fn stop_all(&self) {
        let mut voices = self.voices.lock();
        for slot in voices.iter_mut() {
            slot.voice.state = HandleState::Invalid;
        }
    }

    fn mark_playing(self: &Arc<Self>) {
        let was_playing = self.playing.swap(true, Ordering::AcqRel);
        *self.idle_gate.lock.lock() = false;
        self.idle_gate.cv.notify_all();
        if !was_playing {
            self.is_open.store(true, Ordering::Release);
            if let Some(listener) = self.open_close_listener.lock().clone() {
                listener.on_open();
            }
        }
    }

    fn mark_possibly_idle(self: &Arc<Self>) {
        let voices = self.voices.lock();
        let any_active = voices.iter().any(|s| s.voice.state == HandleState::Playing);
        drop(voices);
        if any_active {
            return;
        }
        if !self.playing.swap(false, Ordering::AcqRel) {
            return;
        }
        *self.last_stopped_at.lock() = Some(Instant::now());
        self.spawn_idle_gate();
    }

    fn spawn_idle_gate(self: &Arc<Self>) {
        let device = self.clone();
        let gate = self.idle_gate.clone();
        *gate.lock.lock() = true;
        std::thread::spawn(move || {
            let mut guard = gate.lock.lock();
            let result = gate.cv.wait_for(&mut guard, device.idle_delay);
            if result.timed_out() && !device.playing.load(Ordering::Acquire) {
                debug!("closing device after idle delay");
                device.is_open.store(false, Ordering::Release);
                if let Some(listener) = device.open_close_listener.lock().clone() {
                    listener.on_close();
                }
            }
            *guard = false;
        });
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// The real-time mix callback body (§4.9 steps 1-5). `out` must have
    /// capacity for `len * device_channels` floats.
    pub fn mix_into(self: &Arc<Self>, len: usize, out: &mut [f32]) {
        let channels = self.specs.channels.channel_count() as usize;
        out[..len * channels].fill(0.0);

        let listener = *self.listener.lock();
        let mut voices = self.voices.lock();
        let mut scratch = vec![0.0f32; len * channels];
        // Callbacks may themselves call back into the device (e.g. starting
        // a follow-up sound), so they must run after `voices` is unlocked.
        let mut stop_callbacks: Vec<Arc<dyn Fn() + Send + Sync>> = Vec::new();

        for slot in voices.iter_mut() {
            let voice = &mut slot.voice;
            if voice.state != HandleState::Playing {
                continue;
            }

            let mut rate_factor = voice.pitch as f64;
            let mut gain = voice.volume;
            if voice.is_3d {
                let (spatial_gain, doppler_factor) = spatialize(&listener, &voice.pose, &voice.params3d);
                gain *= spatial_gain;
                rate_factor *= doppler_factor as f64;
            }
            voice.stage.set_ratio(1.0 / rate_factor.max(0.01));

            let mut sub_eos = false;
            scratch.iter_mut().for_each(|v| *v = 0.0);
            let produced = voice.stage.read(len, &mut sub_eos, &mut scratch);

            if let Some(anim) = &voice.volume_anim {
                gain *= anim.read(voice.stage.position() as f64);
            }

            if channels >= 2 && voice.pan != 0.0 {
                let (left_gain, right_gain) = pan_gains(voice.pan);
                for frame in 0..produced {
                    let base = frame * channels;
                    out[base] += scratch[base] * gain * left_gain;
                    out[base + 1] += scratch[base + 1] * gain * right_gain;
                    for ch in 2..channels {
                        out[base + ch] += scratch[base + ch] * gain;
                    }
                }
            } else {
                for i in 0..produced * channels {
                    out[i] += scratch[i] * gain;
                }
            }

            if sub_eos {
                if voice.loop_count != 0 {
                    if voice.loop_count > 0 {
                        voice.loop_count -= 1;
                    }
                    voice.stage.seek(0);
                } else if voice.keep {
                    voice.state = HandleState::Stopped;
                } else {
                    voice.state = HandleState::Invalid;
                    if let Some(cb) = voice.stop_callback.clone() {
                        stop_callbacks.push(cb);
                    }
                }
            }
        }
        drop(voices);

        let master = self.master_volume.load();
        for s in out[..len * channels].iter_mut() {
            *s *= master;
        }

        self.mark_possibly_idle();

        for cb in stop_callbacks {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;
    use crate::spec::ChannelLayout;

    #[test]
    fn two_voices_sum_linearly() {
        let specs = Specs::new(8_000.0, ChannelLayout::Mono, crate::spec::SampleFormat::F32);
        let device = Device::open(specs, Duration::from_millis(50));
        let _h1 = device.play(Generator::sine(100.0, 8_000.0), true);
        let _h2 = device.play(Generator::sine(100.0, 8_000.0), true);

        let mut out = vec![0.0f32; 16];
        device.mix_into(16, &mut out);

        let single_specs = Specs::new(8_000.0, ChannelLayout::Mono, crate::spec::SampleFormat::F32);
        let _ = single_specs;
        let solo = Generator::sine(100.0, 8_000.0);
        let mut r = solo.create_reader();
        let mut solo_eos = false;
        let mut solo_out = vec![0.0f32; 16];
        r.read(16, &mut solo_eos, &mut solo_out);

        for i in 0..16 {
            assert!((out[i] - 2.0 * solo_out[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn stop_callback_can_reenter_play_without_deadlock() {
        let specs = Specs::new(8_000.0, ChannelLayout::Mono, crate::spec::SampleFormat::F32);
        let device = Device::open(specs, Duration::from_millis(50));
        let short = crate::effects::Limiter::new(Generator::sine(100.0, 8_000.0), 0.0, 4.0 / 8_000.0);
        let h = device.play(short, false);

        let device_for_cb = device.clone();
        let follow_up_started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = follow_up_started.clone();
        assert!(h.set_stop_callback(Arc::new(move || {
            device_for_cb.play(Generator::sine(200.0, 8_000.0), true);
            flag.store(true, Ordering::Relaxed);
        })));

        let mut out = vec![0.0f32; 16];
        device.mix_into(16, &mut out);
        assert!(follow_up_started.load(Ordering::Relaxed), "stop callback must run and be able to call Device::play");
    }

    #[test]
    fn looping_voice_restarts_instead_of_stopping() {
        let specs = Specs::new(8_000.0, ChannelLayout::Mono, crate::spec::SampleFormat::F32);
        let device = Device::open(specs, Duration::from_millis(50));
        let sound = crate::effects::Limiter::new(Generator::sine(100.0, 8_000.0), 0.0, 10.0 / 8_000.0);
        let h = device.play(sound, false);
        assert!(h.set_loop_count(-1));

        let mut out = vec![0.0f32; 40];
        for _ in 0..8 {
            device.mix_into(5, &mut out[..5]);
        }
        assert_eq!(h.state(), Some(HandleState::Playing), "an infinitely-looping voice must never become Invalid");
    }

    #[test]
    fn stopping_a_handle_silences_it_next_block() {
        let specs = Specs::new(8_000.0, ChannelLayout::Mono, crate::spec::SampleFormat::F32);
        let device = Device::open(specs, Duration::from_millis(50));
        let h = device.play(Generator::sine(100.0, 8_000.0), true);
        assert!(h.stop());
        let mut out = vec![0.0f32; 16];
        device.mix_into(16, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn linear_distance_model_attenuates_with_range() {
        let near = distance_gain(DistanceModel::LinearClamped, 1.0, 1.0, 10.0, 1.0);
        let far = distance_gain(DistanceModel::LinearClamped, 10.0, 1.0, 10.0, 1.0);
        assert!((near - 1.0).abs() < 1e-6);
        assert!(far.abs() < 1e-6);
    }
}
