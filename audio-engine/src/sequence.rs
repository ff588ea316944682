//! Sequence mixer (§4.8, C9): a time-positioned set of entries played
//! through an embedded software [`Device`], which does the actual summing.
//!
//! An entry's animatable properties (volume, pitch, panning, location,
//! orientation)
//! are evaluated against a keyframe clock (`fps`) driven by the sequence's
//! own wall/sample clock (seconds), independent of the sample rate used for
//! audio itself — mirrors keeping [`AnimatedProperty`] keyframe-indexed
//! rather than sample-indexed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::animated::AnimatedProperty;
use crate::device::{Device, DistanceModel, Handle, Params3D, Pose};
use crate::spec::Specs;
use crate::stream::{Reader, Sound, UNKNOWN_LENGTH};

pub type EntryId = u64;

/// One time-positioned element of a sequence. `begin`/`end`/`skip` are frame
/// offsets in the sequence's own frame space (`end < 0` means "play until
/// the sound's own EOS"). Cloning is cheap: the [`AnimatedProperty`] fields
/// share their underlying storage.
#[derive(Clone)]
pub struct Entry {
    pub sound: Arc<dyn Sound>,
    pub begin: i64,
    pub end: i64,
    pub skip: i64,
    pub muted: bool,
    pub is_3d: bool,
    pub params_3d: Params3D,
    pub volume: AnimatedProperty,
    pub pitch: AnimatedProperty,
    pub panning: AnimatedProperty,
    pub location: AnimatedProperty,
    pub orientation: AnimatedProperty,
}

impl Entry {
    /// A non-3D entry at full, constant volume and pitch, played from the
    /// start as soon as it overlaps the read window.
    pub fn new(sound: Arc<dyn Sound>, begin: i64, end: i64) -> Self {
        Self {
            sound,
            begin,
            end,
            skip: 0,
            muted: false,
            is_3d: false,
            params_3d: Params3D::default(),
            volume: AnimatedProperty::new(1, vec![1.0]),
            pitch: AnimatedProperty::new(1, vec![1.0]),
            panning: AnimatedProperty::new(1, vec![0.0]),
            location: AnimatedProperty::new(3, vec![0.0, 0.0, 0.0]),
            orientation: AnimatedProperty::new(4, vec![0.0, 0.0, 0.0, 1.0]),
        }
    }
}

/// Tracks what a sequence-handle was last synced against, so the reader can
/// detect "sound changed" / "position changed" / "params changed" without a
/// bespoke dirty-flag protocol (§4.8 step 2).
struct EntryCache {
    handle: Handle,
    sound_ptr: usize,
    begin: i64,
    skip: i64,
    is_3d: bool,
    params_3d: Params3D,
}

/// Identity (not structural) comparison key for an entry's sound, used to
/// detect "sound changed" (§4.8 step 2) without requiring `Sound: PartialEq`.
fn sound_identity(sound: &Arc<dyn Sound>) -> usize {
    Arc::as_ptr(sound) as *const () as usize
}

struct Shared {
    entries: BTreeMap<EntryId, Entry>,
    muted: bool,
    listener_location: AnimatedProperty,
    listener_orientation: AnimatedProperty,
    listener_volume: AnimatedProperty,
    speed_of_sound: f32,
    doppler_factor: f32,
    distance_model: DistanceModel,
}

/// Owns the entry set and listener automation; [`Sequence::create_reader`]
/// spins up the embedded device and per-entry handle cache.
pub struct Sequence {
    specs: Specs,
    fps: f64,
    next_id: AtomicU64,
    shared: Arc<Mutex<Shared>>,
}

impl Sequence {
    pub fn new(specs: Specs, fps: f64) -> Arc<Self> {
        Arc::new(Self {
            specs,
            fps,
            next_id: AtomicU64::new(0),
            shared: Arc::new(Mutex::new(Shared {
                entries: BTreeMap::new(),
                muted: false,
                listener_location: AnimatedProperty::new(3, vec![0.0, 0.0, 0.0]),
                listener_orientation: AnimatedProperty::new(4, vec![0.0, 0.0, 0.0, 1.0]),
                listener_volume: AnimatedProperty::new(1, vec![1.0]),
                speed_of_sound: 343.3,
                doppler_factor: 1.0,
                distance_model: DistanceModel::InverseClamped,
            })),
        })
    }

    pub fn add_entry(&self, entry: Entry) -> EntryId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.lock().entries.insert(id, entry);
        id
    }

    pub fn remove_entry(&self, id: EntryId) {
        self.shared.lock().entries.remove(&id);
    }

    /// Mutates an entry in place. Changes to `sound`, `begin`/`skip`, or the
    /// 3D params take effect on the next `read` (detected by the reader's
    /// cache, not by an explicit version bump).
    pub fn update_entry(&self, id: EntryId, f: impl FnOnce(&mut Entry)) -> bool {
        let mut shared = self.shared.lock();
        match shared.entries.get_mut(&id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.lock().muted = muted;
    }

    pub fn listener_location(&self) -> AnimatedProperty {
        self.shared.lock().listener_location.clone()
    }

    pub fn listener_orientation(&self) -> AnimatedProperty {
        self.shared.lock().listener_orientation.clone()
    }

    pub fn listener_volume(&self) -> AnimatedProperty {
        self.shared.lock().listener_volume.clone()
    }

    pub fn set_3d_settings(&self, speed_of_sound: f32, doppler_factor: f32, distance_model: DistanceModel) {
        let mut shared = self.shared.lock();
        shared.speed_of_sound = speed_of_sound;
        shared.doppler_factor = doppler_factor;
        shared.distance_model = distance_model;
    }
}

impl Sound for Sequence {
    fn create_reader(&self) -> Box<dyn Reader> {
        let device = Device::open(self.specs, std::time::Duration::from_secs(1));
        {
            let shared = self.shared.lock();
            device.set_listener_3d(shared.speed_of_sound, shared.doppler_factor);
        }
        Box::new(SequenceReader {
            shared: self.shared.clone(),
            device,
            specs: self.specs,
            fps: self.fps,
            virtual_seconds: 0.0,
            caches: std::collections::HashMap::new(),
        })
    }
}

struct SequenceReader {
    shared: Arc<Mutex<Shared>>,
    device: Arc<Device>,
    specs: Specs,
    fps: f64,
    virtual_seconds: f64,
    caches: std::collections::HashMap<EntryId, EntryCache>,
}

impl SequenceReader {
    fn sync_entries(&mut self, window_start: i64, window_end: i64) {
        let shared = self.shared.lock();
        let speed_of_sound = shared.speed_of_sound;
        let doppler_factor = shared.doppler_factor;
        let distance_model = shared.distance_model;
        let sequence_muted = shared.muted;

        let listener_frame = self.virtual_seconds * self.fps;
        let mut listener_loc = [0.0f32; 3];
        shared.listener_location.read_into(listener_frame, &mut listener_loc);
        self.device.set_listener_pose(Pose {
            location: listener_loc,
            orientation: {
                let mut o = [0.0f32; 4];
                shared.listener_orientation.read_into(listener_frame, &mut o);
                o
            },
            velocity: [0.0; 3],
        });
        self.device.set_volume(if sequence_muted { 0.0 } else { shared.listener_volume.read(listener_frame) });

        let live_ids: Vec<EntryId> = shared.entries.keys().copied().collect();

        for id in &live_ids {
            let entry = shared.entries.get(id).expect("live_ids drawn from the same map");
            if entry.end >= 0 && entry.end < entry.begin {
                // `end < begin` is unspecified upstream; treat as never active.
                continue;
            }
            let active_end = if entry.end >= 0 { entry.end } else { i64::MAX };
            let overlaps = entry.begin < window_end && active_end > window_start;
            if !overlaps {
                continue;
            }

            let mut effective_params = entry.params_3d;
            if effective_params.distance_model == DistanceModel::Invalid {
                effective_params.distance_model = distance_model;
            }

            let ptr = sound_identity(&entry.sound);
            let needs_new_handle = match self.caches.get(id) {
                Some(c) => c.sound_ptr != ptr || !c.handle.is_valid(),
                None => true,
            };
            if needs_new_handle {
                let handle = self.device.play(entry.sound.clone(), true);
                self.caches.insert(
                    *id,
                    EntryCache {
                        handle,
                        sound_ptr: ptr,
                        begin: i64::MIN,
                        skip: 0,
                        is_3d: !entry.is_3d, // force a params sync below
                        params_3d: effective_params,
                    },
                );
            }
            let cache = self.caches.get_mut(id).expect("just inserted or already present");

            if cache.begin != entry.begin || cache.skip != entry.skip {
                let target = self.virtual_seconds_to_frames() - entry.begin + entry.skip;
                cache.handle.seek(target.max(0));
                cache.begin = entry.begin;
                cache.skip = entry.skip;
            }

            let window_frame = self.virtual_seconds_to_frames();
            if window_frame < entry.begin {
                cache.handle.pause();
            } else {
                cache.handle.resume();
            }

            if cache.is_3d != entry.is_3d || cache.params_3d != effective_params {
                cache.handle.set_3d(entry.is_3d);
                cache.handle.set_params_3d(effective_params);
                cache.is_3d = entry.is_3d;
                cache.params_3d = effective_params;
            }

            let f = self.virtual_seconds * self.fps;
            let volume = if entry.muted || sequence_muted { 0.0 } else { entry.volume.read(f) };
            cache.handle.set_volume(volume);
            cache.handle.set_pitch(entry.pitch.read(f));
            cache.handle.set_pan(entry.panning.read(f));

            if entry.is_3d {
                let mut loc = [0.0f32; 3];
                entry.location.read_into(f, &mut loc);
                let mut loc_next = [0.0f32; 3];
                entry.location.read_into(f + 1.0, &mut loc_next);
                let fps = self.fps as f32;
                let velocity = [(loc_next[0] - loc[0]) * fps, (loc_next[1] - loc[1]) * fps, (loc_next[2] - loc[2]) * fps];
                let mut orient = [0.0f32; 4];
                entry.orientation.read_into(f, &mut orient);
                cache.handle.set_pose(Pose { location: loc, orientation: orient, velocity });
            }

            if active_end != i64::MAX && window_frame >= active_end {
                cache.handle.pause();
            }
        }

        self.caches.retain(|id, cache| {
            let keep = shared.entries.contains_key(id);
            if !keep {
                cache.handle.stop();
            }
            keep
        });

        self.device.set_listener_3d(speed_of_sound, doppler_factor);
    }

    fn virtual_seconds_to_frames(&self) -> i64 {
        (self.virtual_seconds * self.specs.rate).round() as i64
    }
}

impl Reader for SequenceReader {
    fn specs(&self) -> Specs {
        self.specs
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn length(&self) -> i64 {
        UNKNOWN_LENGTH
    }

    fn position(&self) -> i64 {
        self.virtual_seconds_to_frames()
    }

    fn seek(&mut self, _position: i64) -> bool {
        false
    }

    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        *eos = false;
        let window_start = self.virtual_seconds_to_frames();
        let window_end = window_start + len as i64;
        self.sync_entries(window_start, window_end);
        self.virtual_seconds += len as f64 / self.specs.rate;

        self.device.mix_into(len, out);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;
    use crate::spec::{ChannelLayout, SampleFormat};

    fn specs() -> Specs {
        Specs::new(8_000.0, ChannelLayout::Mono, SampleFormat::F32)
    }

    #[test]
    fn entry_outside_window_stays_silent_until_begin() {
        let seq = Sequence::new(specs(), 30.0);
        seq.add_entry(Entry::new(Generator::sine(100.0, 8_000.0), 100, -1));

        let mut reader = seq.create_reader();
        let mut eos = false;
        let mut out = vec![0.0f32; 50];
        reader.read(50, &mut eos, &mut out);
        assert!(out.iter().all(|&s| s == 0.0), "entry starting at frame 100 must be silent in [0,50)");
    }

    #[test]
    fn entry_plays_once_window_reaches_begin() {
        let seq = Sequence::new(specs(), 30.0);
        seq.add_entry(Entry::new(Generator::sine(100.0, 8_000.0), 0, -1));

        let mut reader = seq.create_reader();
        let mut eos = false;
        let mut out = vec![0.0f32; 50];
        reader.read(50, &mut eos, &mut out);
        assert!(out.iter().any(|&s| s != 0.0), "entry starting at frame 0 must produce sound immediately");
    }

    #[test]
    fn removed_entry_is_retired() {
        let seq = Sequence::new(specs(), 30.0);
        let id = seq.add_entry(Entry::new(Generator::sine(100.0, 8_000.0), 0, -1));
        let mut reader = seq.create_reader();
        let mut eos = false;
        let mut out = vec![0.0f32; 16];
        reader.read(16, &mut eos, &mut out);

        seq.remove_entry(id);
        let mut out2 = vec![0.0f32; 16];
        reader.read(16, &mut eos, &mut out2);
        assert!(out2.iter().all(|&s| s == 0.0));
    }
}
