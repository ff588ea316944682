use std::sync::Arc;
use std::time::Duration;

use audio_engine::device::Device;
use audio_engine::generators::Generator;
use audio_engine::orchestration::{DynamicMusicPlayer, PlaybackManager};
use audio_engine::spec::{ChannelLayout, SampleFormat, Specs};

fn specs() -> Specs {
    Specs::new(48_000.0, ChannelLayout::Mono, SampleFormat::F32)
}

#[test]
fn device_play_pause_resume_stop_roundtrip() {
    let device = Device::open(specs(), Duration::from_millis(0));
    let sound = Generator::sine(440.0, 48_000.0);
    let handle = device.play(sound, false);

    assert!(handle.is_valid());
    assert!(handle.pause());
    assert!(handle.resume());

    let mut out = vec![0.0f32; 256];
    device.mix_into(256, &mut out);
    assert!(out.iter().any(|&s| s != 0.0));

    assert!(handle.stop());
    assert!(!handle.is_valid());
    // Mixing a stopped handle is a no-op, not a panic.
    device.mix_into(256, &mut out);
}

#[test]
fn playback_manager_shares_one_category_per_key() {
    let device = Device::open(specs(), Duration::from_millis(0));
    let manager = PlaybackManager::new(device.clone());

    let music = manager.category("music");
    let same = manager.category("music");
    assert!(Arc::ptr_eq(&music, &same));

    let sfx = manager.category("sfx");
    assert!(!Arc::ptr_eq(&music, &sfx));

    music.set_volume(0.5);
    assert_eq!(music.volume(), 0.5);
    // Categories are independent: "sfx" keeps its default volume.
    assert_eq!(sfx.volume(), 1.0);
}

#[test]
fn dynamic_music_player_crossfades_between_scenes_without_a_transition_sound() {
    let device = Device::open(specs(), Duration::from_millis(0));
    let mut player = DynamicMusicPlayer::new(device.clone(), 3, Duration::from_millis(20));
    player.set_scene_loop(1, Generator::sine(220.0, 48_000.0));
    player.set_scene_loop(2, Generator::sine(440.0, 48_000.0));
    let player = Arc::new(player);

    assert_eq!(player.current_scene(), 0);
    assert!(player.change_scene(1));
    assert_eq!(player.current_scene(), 1);

    // No transition sound was registered for 1 -> 2, so this falls back to
    // the background crossfade thread instead of chaining through a
    // transition clip. A second call while the fade is in flight is
    // rejected by the single "transitioning" flag.
    assert!(player.change_scene(2));
    assert_eq!(player.current_scene(), 2);
    assert!(!player.change_scene(1));

    std::thread::sleep(Duration::from_millis(60));
    assert!(!player.is_transitioning());
}
