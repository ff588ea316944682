#![cfg(feature = "mock-audio")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use audio_engine_backend::mock_backend::MockAudioBackend;
use audio_engine_backend::{create_audio_backend, AudioBackend};

#[test]
fn create_audio_backend_returns_the_mock_when_the_feature_is_on() {
    let backend = create_audio_backend().unwrap();
    assert_eq!(backend.sample_rate(), 48_000);
    assert_eq!(backend.channels(), 2);
    assert_eq!(backend.frames_since_start(), 0);
}

#[test]
fn pump_drives_the_registered_render_closure_and_advances_frame_count() {
    let mut backend = MockAudioBackend::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_render = calls.clone();

    backend
        .start(Arc::new(move |data: &mut [f32], _rate, _frames| {
            calls_in_render.fetch_add(1, Ordering::Relaxed);
            data.iter_mut().for_each(|s| *s = 1.0);
        }))
        .unwrap();

    let mut buf = vec![0.0f32; 512]; // 256 stereo frames
    backend.pump(&mut buf);
    backend.pump(&mut buf);

    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(backend.frames_since_start(), 512);
    assert!(buf.iter().all(|&s| s == 1.0));
}

#[test]
fn stop_clears_the_render_closure_so_later_pumps_produce_silence() {
    let mut backend = MockAudioBackend::new();
    backend.start(Arc::new(|data: &mut [f32], _rate, _frames| data.iter_mut().for_each(|s| *s = 1.0))).unwrap();

    let mut buf = vec![0.0f32; 16];
    backend.pump(&mut buf);
    assert!(buf.iter().all(|&s| s == 1.0));

    backend.stop().unwrap();
    backend.pump(&mut buf);
    assert!(buf.iter().all(|&s| s == 0.0));
}
