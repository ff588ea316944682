use std::sync::Arc;

use audio_engine::generators::Generator;
use audio_engine::offline::{mixdown, mixdown_per_channel, Codec, Container};
use audio_engine::stream::Sound;

fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}
fn read_u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

#[test]
fn mixdown_writes_a_correctly_sized_pcm16_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");

    let sound: Arc<dyn Sound> = Generator::sine(440.0, 48_000.0);
    mixdown(&sound, 0, 4_800, 1024, &path, Container::Wav, Codec::PcmI16).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    assert_eq!(&bytes[12..16], b"fmt ");
    assert_eq!(read_u16_le(&bytes, 22), 1); // mono
    assert_eq!(read_u32_le(&bytes, 24), 48_000); // sample rate
    assert_eq!(read_u16_le(&bytes, 34), 16); // bits per sample

    let data_len = read_u32_le(&bytes, 40) as usize;
    // 4800 mono frames at 16 bits = 2 bytes/sample.
    assert_eq!(data_len, 4_800 * 2);
    assert_eq!(bytes.len(), 44 + data_len);

    let riff_len = read_u32_le(&bytes, 4) as usize;
    assert_eq!(riff_len, bytes.len() - 8);
}

#[test]
fn mixdown_per_channel_splits_into_one_mono_file_per_channel() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("stereo_tone.wav");

    let sound: Arc<dyn Sound> = Generator::sine(220.0, 44_100.0);
    mixdown_per_channel(&sound, 0, 2_205, 512, &base, Container::Wav, Codec::PcmF32).unwrap();

    // Mono input: only the first channel's file is written, 1-indexed.
    let channel_1 = dir.path().join("stereo_tone_1.wav");
    assert!(channel_1.exists());
    let bytes = std::fs::read(&channel_1).unwrap();
    assert_eq!(read_u16_le(&bytes, 22), 1); // split files are always mono
    assert_eq!(read_u32_le(&bytes, 40) as usize, 2_205 * 4); // f32 samples
}
