//! Offline rendering (§6 `mixdown`/`mixdown_per_channel`).
//!
//! Grounded on `tools/sfx-convert/src/main.rs`'s pattern of hand-writing a
//! small binary container (there via a custom `SFX1` header, here via a
//! canonical WAV header) with raw `Write` calls rather than pulling in an
//! encoding crate the teacher doesn't otherwise depend on. The render loop
//! itself is the same pull-based `Reader::read` consumption every other
//! node in this crate uses, just run to a file instead of a live device.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{EngineError, Result};
use crate::spec::Specs;
use crate::stream::Sound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    PcmF32,
    PcmI16,
}

const RENDER_CHUNK_FRAMES: usize = 4096;

fn write_wav_header(w: &mut impl Write, specs: Specs, codec: Codec, frames: u64) -> std::io::Result<()> {
    let channels = specs.channels.channel_count() as u16;
    let bits_per_sample: u16 = match codec {
        Codec::PcmF32 => 32,
        Codec::PcmI16 => 16,
    };
    let format_tag: u16 = match codec {
        Codec::PcmF32 => 3, // IEEE float
        Codec::PcmI16 => 1, // integer PCM
    };
    let byte_rate = specs.rate as u32 * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_bytes = frames * block_align as u64;

    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_bytes as u32).to_le_bytes())?;
    w.write_all(b"WAVE")?;

    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&format_tag.to_le_bytes())?;
    w.write_all(&channels.to_le_bytes())?;
    w.write_all(&(specs.rate as u32).to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&bits_per_sample.to_le_bytes())?;

    w.write_all(b"data")?;
    w.write_all(&(data_bytes as u32).to_le_bytes())?;
    Ok(())
}

fn write_samples(w: &mut impl Write, samples: &[f32], codec: Codec) -> std::io::Result<()> {
    match codec {
        Codec::PcmF32 => {
            for s in samples {
                w.write_all(&s.to_le_bytes())?;
            }
        }
        Codec::PcmI16 => {
            for s in samples {
                let clamped = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                w.write_all(&clamped.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

/// Rewrites the header in place once the true frame count is known,
/// avoiding a pre-pass over the source just to learn its length (the source
/// may be unbounded until `length_frames` caps it anyway).
fn patch_wav_lengths(file: &mut File, specs: Specs, codec: Codec, frames: u64) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    write_wav_header(file, specs, codec, frames)?;
    Ok(())
}

/// Renders `sound` from `start_frame` for `length_frames` (or until EOS,
/// whichever is shorter) to a single interleaved file.
pub fn mixdown(
    sound: &Arc<dyn Sound>,
    start_frame: i64,
    length_frames: i64,
    buffer_size: usize,
    path: impl AsRef<Path>,
    container: Container,
    codec: Codec,
) -> Result<()> {
    let Container::Wav = container;
    let mut reader = sound.create_reader();
    let specs = reader.specs();
    let channels = specs.channels.channel_count() as usize;

    if start_frame > 0 {
        reader.seek(start_frame);
    }

    let mut file = File::create(path.as_ref()).map_err(|e| EngineError::File(e.to_string()))?;
    write_wav_header(&mut file, specs, codec, 0).map_err(|e| EngineError::File(e.to_string()))?;
    let mut writer = BufWriter::new(&mut file);

    let mut scratch = vec![0.0f32; buffer_size.max(1) * channels];
    let mut written_frames: u64 = 0;
    let mut remaining = length_frames;

    loop {
        if remaining == 0 {
            break;
        }
        let want = if remaining < 0 { buffer_size } else { buffer_size.min(remaining as usize) };
        if want == 0 {
            break;
        }
        let mut eos = false;
        let produced = reader.read(want, &mut eos, &mut scratch);
        if produced > 0 {
            write_samples(&mut writer, &scratch[..produced * channels], codec).map_err(|e| EngineError::File(e.to_string()))?;
            written_frames += produced as u64;
            if remaining > 0 {
                remaining -= produced as i64;
            }
        }
        if eos || produced == 0 {
            break;
        }
    }

    writer.flush().map_err(|e| EngineError::File(e.to_string()))?;
    drop(writer);
    patch_wav_lengths(&mut file, specs, codec, written_frames).map_err(|e| EngineError::File(e.to_string()))?;

    info!(frames = written_frames, path = %path.as_ref().display(), "mixdown complete");
    Ok(())
}

/// Like [`mixdown`] but de-interleaves into one mono file per channel,
/// named `<base>_<n>.<ext>` (1-indexed). If `path` has no extension the
/// suffix is appended to the whole file name.
pub fn mixdown_per_channel(
    sound: &Arc<dyn Sound>,
    start_frame: i64,
    length_frames: i64,
    buffer_size: usize,
    path: impl AsRef<Path>,
    container: Container,
    codec: Codec,
) -> Result<()> {
    let Container::Wav = container;
    let mut reader = sound.create_reader();
    let mut specs = reader.specs();
    let channels = specs.channels.channel_count() as usize;

    if start_frame > 0 {
        reader.seek(start_frame);
    }

    let base = path.as_ref();
    let mut files: Vec<(File, std::path::PathBuf)> = Vec::with_capacity(channels);
    for ch in 0..channels {
        let out_path = per_channel_path(base, ch + 1);
        let mut f = File::create(&out_path).map_err(|e| EngineError::File(e.to_string()))?;
        let mut mono_specs = specs;
        mono_specs.channels = crate::spec::ChannelLayout::Mono;
        write_wav_header(&mut f, mono_specs, codec, 0).map_err(|e| EngineError::File(e.to_string()))?;
        files.push((f, out_path));
    }
    specs.channels = crate::spec::ChannelLayout::Mono;

    let mut scratch = vec![0.0f32; buffer_size.max(1) * channels];
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(buffer_size); channels];
    let mut written_frames: u64 = 0;
    let mut remaining = length_frames;

    loop {
        if remaining == 0 {
            break;
        }
        let want = if remaining < 0 { buffer_size } else { buffer_size.min(remaining as usize) };
        if want == 0 {
            break;
        }
        let mut eos = false;
        let produced = reader.read(want, &mut eos, &mut scratch);
        if produced > 0 {
            for p in planar.iter_mut() {
                p.clear();
            }
            for frame in 0..produced {
                for (ch, plane) in planar.iter_mut().enumerate() {
                    plane.push(scratch[frame * channels + ch]);
                }
            }
            for (ch, (file, _)) in files.iter_mut().enumerate() {
                write_samples(file, &planar[ch], codec).map_err(|e| EngineError::File(e.to_string()))?;
            }
            written_frames += produced as u64;
            if remaining > 0 {
                remaining -= produced as i64;
            }
        }
        if eos || produced == 0 {
            break;
        }
    }

    for (file, out_path) in files.iter_mut() {
        file.flush().map_err(|e| EngineError::File(e.to_string()))?;
        patch_wav_lengths(file, specs, codec, written_frames).map_err(|e| EngineError::File(e.to_string()))?;
        info!(frames = written_frames, path = %out_path.display(), "per-channel mixdown complete");
    }
    Ok(())
}

fn per_channel_path(base: &Path, index: usize) -> std::path::PathBuf {
    match base.extension() {
        Some(ext) => {
            let stem = base.file_stem().unwrap_or_default().to_string_lossy();
            let mut new_name = format!("{stem}_{index}.");
            new_name.push_str(&ext.to_string_lossy());
            base.with_file_name(new_name)
        }
        None => {
            let name = base.to_string_lossy();
            std::path::PathBuf::from(format!("{name}_{index}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Limiter;
    use crate::generators::Generator;

    #[test]
    fn mixdown_writes_a_well_formed_wav_header() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("audio_engine_offline_test_{}.wav", std::process::id()));
        let sound = Limiter::new(Generator::sine(440.0, 8_000.0), 0.0, 50.0 / 8_000.0);

        mixdown(&sound, 0, -1, 16, &path, Container::Wav, Codec::PcmF32).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
        let data_bytes = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        assert_eq!(data_bytes as usize, 50 * 4);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn mixdown_per_channel_writes_one_mono_file_per_channel() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("audio_engine_offline_test_stereo_{}.wav", std::process::id()));
        let sound = Limiter::new(Generator::sine(440.0, 8_000.0), 0.0, 20.0 / 8_000.0);

        mixdown_per_channel(&sound, 0, -1, 16, &path, Container::Wav, Codec::PcmF32).unwrap();

        let left = per_channel_path(&path, 1);
        let right = per_channel_path(&path, 2);
        assert!(left.exists());
        assert!(!right.exists(), "source is mono; only one channel file should be written");

        std::fs::remove_file(&left).ok();
    }
}
