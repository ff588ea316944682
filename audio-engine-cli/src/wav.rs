//! A toy in-memory WAV decoder (§B "a minimal stand-in, not the file-source
//! contract itself"). Reads the `fmt `/`data` chunks of a canonical RIFF/WAVE
//! file, decoding `PCM16`/`IEEE float32` into an interleaved `f32` buffer
//! that implements [`audio_engine::generators::FileSource`] the same way a
//! real container/codec plugin would.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use audio_engine::generators::{FileSource, StreamInfo};
use audio_engine::spec::{ChannelLayout, SampleFormat, Specs};
use audio_engine::stream::{Reader, Sound};

pub fn channel_layout_from_count(count: u16) -> Option<ChannelLayout> {
    use ChannelLayout::*;
    Some(match count {
        1 => Mono,
        2 => Stereo,
        3 => StereoLfe,
        4 => Quad,
        5 => Surround5,
        6 => Surround51,
        7 => Surround61,
        8 => Surround71,
        _ => return None,
    })
}

struct RiffChunks {
    fmt: Vec<u8>,
    data: Vec<u8>,
}

fn parse_chunks(bytes: &[u8]) -> Result<RiffChunks> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE file");
    }
    let mut fmt = None;
    let mut data = None;
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = (body_start + size).min(bytes.len());
        match id {
            b"fmt " => fmt = Some(bytes[body_start..body_end].to_vec()),
            b"data" => data = Some(bytes[body_start..body_end].to_vec()),
            _ => {}
        }
        pos = body_end + (size % 2); // chunks are word-aligned
    }
    Ok(RiffChunks {
        fmt: fmt.ok_or_else(|| anyhow!("missing fmt chunk"))?,
        data: data.ok_or_else(|| anyhow!("missing data chunk"))?,
    })
}

pub struct WavFile {
    specs: Specs,
    samples: Arc<Vec<f32>>,
    frames: usize,
}

impl WavFile {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let chunks = parse_chunks(&bytes)?;
        if chunks.fmt.len() < 16 {
            bail!("truncated fmt chunk");
        }

        let format_tag = u16::from_le_bytes(chunks.fmt[0..2].try_into().unwrap());
        let channels = u16::from_le_bytes(chunks.fmt[2..4].try_into().unwrap());
        let sample_rate = u32::from_le_bytes(chunks.fmt[4..8].try_into().unwrap());
        let bits_per_sample = u16::from_le_bytes(chunks.fmt[14..16].try_into().unwrap());

        let layout = channel_layout_from_count(channels).ok_or_else(|| anyhow!("unsupported channel count {channels}"))?;

        let samples: Vec<f32> = match (format_tag, bits_per_sample) {
            (1, 16) => chunks
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
                .collect(),
            (3, 32) => chunks.data.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect(),
            (format, bits) => bail!("unsupported wav encoding (format={format}, bits={bits})"),
        };

        let frames = if channels == 0 { 0 } else { samples.len() / channels as usize };
        Ok(Self { specs: Specs::new(sample_rate as f64, layout, SampleFormat::F32), samples: Arc::new(samples), frames })
    }

    pub fn specs(&self) -> Specs {
        self.specs
    }

    pub fn into_sound(self) -> Arc<dyn Sound> {
        Arc::new(self)
    }
}

struct WavReader {
    specs: Specs,
    channels: usize,
    samples: Arc<Vec<f32>>,
    frames: usize,
    position: usize,
}

impl Reader for WavReader {
    fn specs(&self) -> Specs {
        self.specs
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn length(&self) -> i64 {
        self.frames as i64
    }
    fn position(&self) -> i64 {
        self.position as i64
    }
    fn seek(&mut self, position: i64) -> bool {
        if position < 0 {
            return false;
        }
        self.position = (position as usize).min(self.frames);
        true
    }
    fn read(&mut self, len: usize, eos: &mut bool, out: &mut [f32]) -> usize {
        let remaining = self.frames - self.position;
        let produced = len.min(remaining);
        let start = self.position * self.channels;
        let end = start + produced * self.channels;
        out[..produced * self.channels].copy_from_slice(&self.samples[start..end]);
        self.position += produced;
        *eos = self.position >= self.frames;
        produced
    }
}

impl Sound for WavFile {
    fn create_reader(&self) -> Box<dyn Reader> {
        Box::new(WavReader {
            specs: self.specs,
            channels: self.specs.channels.channel_count() as usize,
            samples: self.samples.clone(),
            frames: self.frames,
            position: 0,
        })
    }
}

impl FileSource for WavFile {
    fn query_streams(&self) -> Vec<StreamInfo> {
        vec![StreamInfo { specs: self.specs, start: 0, duration: self.frames as i64 }]
    }
}
