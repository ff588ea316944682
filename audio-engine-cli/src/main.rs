//! Test-harness CLI for `audio-engine` (§6 "out of scope as a core,
//! specified for test harnesses"). Grounded on `tools/sfx-convert/src/main.rs`
//! for the decode/resample/write shape and on `tools/pkg-validator`'s
//! `clap::Parser` subcommand layout, adapted to the `convert/info/play/remap`
//! surface §6 names. Exit codes follow §6 exactly: `0` success, `1` usage,
//! `2` open/decode failure, `3` invalid channel count, `4` unknown codec.

mod wav;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use audio_engine::device::Device;
use audio_engine::offline::{mixdown, Codec, Container};
use audio_engine::resample::ChannelMapper;
use audio_engine::stream::Reader;
use audio_engine_backend::{create_audio_backend, AudioBackend};

use wav::{channel_layout_from_count, WavFile};

#[derive(Parser)]
#[command(name = "audio-engine-cli", about = "Test harness for the audio-engine library crates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode `in` and re-encode it as `out` in the given container/codec.
    Convert { input: PathBuf, output: PathBuf, container: String, codec: String, #[arg(default_value_t = 0)] bitrate: u32 },
    /// Print specs and stream info for `in`.
    Info { input: PathBuf },
    /// Play `in` through the default audio backend.
    Play { input: PathBuf },
    /// Decode `in`, remap it to `channels` channels, and print the result's specs.
    Remap { input: PathBuf, channels: u16 },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Command::Convert { input, output, container, codec, bitrate } => run_convert(&input, &output, &container, &codec, bitrate),
        Command::Info { input } => run_info(&input),
        Command::Play { input } => run_play(&input),
        Command::Remap { input, channels } => run_remap(&input, channels),
    }
}

fn parse_container(name: &str) -> Option<Container> {
    match name.to_ascii_lowercase().as_str() {
        "wav" => Some(Container::Wav),
        _ => None,
    }
}

fn parse_codec(name: &str) -> Option<Codec> {
    match name.to_ascii_lowercase().as_str() {
        "pcm16" | "s16" => Some(Codec::PcmI16),
        "pcmf32" | "f32" => Some(Codec::PcmF32),
        _ => None,
    }
}

fn run_convert(input: &PathBuf, output: &PathBuf, container: &str, codec: &str, bitrate: u32) -> ExitCode {
    let Some(container) = parse_container(container) else {
        error!(container, "unknown container");
        return ExitCode::from(4);
    };
    let Some(codec) = parse_codec(codec) else {
        error!(codec, "unknown codec");
        return ExitCode::from(4);
    };
    if bitrate != 0 {
        info!(bitrate, "bitrate is ignored for uncompressed PCM output");
    }

    let wav = match WavFile::open(input) {
        Ok(wav) => wav,
        Err(e) => {
            error!(error = %e, "failed to open/decode input");
            return ExitCode::from(2);
        }
    };
    let sound = wav.into_sound();

    match mixdown(&sound, 0, -1, 4096, output, container, codec) {
        Ok(()) => {
            info!(output = %output.display(), "conversion complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "mixdown failed");
            ExitCode::from(2)
        }
    }
}

fn run_info(input: &PathBuf) -> ExitCode {
    let wav = match WavFile::open(input) {
        Ok(wav) => wav,
        Err(e) => {
            error!(error = %e, "failed to open/decode input");
            return ExitCode::from(2);
        }
    };
    let specs = wav.specs();
    println!("rate: {}", specs.rate);
    println!("channels: {:?} ({} discrete)", specs.channels, specs.channels.channel_count());
    println!("format: {:?}", specs.format);
    ExitCode::SUCCESS
}

fn run_play(input: &PathBuf) -> ExitCode {
    let wav = match WavFile::open(input) {
        Ok(wav) => wav,
        Err(e) => {
            error!(error = %e, "failed to open/decode input");
            return ExitCode::from(2);
        }
    };
    let sound = wav.into_sound();

    let mut backend = match create_audio_backend() {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "failed to open audio backend");
            return ExitCode::from(2);
        }
    };

    let specs = audio_engine::spec::Specs::new(backend.sample_rate() as f64, {
        channel_layout_from_count(backend.channels()).unwrap_or(audio_engine::spec::ChannelLayout::Stereo)
    }, audio_engine::spec::SampleFormat::F32);
    let device = Device::open(specs, Duration::from_millis(50));
    let handle = device.play(sound, false);

    let device_for_render = device.clone();
    let render: audio_engine_backend::RenderFn = std::sync::Arc::new(move |data, _rate, frames| {
        device_for_render.mix_into(frames, data);
    });

    if let Err(e) = backend.start(render) {
        error!(error = %e, "failed to start playback");
        return ExitCode::from(2);
    }

    while handle.is_valid() {
        std::thread::sleep(Duration::from_millis(50));
    }
    backend.stop().ok();
    ExitCode::SUCCESS
}

fn run_remap(input: &PathBuf, channels: u16) -> ExitCode {
    let Some(layout) = channel_layout_from_count(channels) else {
        error!(channels, "invalid channel count");
        return ExitCode::from(3);
    };

    let wav = match WavFile::open(input) {
        Ok(wav) => wav,
        Err(e) => {
            error!(error = %e, "failed to open/decode input");
            return ExitCode::from(2);
        }
    };
    let sound = wav.into_sound();
    let remapped = ChannelMapper::new(sound, layout, None);
    let reader = remapped.create_reader();
    println!("remapped to {layout:?} ({channels} channels), rate {}", reader.specs().rate);
    ExitCode::SUCCESS
}
