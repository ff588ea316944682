//! OS audio device backends, kept deliberately ignorant of `audio-engine`'s
//! `Device`/`Reader` types — ported from the teacher's `audio-backend`
//! crate, which is likewise a separate crate from `audio-system` and talks
//! to it only through a render-callback closure. Glue code in
//! `audio-engine-cli` bridges a `Device::mix_into` call into the `RenderFn`
//! shape this crate expects.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[cfg(feature = "mock-audio")]
pub mod mock_backend;

#[cfg(not(feature = "mock-audio"))]
pub mod cpal_backend;

/// Backend failure. Construction-time (`new`/`start`/`stop`) only; the
/// render callback itself is infallible (§7 "never fail on the real-time
/// path" applies to backends too).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no matching output device found")]
    DeviceNotFound,
    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to create audio stream")]
    StreamCreationFailed,
    #[error("playback error: {0}")]
    PlaybackError(String),
    #[error("{0}")]
    Other(String),
}

/// Called on the real-time audio thread to fill `data` (interleaved,
/// `frames = data.len() / channels`) at `sample_rate`.
pub type RenderFn = Arc<dyn Fn(&mut [f32], u32, usize) + Send + Sync + 'static>;

/// Non-real-time diagnostics, reported off the audio thread.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    XRun { count: u32 },
    DeviceRemoved,
    BufferSizeChanged { frames: usize },
    Other(String),
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::XRun { count } => write!(f, "XRun(count={count})"),
            DiagnosticEvent::DeviceRemoved => write!(f, "DeviceRemoved"),
            DiagnosticEvent::BufferSizeChanged { frames } => write!(f, "BufferSizeChanged(frames={frames})"),
            DiagnosticEvent::Other(s) => write!(f, "Other({s})"),
        }
    }
}

pub type DiagnosticsCb = Arc<dyn Fn(DiagnosticEvent) + Send + Sync + 'static>;

/// The effective configuration of an open device.
pub struct DeviceInfo {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channels: u16,
    pub device_name: Option<String>,
}

pub trait DeviceInfoProvider {
    fn get_device_name(&self) -> Option<&str>;
}

/// The contract every concrete backend (`cpal`, mock) implements.
pub trait AudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError>;
    fn stop(&mut self) -> Result<(), BackendError>;
    fn sample_rate(&self) -> u32;
    fn buffer_size(&self) -> usize;
    fn channels(&self) -> u16;
    /// Frames delivered since `start`; `0` if not running.
    fn frames_since_start(&self) -> u64;
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>);
    fn as_device_info_provider(&self) -> Option<&dyn DeviceInfoProvider>;
}

#[cfg(not(feature = "mock-audio"))]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = cpal_backend::CpalAudioBackend::new()?;
    tracing::info!(
        sample_rate = backend.sample_rate(),
        buffer_size = backend.buffer_size(),
        channels = backend.channels(),
        device = backend
            .as_device_info_provider()
            .and_then(|d| d.get_device_name())
            .unwrap_or("<unknown>"),
        "opened cpal audio backend"
    );
    Ok(Box::new(backend))
}

#[cfg(feature = "mock-audio")]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = mock_backend::MockAudioBackend::new();
    tracing::info!(
        sample_rate = backend.sample_rate(),
        buffer_size = backend.buffer_size(),
        channels = backend.channels(),
        "opened mock audio backend"
    );
    Ok(Box::new(backend))
}

/// Whether this crate was compiled with the `mock-audio` feature.
pub fn is_mock_backend_enabled() -> bool {
    cfg!(feature = "mock-audio")
}
