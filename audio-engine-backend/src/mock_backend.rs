//! In-process mock backend (feature `mock-audio`) for tests and headless
//! hosts. Ported from `audio-backend::mock_backend`: stores the render
//! closure but never drives it from a real audio thread — a test calls
//! [`MockAudioBackend::pump`] to simulate one callback instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AudioBackend, BackendError, DeviceInfo, DeviceInfoProvider, DiagnosticsCb, RenderFn};

pub struct MockAudioBackend {
    info: DeviceInfo,
    render: Mutex<Option<RenderFn>>,
    frames: AtomicU64,
    diagnostics: Option<DiagnosticsCb>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo { sample_rate: 48_000, buffer_size: 256, channels: 2, device_name: Some("mock-device".to_string()) },
            render: Mutex::new(None),
            frames: AtomicU64::new(0),
            diagnostics: None,
        }
    }

    /// Synchronously invokes the registered render closure once, as if one
    /// hardware callback had fired, and advances the frame counter.
    pub fn pump(&self, data: &mut [f32]) {
        let render = self.render.lock().unwrap().clone();
        if let Some(render) = render {
            let frames = data.len() / self.info.channels.max(1) as usize;
            render(data, self.info.sample_rate, frames);
            self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        } else {
            data.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        *self.render.lock().unwrap() = Some(render);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        *self.render.lock().unwrap() = None;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }
    fn buffer_size(&self) -> usize {
        self.info.buffer_size
    }
    fn channels(&self) -> u16 {
        self.info.channels
    }
    fn frames_since_start(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        self.diagnostics = cb;
    }
    fn as_device_info_provider(&self) -> Option<&dyn DeviceInfoProvider> {
        Some(self)
    }
}

impl DeviceInfoProvider for MockAudioBackend {
    fn get_device_name(&self) -> Option<&str> {
        self.info.device_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_without_render_fills_silence() {
        let backend = MockAudioBackend::new();
        let mut data = vec![1.0f32; 8];
        backend.pump(&mut data);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn start_then_pump_invokes_render_and_advances_frame_count() {
        let mut backend = MockAudioBackend::new();
        backend.start(Arc::new(|data: &mut [f32], _rate, _frames| data.iter_mut().for_each(|s| *s = 0.5))).unwrap();
        let mut data = vec![0.0f32; 8];
        backend.pump(&mut data);
        assert!(data.iter().all(|&s| s == 0.5));
        assert_eq!(backend.frames_since_start(), 4);
    }
}
