//! Factory registry (supplemented feature, §9 redesign flag "global mutable
//! singletons → explicit factories").
//!
//! `original_source/include/plugin/PluginManager.h` and
//! `include/devices/DeviceManager.h` are both non-constructible, `static`-
//! only classes holding process-global `unordered_map`s of factories. That
//! shape doesn't translate into idiomatic Rust (no ambient static mutable
//! state, no implicit load order); instead this is a plain, constructible
//! object a host owns and threads through explicitly, matching how
//! `audio-engine-backend::create_audio_backend()` is a free function
//! returning a boxed trait object rather than a registered-once global.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::error::{EngineError, Result};
use crate::stream::Sound;

pub type SoundFactory = Arc<dyn Fn(&[String]) -> Result<Arc<dyn Sound>> + Send + Sync>;
pub type DeviceFactory = Arc<dyn Fn() -> Arc<Device> + Send + Sync>;

/// Named, swappable construction points for sound sources and devices.
///
/// Unlike the teacher's static managers, this is an ordinary value: a host
/// can hold several registries (e.g. one for tests with only a mock device
/// factory, one for production), and registration requires a `&mut` or
/// shared reference to a concrete instance rather than mutating process-wide
/// state.
#[derive(Default)]
pub struct Registry {
    sound_factories: RwLock<HashMap<String, SoundFactory>>,
    device_factories: RwLock<HashMap<String, DeviceFactory>>,
    default_device: RwLock<Option<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sound_factory(&self, name: impl Into<String>, factory: SoundFactory) {
        self.sound_factories.write().insert(name.into(), factory);
    }

    pub fn sound_factory(&self, name: &str) -> Option<SoundFactory> {
        self.sound_factories.read().get(name).cloned()
    }

    pub fn create_sound(&self, name: &str, args: &[String]) -> Result<Arc<dyn Sound>> {
        let factory = self.sound_factory(name).ok_or_else(|| EngineError::Resource(format!("no sound factory registered for '{name}'")))?;
        factory(args)
    }

    pub fn register_device_factory(&self, name: impl Into<String>, factory: DeviceFactory) {
        self.device_factories.write().insert(name.into(), factory);
    }

    pub fn device_factory(&self, name: &str) -> Option<DeviceFactory> {
        self.device_factories.read().get(name).cloned()
    }

    pub fn set_default_device(&self, name: impl Into<String>) {
        *self.default_device.write() = Some(name.into());
    }

    pub fn default_device_factory(&self) -> Option<DeviceFactory> {
        let name = self.default_device.read().clone()?;
        self.device_factory(&name)
    }

    pub fn open_device(&self, name: &str) -> Result<Arc<Device>> {
        let factory = self.device_factory(name).ok_or_else(|| EngineError::Resource(format!("no device factory registered for '{name}'")))?;
        Ok(factory())
    }

    pub fn open_default_device(&self) -> Result<Arc<Device>> {
        let factory = self.default_device_factory().ok_or_else(|| EngineError::Resource("no default device factory set".to_string()))?;
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;
    use crate::spec::{ChannelLayout, SampleFormat, Specs};
    use std::time::Duration;

    #[test]
    fn unregistered_device_factory_errors_instead_of_panicking() {
        let registry = Registry::new();
        assert!(registry.open_device("cpal").is_err());
    }

    #[test]
    fn registered_device_factory_is_reachable_by_name() {
        let registry = Registry::new();
        registry.register_device_factory(
            "mock",
            Arc::new(|| Device::open(Specs::new(8_000.0, ChannelLayout::Mono, SampleFormat::F32), Duration::from_millis(20))),
        );
        registry.set_default_device("mock");
        assert!(registry.open_default_device().is_ok());
    }

    #[test]
    fn registered_sound_factory_builds_sounds_by_name() {
        let registry = Registry::new();
        registry.register_sound_factory("sine", Arc::new(|args| {
            let freq: f32 = args.first().map(|s| s.parse().unwrap_or(440.0)).unwrap_or(440.0);
            Ok(Generator::sine(freq, 8_000.0))
        }));
        let sound = registry.create_sound("sine", &["220".to_string()]);
        assert!(sound.is_ok());
    }
}
