//! Embeddable, real-time-safe audio DSP engine.
//!
//! The crate is organized bottom-up: [`spec`] and [`stream`] define the
//! primitives and the pull-based `Sound`/`Reader` contract every other
//! module builds on; [`generators`] and the effect modules under [`effects`]
//! are DSP nodes over that contract; [`device`], [`orchestration`] and
//! [`sync`] form the playback runtime that drives a graph of them.

pub mod animated;
pub mod cache;
pub mod convolution;
pub mod device;
pub mod effects;
pub mod error;
pub mod generators;
pub mod offline;
pub mod orchestration;
pub mod registry;
pub mod resample;
pub mod sequence;
pub mod spec;
pub mod stream;
pub mod sync;
pub mod timestretch;

pub use error::{EngineError, Result};
pub use spec::{Buffer, ChannelLayout, SampleFormat, Specs};
pub use stream::{Reader, Sound, UNKNOWN_LENGTH};
