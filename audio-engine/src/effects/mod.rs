//! Per-stream effect nodes (§4.3, C4). Each submodule wraps an upstream
//! [`crate::stream::Reader`] and preserves its `specs()` unless documented
//! otherwise (`Pitch` re-labels the rate).

mod adsr;
mod analysis;
mod compressor;
mod delay;
mod echo;
mod fader;
mod iir;
mod limiter;
mod loop_effect;
mod mixer;
mod pingpong;
mod pitch;
mod reverse;
mod volume;

pub use adsr::Adsr;
pub use analysis::{Accumulator, Rectify, SquareShaper, Sum, Threshold};
pub use compressor::Compressor;
pub use delay::Delay;
pub use echo::Echo;
pub use fader::{Fader, FaderKind};
pub use iir::{Biquad, DynamicIir, FilterKind};
pub use limiter::Limiter;
pub use loop_effect::Loop;
pub use mixer::Mixer;
pub use pingpong::PingPong;
pub use pitch::Pitch;
pub use reverse::Reverse;
pub use volume::Volume;
