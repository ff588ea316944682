//! Typed construction-time errors.
//!
//! Per §7: constructors fail fast with a typed error; the streaming
//! contract's `read` never surfaces one. Handle operations instead return
//! `bool` (see [`crate::device::Handle`]).

use thiserror::Error;

/// Construction-time failure. Never returned from the real-time read path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("incompatible specs: {0}")]
    Specs(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("file error: {0}")]
    File(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("resource allocation failed: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
