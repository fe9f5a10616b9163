//! Error kinds shared by every component, following the classification in
//! the error handling design: configuration, transient I/O, device quota,
//! fatal device, decoder and internal errors each get their own variant so
//! callers can decide whether to retry, surface to the user, or just drop a
//! frame.

use thiserror::Error;

/// The one error type returned by fallible core operations.
#[derive(Debug, Error)]
pub enum HyperError {
    /// Bad or missing configuration; the caller must not start the pipeline.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Recoverable I/O failure (socket timeout, TCP reset, HTTP 5xx, ...).
    /// The driver should retry with backoff; the pipeline keeps running.
    #[error("transient i/o error: {0}")]
    TransientIo(String),

    /// The device can't keep up with the write rate (Yeelight's 1 cmd/s
    /// limit, a saturated Hue bridge, ...). Callers coalesce writes.
    #[error("device quota exceeded: {0}")]
    DeviceQuota(String),

    /// Unrecoverable device failure: bad auth, unsupported firmware, a
    /// permanent protocol mismatch. The instance should move to `Errored`.
    #[error("fatal device error: {0}")]
    FatalDevice(String),

    /// Frame decoding failed (missing LUT for requested tone-mapping,
    /// unknown pixel format, ...). The grabber must stop.
    #[error("decoder error: {0}")]
    Decoder(String),

    /// An invariant was violated. Logged and the offending instance is
    /// stopped; it must never be allowed to corrupt sibling instances.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HyperError>;

impl HyperError {
    pub fn config(msg: impl Into<String>) -> Self {
        HyperError::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        HyperError::Internal(msg.into())
    }

    /// Whether the error kind represents a condition the pipeline should
    /// keep running through (as opposed to stopping the instance).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HyperError::TransientIo(_) | HyperError::DeviceQuota(_))
    }
}
