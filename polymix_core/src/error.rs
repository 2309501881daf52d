//! Engine error types

use thiserror::Error;

/// Errors surfaced by the mixer.
///
/// Most control operations never return these: invalid handles and out-of-range
/// arguments are ignored so the audio path stays free of error reporting. Only device
/// bring-up, configuration, seeking and queue pushes are fallible.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    /// The platform backend could not be opened
    #[error("{backend} backend failed to initialize: {reason}")]
    BackendInitFailed { backend: String, reason: String },

    /// Channel layout or sample format the engine cannot mix
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Every voice slot is taken by a protected voice
    #[error("No voice slot available")]
    OutOfVoices,

    /// Handle does not name a live voice
    #[error("Invalid voice handle {0:#010x}")]
    InvalidHandle(u32),

    /// The source cannot reposition its stream
    #[error("Seek is not supported by this source")]
    SeekUnsupported,

    /// The source cannot restart from the beginning
    #[error("Rewind is not supported by this source")]
    RewindUnsupported,

    /// A queue already holds its maximum of pending sources
    #[error("Queue is full")]
    QueueFull,

    /// Filter slot beyond the per-stream limit
    #[error("Filter index {0} is out of range")]
    FilterIndexOutOfRange(usize),

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MixerError {
    pub fn backend(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendInitFailed {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for engine operations
pub type MixResult<T> = Result<T, MixerError>;
