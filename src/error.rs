//! Error types for the call recorder

use std::path::PathBuf;
use thiserror::Error;

/// Encoder backend errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Encoder is not open")]
    NotOpen,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control link and audio endpoint errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for reply to {0:?}")]
    Timeout(String),

    #[error("Control link disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Failures that abort a recording and are shown to the user
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Could not open the file {}. Please verify the output settings ({source})", path.display())]
    OutputTarget {
        path: PathBuf,
        #[source]
        source: EncoderError,
    },

    #[error("Could not obtain the audio streams for this call. The replies were:\n{local_reply}\n{remote_reply}")]
    Negotiation {
        local_reply: String,
        remote_reply: String,
    },

    #[error("Could not open audio endpoints: {0}")]
    Endpoints(#[source] TransportError),

    #[error("Error while writing this call to disk, recording terminated ({0})")]
    Write(#[source] EncoderError),
}

impl RecordingError {
    /// Short machine-readable kind, used in notifications
    pub fn kind(&self) -> &'static str {
        match self {
            RecordingError::OutputTarget { .. } => "configuration",
            RecordingError::Negotiation { .. } | RecordingError::Endpoints(_) => "transport",
            RecordingError::Write(_) => "write",
        }
    }
}
