//! Encoder backends
//!
//! The pipeline hands equal-length sample windows to an [`Encoder`]; which
//! backend is used is decided by an [`EncoderFactory`] from the configured
//! output format.

pub mod raw;
pub mod wav;

pub use raw::RawEncoder;
pub use wav::WavEncoder;

use chrono::{DateTime, Local};
use std::path::Path;

use crate::config::OutputFormat;
use crate::error::EncoderError;

/// Sink for mixed call audio
pub trait Encoder: Send {
    /// Metadata to embed; must be called before `open`. Backends without tag
    /// support ignore it.
    fn set_tags(&mut self, _comment: &str, _timestamp: DateTime<Local>) {}

    /// Create the output file. The backend may normalise the file name,
    /// see [`Encoder::file_name`].
    fn open(&mut self, path: &Path, sample_rate: u32, stereo: bool) -> Result<(), EncoderError>;

    /// Encode `left.len()` samples per channel. `right` is `None` for mono
    /// output and must have the same length as `left` otherwise. `flush`
    /// asks the backend to push everything to disk.
    fn write(&mut self, left: &[i16], right: Option<&[i16]>, flush: bool)
        -> Result<(), EncoderError>;

    /// Finish the file. Further writes fail with [`EncoderError::NotOpen`].
    fn close(&mut self) -> Result<(), EncoderError>;

    /// Name of the file actually written
    fn file_name(&self) -> &Path;
}

/// Chooses an encoder backend for an output format
pub trait EncoderFactory: Send {
    fn create(&self, format: OutputFormat) -> Result<Box<dyn Encoder>, EncoderError>;
}

/// Factory for the backends shipped with this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEncoders;

impl EncoderFactory for BuiltinEncoders {
    fn create(&self, format: OutputFormat) -> Result<Box<dyn Encoder>, EncoderError> {
        Ok(match format {
            OutputFormat::Wav => Box::new(WavEncoder::new()),
            OutputFormat::Raw => Box::new(RawEncoder::new()),
        })
    }
}

/// Replace the extension of `path` with `ext` unless it already matches
pub(crate) fn with_extension(path: &Path, ext: &str) -> std::path::PathBuf {
    match path.extension() {
        Some(current) if current.eq_ignore_ascii_case(ext) => path.to_path_buf(),
        _ => path.with_extension(ext),
    }
}
