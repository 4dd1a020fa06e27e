//! RIFF/WAVE output

use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::{with_extension, Encoder};
use crate::error::EncoderError;

/// 16-bit PCM WAV writer
pub struct WavEncoder {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    stereo: bool,
    /// Frames written so far
    frames_written: u64,
}

impl WavEncoder {
    pub fn new() -> Self {
        Self {
            writer: None,
            path: PathBuf::new(),
            stereo: false,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Default for WavEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for WavEncoder {
    fn set_tags(&mut self, _comment: &str, _timestamp: DateTime<Local>) {
        tracing::debug!("WAV output does not carry tags, ignoring");
    }

    fn open(&mut self, path: &Path, sample_rate: u32, stereo: bool) -> Result<(), EncoderError> {
        self.path = with_extension(path, "wav");
        self.stereo = stereo;
        self.frames_written = 0;

        let spec = WavSpec {
            channels: if stereo { 2 } else { 1 },
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(&self.path, spec).map_err(|e| EncoderError::Open {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write(
        &mut self,
        left: &[i16],
        right: Option<&[i16]>,
        flush: bool,
    ) -> Result<(), EncoderError> {
        let writer = self.writer.as_mut().ok_or(EncoderError::NotOpen)?;
        let failed = |e: hound::Error| EncoderError::WriteFailed(e.to_string());

        if self.stereo {
            let right = right.ok_or_else(|| {
                EncoderError::WriteFailed("stereo output needs two channels".into())
            })?;
            for (&l, &r) in left.iter().zip(right) {
                writer.write_sample(l).map_err(failed)?;
                writer.write_sample(r).map_err(failed)?;
            }
        } else {
            for &s in left {
                writer.write_sample(s).map_err(failed)?;
            }
        }

        if flush {
            writer.flush().map_err(failed)?;
        }

        self.frames_written += left.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            tracing::debug!(
                "Closed {} after {} frames",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }

    fn file_name(&self) -> &Path {
        &self.path
    }
}
