//! Headerless PCM output (interleaved s16le)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{with_extension, Encoder};
use crate::error::EncoderError;

pub struct RawEncoder {
    out: Option<BufWriter<File>>,
    path: PathBuf,
    stereo: bool,
    /// Interleave scratch space, reused between writes
    scratch: Vec<u8>,
}

impl RawEncoder {
    pub fn new() -> Self {
        Self {
            out: None,
            path: PathBuf::new(),
            stereo: false,
            scratch: Vec::new(),
        }
    }
}

impl Default for RawEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for RawEncoder {
    fn open(&mut self, path: &Path, _sample_rate: u32, stereo: bool) -> Result<(), EncoderError> {
        self.path = with_extension(path, "raw");
        self.stereo = stereo;
        let file = File::create(&self.path).map_err(|e| EncoderError::Open {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.out = Some(BufWriter::new(file));
        Ok(())
    }

    fn write(
        &mut self,
        left: &[i16],
        right: Option<&[i16]>,
        flush: bool,
    ) -> Result<(), EncoderError> {
        let out = self.out.as_mut().ok_or(EncoderError::NotOpen)?;

        self.scratch.clear();
        match (self.stereo, right) {
            (true, Some(right)) => {
                for (&l, &r) in left.iter().zip(right) {
                    self.scratch.extend_from_slice(&l.to_le_bytes());
                    self.scratch.extend_from_slice(&r.to_le_bytes());
                }
            }
            (true, None) => {
                return Err(EncoderError::WriteFailed(
                    "stereo output needs two channels".into(),
                ))
            }
            (false, _) => {
                for &s in left {
                    self.scratch.extend_from_slice(&s.to_le_bytes());
                }
            }
        }

        out.write_all(&self.scratch)
            .map_err(|e| EncoderError::WriteFailed(e.to_string()))?;
        if flush {
            out.flush()
                .map_err(|e| EncoderError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }

    fn file_name(&self) -> &Path {
        &self.path
    }
}
