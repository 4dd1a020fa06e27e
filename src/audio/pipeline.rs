//! Synchronisation, mixing and encoding of one call's two streams
//!
//! Bytes from the local and remote sockets accumulate in two buffers. Each
//! drain attempt feeds the current imbalance to the [`DriftEstimator`], pads
//! the lagging side when a steady drift shows up, and once both sides hold at
//! least [`MIN_WRITE_MS`] of audio mixes the common prefix and hands it to the
//! encoder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use super::buffer::SampleBuffer;
use super::mix::{mix_to_mono, mix_to_stereo, ChannelLayout};
use super::sync::DriftEstimator;
use super::StreamSide;
use crate::codec::Encoder;
use crate::constants::{
    BYTES_PER_SAMPLE, CAPTURE_SAMPLE_RATE, MAX_DESYNC_SECONDS, MIN_WRITE_MS, SYNC_GRANULARITY,
    SYNC_PRECISION, SYNC_WINDOW,
};
use crate::error::EncoderError;
use crate::protocol::CallId;

/// Pipeline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub layout: ChannelLayout,
    pub sample_rate: u32,
    /// Drift estimator window in drain attempts
    pub sync_window: usize,
    /// Imbalance in samples treated as jitter
    pub sync_precision: i64,
}

impl PipelineConfig {
    pub fn new(layout: ChannelLayout) -> Self {
        Self {
            layout,
            sample_rate: CAPTURE_SAMPLE_RATE,
            sync_window: SYNC_WINDOW,
            sync_precision: SYNC_PRECISION,
        }
    }

    fn min_write_samples(&self) -> usize {
        (self.sample_rate * MIN_WRITE_MS / 1000) as usize
    }

    fn max_desync_samples(&self) -> i64 {
        i64::from(self.sample_rate) * MAX_DESYNC_SECONDS
    }
}

/// Diagnostic log of drift measurements: `<elapsed ms> <raw delta> <correction>`
pub struct DriftLog {
    out: BufWriter<File>,
    started: Instant,
}

impl DriftLog {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            started: Instant::now(),
        })
    }

    pub fn record(&mut self, delta: i64, correction: i64) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{} {} {}",
            self.started.elapsed().as_millis(),
            delta,
            correction
        )
    }

    pub fn close(mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Round a correction to the nearest multiple of the sync granularity
fn quantize(samples: i64) -> i64 {
    let half = SYNC_GRANULARITY / 2 * samples.signum();
    (samples + half) / SYNC_GRANULARITY * SYNC_GRANULARITY
}

/// Buffers, aligns and mixes the two streams of a recorded call
pub struct CallAudioPipeline {
    call: CallId,
    config: PipelineConfig,
    local: SampleBuffer,
    remote: SampleBuffer,
    sync: DriftEstimator,
    encoder: Box<dyn Encoder>,
    drift_log: Option<DriftLog>,
    samples_written: u64,
}

impl CallAudioPipeline {
    /// Create a pipeline writing to an already opened encoder
    pub fn new(call: CallId, config: PipelineConfig, encoder: Box<dyn Encoder>) -> Self {
        Self {
            call,
            config,
            local: SampleBuffer::new(),
            remote: SampleBuffer::new(),
            sync: DriftEstimator::new(config.sync_window, config.sync_precision),
            encoder,
            drift_log: None,
            samples_written: 0,
        }
    }

    pub fn with_drift_log(mut self, log: DriftLog) -> Self {
        self.drift_log = Some(log);
        self
    }

    /// Buffer bytes without attempting a write
    pub fn append(&mut self, side: StreamSide, bytes: &[u8]) {
        match side {
            StreamSide::Local => self.local.extend_from_le_bytes(bytes),
            StreamSide::Remote => self.remote.extend_from_le_bytes(bytes),
        }
    }

    /// Buffer bytes and drain what can be written. Returns the number of
    /// samples per channel handed to the encoder.
    pub fn push(&mut self, side: StreamSide, bytes: &[u8]) -> Result<usize, EncoderError> {
        self.append(side, bytes);
        self.try_write(false)
    }

    pub fn on_local_bytes(&mut self, bytes: &[u8]) -> Result<usize, EncoderError> {
        self.push(StreamSide::Local, bytes)
    }

    pub fn on_remote_bytes(&mut self, bytes: &[u8]) -> Result<usize, EncoderError> {
        self.push(StreamSide::Remote, bytes)
    }

    /// Drain the buffers into the encoder.
    ///
    /// Without `flush`, only the common prefix is written and only once it
    /// reaches the minimum batch size. With `flush`, the shorter buffer is
    /// padded with silence and everything is written, even if that is
    /// nothing at all.
    pub fn try_write(&mut self, flush: bool) -> Result<usize, EncoderError> {
        let samples = if flush {
            self.pad_buffers()
        } else {
            let raw_delta = self.delta();
            self.sync.add(raw_delta);

            let correction = quantize(self.sync.estimate());
            if correction != 0 {
                self.apply_correction(correction);
                self.sync.reset();
            }
            self.log_drift(raw_delta, correction);

            let delta = self.delta();
            if delta.abs() > self.config.max_desync_samples() {
                tracing::warn!(
                    "Call {}: seriously out of sync by {} samples ({}s), padding",
                    self.call,
                    delta,
                    delta / i64::from(self.config.sample_rate)
                );
                let samples = self.pad_buffers();
                self.sync.reset();
                samples
            } else {
                let samples = self.local.len().min(self.remote.len());
                if samples < self.config.min_write_samples() {
                    return Ok(0);
                }
                samples
            }
        };

        self.write_window(samples, flush)?;
        Ok(samples)
    }

    /// Pad the shorter buffer with zero bytes up to the longer one's length.
    /// Returns the resulting number of samples in each buffer.
    pub fn pad_buffers(&mut self) -> usize {
        let l = self.local.byte_len();
        let r = self.remote.byte_len();

        if l < r {
            self.local.pad_bytes(r - l);
            tracing::debug!(
                "Call {}: padding {} samples on local buffer",
                self.call,
                (r - l) / BYTES_PER_SAMPLE
            );
        } else if r < l {
            self.remote.pad_bytes(l - r);
            tracing::debug!(
                "Call {}: padding {} samples on remote buffer",
                self.call,
                (l - r) / BYTES_PER_SAMPLE
            );
        }

        l.max(r) / BYTES_PER_SAMPLE
    }

    /// Close the encoder, optionally flushing everything buffered first
    pub fn close(mut self, flush: bool) -> Result<(), EncoderError> {
        let flushed = if flush {
            self.try_write(true).map(|_| ())
        } else {
            Ok(())
        };
        let closed = self.encoder.close();

        if let Some(log) = self.drift_log.take() {
            if let Err(e) = log.close() {
                tracing::warn!("Call {}: cannot finish drift log: {}", self.call, e);
            }
        }

        tracing::debug!(
            "Call {}: pipeline closed after {} samples",
            self.call,
            self.samples_written
        );
        flushed.and(closed)
    }

    pub fn file_name(&self) -> &Path {
        self.encoder.file_name()
    }

    pub fn local(&self) -> &SampleBuffer {
        &self.local
    }

    pub fn remote(&self) -> &SampleBuffer {
        &self.remote
    }

    pub fn estimator(&self) -> &DriftEstimator {
        &self.sync
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Remote minus local sample count
    fn delta(&self) -> i64 {
        self.remote.len() as i64 - self.local.len() as i64
    }

    /// Positive corrections pad the local side, negative ones the remote side
    fn apply_correction(&mut self, correction: i64) {
        let amount = correction.unsigned_abs() as usize;
        if correction > 0 {
            self.local.pad_samples(amount);
            tracing::debug!(
                "Call {}: drift correction, padding {} samples on local buffer",
                self.call,
                amount
            );
        } else {
            self.remote.pad_samples(amount);
            tracing::debug!(
                "Call {}: drift correction, padding {} samples on remote buffer",
                self.call,
                amount
            );
        }
    }

    fn log_drift(&mut self, delta: i64, correction: i64) {
        let failed = match self.drift_log.as_mut() {
            Some(log) => log.record(delta, correction).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!("Call {}: drift log disabled: {}", self.call, e);
            self.drift_log = None;
        }
    }

    fn write_window(&mut self, samples: usize, flush: bool) -> Result<(), EncoderError> {
        let n = samples.min(self.local.len()).min(self.remote.len());

        match self.config.layout {
            ChannelLayout::Mono => {
                mix_to_mono(&mut self.local.samples_mut()[..n], &self.remote.samples()[..n]);
                self.encoder
                    .write(&self.local.samples()[..n], None, flush)?;
            }
            ChannelLayout::Stereo { pan } => {
                mix_to_stereo(
                    &mut self.local.samples_mut()[..n],
                    &mut self.remote.samples_mut()[..n],
                    pan,
                );
                self.encoder.write(
                    &self.local.samples()[..n],
                    Some(&self.remote.samples()[..n]),
                    flush,
                )?;
            }
        }

        self.local.consume(n);
        self.remote.consume(n);
        if flush {
            self.local.clear();
            self.remote.clear();
        }
        self.samples_written += n as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryEncoder;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn pipeline(config: PipelineConfig) -> (CallAudioPipeline, crate::testing::SharedEncoderLog) {
        let (encoder, log) = MemoryEncoder::new();
        (CallAudioPipeline::new(CallId(1), config, Box::new(encoder)), log)
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0), 0);
        assert_eq!(quantize(79), 0);
        assert_eq!(quantize(80), 160);
        assert_eq!(quantize(1000), 960);
        assert_eq!(quantize(-1000), -960);
        assert_eq!(quantize(-1040), -1120);
    }

    #[test]
    fn test_pad_buffers() {
        let (mut p, _) = pipeline(PipelineConfig::new(ChannelLayout::Mono));
        p.append(StreamSide::Local, &[0u8; 1000]);
        p.append(StreamSide::Remote, &[0u8; 1200]);

        assert_eq!(p.pad_buffers(), 600);
        assert_eq!(p.local().byte_len(), 1200);
        assert_eq!(p.remote().byte_len(), 1200);
    }

    #[test]
    fn test_waits_for_minimum_batch() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Stereo { pan: 0 }));
        assert_eq!(p.on_local_bytes(&le_bytes(&[1; 1599])).unwrap(), 0);
        assert_eq!(p.on_remote_bytes(&le_bytes(&[2; 1599])).unwrap(), 0);
        assert!(log.lock().writes.is_empty());

        p.on_local_bytes(&le_bytes(&[1; 10])).unwrap();
        assert_eq!(p.on_remote_bytes(&le_bytes(&[2; 1])).unwrap(), 1600);

        let log = log.lock();
        assert_eq!(log.writes.len(), 1);
        assert_eq!(log.writes[0].left, vec![1; 1600]);
        assert_eq!(log.writes[0].right, Some(vec![2; 1600]));
        assert!(!log.writes[0].flush);
        assert_eq!(p.local().len(), 9);
        assert_eq!(p.remote().len(), 0);
    }

    #[test]
    fn test_mono_flush_mixes_and_empties() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Mono));
        p.append(StreamSide::Local, &le_bytes(&[2000, -2000]));
        p.append(StreamSide::Remote, &le_bytes(&[1000, 3000, 7]));

        assert_eq!(p.try_write(true).unwrap(), 3);
        let log = log.lock();
        assert_eq!(log.writes[0].left, vec![1500, 500, 3]);
        assert_eq!(log.writes[0].right, None);
        assert!(log.writes[0].flush);
        assert!(p.local().is_empty());
        assert!(p.remote().is_empty());
    }

    #[test]
    fn test_flush_writes_even_when_empty() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Mono));
        assert_eq!(p.try_write(true).unwrap(), 0);
        assert_eq!(log.lock().writes.len(), 1);
    }

    #[test]
    fn test_pan_hundred_swaps_channels() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Stereo { pan: 100 }));
        p.on_local_bytes(&le_bytes(&[1; 1600])).unwrap();
        p.on_remote_bytes(&le_bytes(&[2; 1600])).unwrap();

        let log = log.lock();
        assert_eq!(log.writes[0].left, vec![2; 1600]);
        assert_eq!(log.writes[0].right, Some(vec![1; 1600]));
    }

    #[test]
    fn test_positive_drift_pads_local() {
        let mut config = PipelineConfig::new(ChannelLayout::Mono);
        config.sync_window = 1;
        let (mut p, _) = pipeline(config);

        p.on_remote_bytes(&le_bytes(&[5; 1000])).unwrap();
        assert_eq!(p.local().len(), 960);
        assert_eq!(p.remote().len(), 1000);
        assert!(p.estimator().is_settling());
    }

    #[test]
    fn test_negative_drift_pads_remote() {
        let mut config = PipelineConfig::new(ChannelLayout::Mono);
        config.sync_window = 1;
        let (mut p, _) = pipeline(config);

        p.on_local_bytes(&le_bytes(&[5; 1000])).unwrap();
        assert_eq!(p.remote().len(), 960);
        assert_eq!(p.local().len(), 1000);
    }

    #[test]
    fn test_drift_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("call.wav.sync");
        let mut config = PipelineConfig::new(ChannelLayout::Mono);
        config.sync_window = 1;
        let (p, _) = pipeline(config);
        let mut p = p.with_drift_log(DriftLog::create(&path).unwrap());

        p.on_remote_bytes(&le_bytes(&[5; 1000])).unwrap();
        p.on_remote_bytes(&le_bytes(&[5; 100])).unwrap();
        p.close(false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" 1000 960"));
        // 140 samples is within the jitter tolerance
        assert!(lines[1].ends_with(" 140 0"));
    }

    #[test]
    fn test_severe_desync_forces_drain() {
        let rate = CAPTURE_SAMPLE_RATE as usize;
        let mut config = PipelineConfig::new(ChannelLayout::Stereo { pan: 0 });
        config.sync_window = 1;
        config.sync_precision = i64::MAX / 4;
        let (mut p, log) = pipeline(config);

        let written = p.on_remote_bytes(&vec![0u8; (20 * rate + 1) * 2]).unwrap();
        assert_eq!(written, 20 * rate + 1);
        assert!(p.local().is_empty());
        assert!(p.remote().is_empty());
        assert!(p.estimator().is_settling());
        assert_eq!(log.lock().writes[0].left.len(), 20 * rate + 1);
    }

    #[test]
    fn test_desync_at_limit_is_tolerated() {
        let rate = CAPTURE_SAMPLE_RATE as usize;
        let mut config = PipelineConfig::new(ChannelLayout::Stereo { pan: 0 });
        config.sync_window = 1;
        config.sync_precision = i64::MAX / 4;
        let (mut p, log) = pipeline(config);

        let written = p.on_remote_bytes(&vec![0u8; 20 * rate * 2]).unwrap();
        assert_eq!(written, 0);
        assert_eq!(p.remote().len(), 20 * rate);
        assert!(!p.estimator().is_settling());
        assert!(log.lock().writes.is_empty());
    }

    #[test]
    fn test_write_failure_keeps_buffers() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Mono));
        log.lock().fail_write = true;

        p.on_local_bytes(&le_bytes(&[1; 1600])).unwrap();
        let err = p.on_remote_bytes(&le_bytes(&[1; 1600])).unwrap_err();
        assert!(matches!(err, EncoderError::WriteFailed(_)));
        assert_eq!(p.remote().len(), 1600);
    }

    #[test]
    fn test_close_flushes_and_closes_encoder() {
        let (mut p, log) = pipeline(PipelineConfig::new(ChannelLayout::Stereo { pan: 0 }));
        p.append(StreamSide::Local, &le_bytes(&[3; 10]));
        p.close(true).unwrap();

        let log = log.lock();
        assert!(log.closed);
        assert_eq!(log.writes[0].left, vec![3; 10]);
        assert_eq!(log.writes[0].right, Some(vec![0; 10]));
    }
}
