//! # Call Recorder
//!
//! Records two-party voice calls delivered as two independent PCM streams.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           CALL-CONTROL HOST                                  │
//! │     status feed: CALL <id> STATUS ...        raw PCM: local / remote        │
//! └──────────────┬───────────────────────────────────────┬──────────────────────┘
//!                │ TCP (text lines)                      │ TCP (2 per call)
//!                ▼                                       ▼
//! ┌─────────────────────────────┐         ┌─────────────────────────────────────┐
//! │ TcpControlLink (network)    │         │ TcpAudioPorts (network)             │
//! │  replies / notifications    │         │  accept + read tasks (tokio)        │
//! └──────────────┬──────────────┘         └──────────────────┬──────────────────┘
//!                │          Event channel (crossbeam)         │
//!                └──────────────────────┬─────────────────────┘
//!                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     Event thread (service::run)                              │
//! │  ┌───────────────────────────────────────────────────────────────────────┐  │
//! │  │                 CallRegistry (calls::registry)                        │  │
//! │  │   live calls  |  forgotten ids  |  conference dedup  |  pruning       │  │
//! │  │   ┌──────────────────────────────────────────────────────────────┐   │  │
//! │  │   │ Call (calls::call) - status / policy / confirmation          │   │  │
//! │  │   │   ┌──────────────────────────────────────────────────────┐  │   │  │
//! │  │   │   │ CallAudioPipeline (audio::pipeline)                  │  │   │  │
//! │  │   │   │  local buf ─┐                                        │  │   │  │
//! │  │   │   │             ├─ DriftEstimator ─ pad ─ mix ─ Encoder  │  │   │  │
//! │  │   │   │  remote buf ┘                                        │  │   │  │
//! │  │   │   └──────────────────────────────────────────────────────┘  │   │  │
//! │  │   └──────────────────────────────────────────────────────────────┘   │  │
//! │  └───────────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────┬──────────────────────────────────────┘
//!                                        ▼
//!                       Notifications (recording started, errors, ...)
//! ```

pub mod audio;
pub mod calls;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod testing;

/// Application-wide constants
pub mod constants {
    /// Sample rate of the raw PCM delivered by the call-control host
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Width of one PCM sample in bytes (16-bit little-endian)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Drift corrections are applied in multiples of this many samples (10 ms)
    pub const SYNC_GRANULARITY: i64 = 160;

    /// Minimum amount of audio worth handing to the encoder; the host
    /// delivers data roughly every 10 ms
    pub const MIN_WRITE_MS: u32 = 100;

    /// Number of observations kept by the drift estimator (about 3 seconds)
    pub const SYNC_WINDOW: usize = 100 * 2 * 3;

    /// Imbalance in samples below which drift is considered jitter
    pub const SYNC_PRECISION: i64 = 320;

    /// Imbalance in seconds after which the streams are forcibly re-aligned
    pub const MAX_DESYNC_SECONDS: i64 = 20;

    /// Read size for the raw audio sockets
    pub const SOCKET_READ_CHUNK: usize = 4096;

    /// Default address of the call-control host
    pub const DEFAULT_CONTROL_ADDRESS: &str = "127.0.0.1:2727";

    /// Default time to wait for a control reply in milliseconds
    pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;
}
