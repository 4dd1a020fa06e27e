//! Audio subsystem module

pub mod buffer;
pub mod mix;
pub mod pipeline;
pub mod sync;

pub use buffer::SampleBuffer;
pub use mix::ChannelLayout;
pub use pipeline::{CallAudioPipeline, DriftLog, PipelineConfig};
pub use sync::DriftEstimator;

use std::fmt;

/// Which party an audio stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSide {
    /// Our own microphone
    Local,
    /// The other party
    Remote,
}

impl fmt::Display for StreamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamSide::Local => "local",
            StreamSide::Remote => "remote",
        })
    }
}
