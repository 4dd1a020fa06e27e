//! Transport to the call-control host
//!
//! Two seams: [`ControlLink`] carries text requests and replies, and
//! [`AudioPorts`] provides the pair of listening endpoints the host streams a
//! call's raw PCM into.

pub mod control;
pub mod listener;

pub use control::TcpControlLink;
pub use listener::TcpAudioPorts;

use crate::error::TransportError;
use crate::protocol::{self, CallId};

/// Request/reply channel to the call-control host
pub trait ControlLink: Send {
    /// Send one command line and wait for its reply line
    fn send_with_reply(&mut self, command: &str) -> Result<String, TransportError>;

    /// Query a property such as `CALL 12 PARTNER_HANDLE`. Empty values and
    /// failed queries yield `None`.
    fn get_property(&mut self, object: &str) -> Option<String> {
        match self.send_with_reply(&protocol::get_command(object)) {
            Ok(reply) => protocol::parse_get_reply(object, &reply).filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::debug!("GET {} failed: {}", object, e);
                None
            }
        }
    }
}

/// Ports of the two endpoints opened for one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    /// Distinguishes successive recordings of the same call
    pub session: u64,
    pub local_port: u16,
    pub remote_port: u16,
}

/// Opens and releases per-call audio endpoints. Received data and
/// disconnects are reported through [`crate::service::Event`].
pub trait AudioPorts: Send {
    fn open(&mut self, call: CallId) -> Result<EndpointPair, TransportError>;

    /// Stop reading and close both endpoints of `session`. Events already
    /// queued for it are ignored by the call.
    fn close(&mut self, call: CallId, session: u64);
}
