//! In-memory doubles for the encoder and transport seams

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::codec::{Encoder, EncoderFactory};
use crate::config::OutputFormat;
use crate::error::{EncoderError, TransportError};
use crate::network::{AudioPorts, ControlLink, EndpointPair};
use crate::protocol::CallId;
use crate::service::Notification;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub left: Vec<i16>,
    pub right: Option<Vec<i16>>,
    pub flush: bool,
}

#[derive(Debug, Default)]
pub struct EncoderLog {
    pub opened: Option<(PathBuf, u32, bool)>,
    pub tags: Option<String>,
    pub writes: Vec<WriteRecord>,
    pub closed: bool,
    pub fail_open: bool,
    pub fail_write: bool,
}

pub type SharedEncoderLog = Arc<Mutex<EncoderLog>>;

/// Records everything written; `open` also creates an empty file so removal
/// can be observed
pub struct MemoryEncoder {
    log: SharedEncoderLog,
    path: PathBuf,
}

impl MemoryEncoder {
    pub fn new() -> (Self, SharedEncoderLog) {
        let log = SharedEncoderLog::default();
        (
            Self {
                log: log.clone(),
                path: PathBuf::new(),
            },
            log,
        )
    }
}

impl Encoder for MemoryEncoder {
    fn set_tags(&mut self, comment: &str, _timestamp: DateTime<Local>) {
        self.log.lock().tags = Some(comment.to_string());
    }

    fn open(&mut self, path: &Path, sample_rate: u32, stereo: bool) -> Result<(), EncoderError> {
        self.path = path.to_path_buf();
        let mut log = self.log.lock();
        if log.fail_open {
            return Err(EncoderError::Open {
                path: self.path.clone(),
                reason: "refused by test".into(),
            });
        }
        std::fs::File::create(path).map_err(|e| EncoderError::Open {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        log.opened = Some((self.path.clone(), sample_rate, stereo));
        Ok(())
    }

    fn write(
        &mut self,
        left: &[i16],
        right: Option<&[i16]>,
        flush: bool,
    ) -> Result<(), EncoderError> {
        let mut log = self.log.lock();
        if log.closed {
            return Err(EncoderError::NotOpen);
        }
        if log.fail_write {
            return Err(EncoderError::WriteFailed("disk full".into()));
        }
        log.writes.push(WriteRecord {
            left: left.to_vec(),
            right: right.map(<[i16]>::to_vec),
            flush,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        self.log.lock().closed = true;
        Ok(())
    }

    fn file_name(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
pub struct FactoryState {
    pub encoders: Vec<SharedEncoderLog>,
    pub fail_open: bool,
    pub fail_write: bool,
}

/// Hands out [`MemoryEncoder`]s and keeps their logs
#[derive(Clone, Default)]
pub struct MemoryEncoders {
    pub state: Arc<Mutex<FactoryState>>,
}

impl MemoryEncoders {
    pub fn last(&self) -> SharedEncoderLog {
        self.state
            .lock()
            .encoders
            .last()
            .cloned()
            .expect("no encoder created")
    }

    pub fn created(&self) -> usize {
        self.state.lock().encoders.len()
    }
}

impl EncoderFactory for MemoryEncoders {
    fn create(&self, _format: OutputFormat) -> Result<Box<dyn Encoder>, EncoderError> {
        let (encoder, log) = MemoryEncoder::new();
        let mut state = self.state.lock();
        {
            let mut l = log.lock();
            l.fail_open = state.fail_open;
            l.fail_write = state.fail_write;
        }
        state.encoders.push(log);
        Ok(Box::new(encoder))
    }
}

#[derive(Debug, Default)]
pub struct ControlState {
    /// Answers for `GET <object>`
    pub properties: HashMap<String, String>,
    pub sent: Vec<String>,
    pub reject_redirect: bool,
}

/// Answers `GET` from a property table and echoes `ALTER CALL` requests
#[derive(Clone, Default)]
pub struct ScriptedControl {
    pub state: Arc<Mutex<ControlState>>,
}

impl ScriptedControl {
    pub fn set(&self, object: &str, value: &str) {
        self.state
            .lock()
            .properties
            .insert(object.to_string(), value.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }
}

impl ControlLink for ScriptedControl {
    fn send_with_reply(&mut self, command: &str) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        state.sent.push(command.to_string());

        if command.starts_with("ALTER CALL") {
            return Ok(if state.reject_redirect {
                "ERROR 559 CALL: Action failed".to_string()
            } else {
                command.to_string()
            });
        }
        if let Some(object) = command.strip_prefix("GET ") {
            return Ok(match state.properties.get(object) {
                Some(value) => format!("{} {}", object, value),
                None => "ERROR 7 GET: invalid WHAT".to_string(),
            });
        }
        Ok("ERROR 2 Unknown command".to_string())
    }
}

#[derive(Debug, Default)]
pub struct PortsState {
    pub open: HashMap<CallId, EndpointPair>,
    pub opened: usize,
    pub closed: Vec<(CallId, u64)>,
    pub fail: bool,
    next_session: u64,
}

/// Hands out fake port numbers
#[derive(Clone, Default)]
pub struct FakePorts {
    pub state: Arc<Mutex<PortsState>>,
}

impl FakePorts {
    pub fn session(&self, call: CallId) -> Option<u64> {
        self.state.lock().open.get(&call).map(|p| p.session)
    }
}

impl AudioPorts for FakePorts {
    fn open(&mut self, call: CallId) -> Result<EndpointPair, TransportError> {
        let mut state = self.state.lock();
        if state.fail {
            return Err(TransportError::BindFailed("refused by test".into()));
        }
        state.next_session += 1;
        state.opened += 1;
        let session = state.next_session;
        let base = 40000 + (session as u16) * 2;
        let pair = EndpointPair {
            session,
            local_port: base,
            remote_port: base + 1,
        };
        state.open.insert(call, pair);
        Ok(pair)
    }

    fn close(&mut self, call: CallId, session: u64) {
        let mut state = self.state.lock();
        state.open.remove(&call);
        state.closed.push((call, session));
    }
}

pub fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
    rx.try_iter().collect()
}
