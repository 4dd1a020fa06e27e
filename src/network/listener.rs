//! Per-call audio endpoints
//!
//! Each recording gets two loopback listeners. The host connects once to
//! each and streams raw PCM until the call ends. Reads happen on the tokio
//! runtime; data and disconnects are forwarded to the event loop tagged
//! with the call, the side and the recording session.

use bytes::BytesMut;
use crossbeam_channel::Sender;
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{AudioPorts, EndpointPair};
use crate::audio::StreamSide;
use crate::constants::SOCKET_READ_CHUNK;
use crate::error::TransportError;
use crate::protocol::CallId;
use crate::service::Event;

struct Session {
    id: u64,
    tasks: [JoinHandle<()>; 2],
}

impl Session {
    fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct TcpAudioPorts {
    runtime: Handle,
    events: Sender<Event>,
    sessions: HashMap<CallId, Session>,
    next_session: u64,
}

impl TcpAudioPorts {
    pub fn new(runtime: Handle, events: Sender<Event>) -> Self {
        Self {
            runtime,
            events,
            sessions: HashMap::new(),
            next_session: 1,
        }
    }

    fn bind(&self) -> Result<(TcpListener, u16), TransportError> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let _guard = self.runtime.enter();
        let listener = TcpListener::from_std(listener)?;
        Ok((listener, port))
    }

    fn spawn_reader(
        &self,
        listener: TcpListener,
        call: CallId,
        side: StreamSide,
        session: u64,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        self.runtime.spawn(async move {
            match listener.accept().await {
                Ok((mut stream, peer)) => {
                    tracing::debug!("Call {}: {} stream connected from {}", call, side, peer);

                    let mut buf = BytesMut::with_capacity(SOCKET_READ_CHUNK);
                    loop {
                        buf.reserve(SOCKET_READ_CHUNK);
                        match stream.read_buf(&mut buf).await {
                            Ok(0) => break,
                            Ok(_) => {
                                let data = buf.split().freeze();
                                let event = Event::Audio {
                                    call,
                                    side,
                                    session,
                                    data,
                                };
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::debug!("Call {}: {} stream read failed: {}", call, side, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Call {}: accepting {} stream failed: {}", call, side, e);
                }
            }

            let _ = events.send(Event::StreamClosed {
                call,
                side,
                session,
            });
        })
    }
}

impl AudioPorts for TcpAudioPorts {
    fn open(&mut self, call: CallId) -> Result<EndpointPair, TransportError> {
        let (local, local_port) = self.bind()?;
        let (remote, remote_port) = self.bind()?;

        let session = self.next_session;
        self.next_session += 1;

        let tasks = [
            self.spawn_reader(local, call, StreamSide::Local, session),
            self.spawn_reader(remote, call, StreamSide::Remote, session),
        ];
        if let Some(previous) = self.sessions.insert(call, Session { id: session, tasks }) {
            previous.abort();
        }

        tracing::debug!(
            "Call {}: listening on ports {} (local) and {} (remote)",
            call,
            local_port,
            remote_port
        );
        Ok(EndpointPair {
            session,
            local_port,
            remote_port,
        })
    }

    fn close(&mut self, call: CallId, session: u64) {
        if self.sessions.get(&call).map(|s| s.id) != Some(session) {
            return;
        }
        if let Some(s) = self.sessions.remove(&call) {
            s.abort();
        }
    }
}

impl Drop for TcpAudioPorts {
    fn drop(&mut self) {
        for session in self.sessions.values() {
            session.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn next(rx: &crossbeam_channel::Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_stream_delivers_audio_then_close() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ports = TcpAudioPorts::new(rt.handle().clone(), tx);

        let pair = ports.open(CallId(3)).unwrap();
        assert_ne!(pair.local_port, pair.remote_port);

        let mut local = std::net::TcpStream::connect(("127.0.0.1", pair.local_port)).unwrap();
        local.write_all(&[1, 0, 2, 0]).unwrap();
        drop(local);

        let mut received = Vec::new();
        loop {
            match next(&rx) {
                Event::Audio {
                    call,
                    side,
                    session,
                    data,
                } => {
                    assert_eq!(call, CallId(3));
                    assert_eq!(side, StreamSide::Local);
                    assert_eq!(session, pair.session);
                    received.extend_from_slice(&data);
                }
                Event::StreamClosed { side, session, .. } => {
                    assert_eq!(side, StreamSide::Local);
                    assert_eq!(session, pair.session);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(received, vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_sessions_are_distinct() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut ports = TcpAudioPorts::new(rt.handle().clone(), tx);

        let first = ports.open(CallId(1)).unwrap();
        ports.close(CallId(1), first.session);
        let second = ports.open(CallId(1)).unwrap();
        assert_ne!(first.session, second.session);

        // closing a stale session leaves the current one alone
        ports.close(CallId(1), first.session);
        assert!(ports.sessions.contains_key(&CallId(1)));
    }
}
