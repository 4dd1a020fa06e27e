//! Line-based TCP control link
//!
//! Requests go out as `#<n> <command>` and the host answers with
//! `#<n> <reply>`. Everything else it sends is a notification and is
//! forwarded to the event loop as [`Event::Control`].

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::ControlLink;
use crate::config::ControlConfig;
use crate::error::TransportError;
use crate::service::Event;

type PendingReplies = Arc<Mutex<HashMap<u64, Sender<String>>>>;

pub struct TcpControlLink {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    next_id: u64,
    reply_timeout: Duration,
}

impl TcpControlLink {
    /// Connect and spawn the reader and writer tasks on the current runtime
    pub async fn connect(
        config: &ControlConfig,
        events: Sender<Event>,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(&config.address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", config.address, e)))?;
        stream.set_nodelay(true)?;
        tracing::info!("Connected to call-control host at {}", config.address);

        let (reader, mut writer) = stream.into_split();
        let pending = PendingReplies::default();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                tracing::trace!("-> {}", line);
                let mut buf = line.into_bytes();
                buf.push(b'\n');
                if let Err(e) = writer.write_all(&buf).await {
                    tracing::error!("Control link write failed: {}", e);
                    break;
                }
            }
        });

        let replies = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_line(line, &replies, &events),
                    Ok(None) => {
                        tracing::warn!("Call-control host closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Control link read failed: {}", e);
                        break;
                    }
                }
            }
            // waiting requests see a disconnect
            replies.lock().clear();
            let _ = events.send(Event::Shutdown);
        });

        Ok(Self {
            outgoing,
            pending,
            next_id: 1,
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        })
    }
}

fn route_line(line: String, replies: &PendingReplies, events: &Sender<Event>) {
    tracing::trace!("<- {}", line);
    if let Some((id, reply)) = split_reply(&line) {
        match replies.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply.to_string());
            }
            None => tracing::debug!("Reply #{} arrived after its request gave up", id),
        }
        return;
    }
    let _ = events.send(Event::Control(line));
}

/// Split `#<n> <reply>` into its parts
fn split_reply(line: &str) -> Option<(u64, &str)> {
    let rest = line.strip_prefix('#')?;
    let (id, reply) = rest.split_once(' ').unwrap_or((rest, ""));
    Some((id.parse().ok()?, reply))
}

impl ControlLink for TcpControlLink {
    fn send_with_reply(&mut self, command: &str) -> Result<String, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending.lock().insert(id, tx);

        if self.outgoing.send(format!("#{} {}", id, command)).is_err() {
            self.pending.lock().remove(&id);
            return Err(TransportError::Disconnected);
        }

        match rx.recv_timeout(self.reply_timeout) {
            Ok(reply) => Ok(reply),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout(command.to_string()))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected)
            }
        }
    }
}
