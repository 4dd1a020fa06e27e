//! Event loop
//!
//! Socket tasks, the control link and the command reader all feed one
//! channel. A single thread drains it and is the only owner of the
//! [`CallRegistry`], so call state needs no locking.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use uuid::Uuid;

use crate::audio::StreamSide;
use crate::calls::CallRegistry;
use crate::protocol::CallId;

/// Input to the event loop
#[derive(Debug, Clone)]
pub enum Event {
    /// A line from the control link that is not a reply
    Control(String),
    Audio {
        call: CallId,
        side: StreamSide,
        session: u64,
        data: Bytes,
    },
    StreamClosed {
        call: CallId,
        side: StreamSide,
        session: u64,
    },
    User(UserCommand),
    Shutdown,
}

/// Commands issued by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Record(CallId),
    Stop(CallId),
    Discard(CallId),
    Confirm(CallId),
    Deny(CallId),
}

impl UserCommand {
    /// Parse `<verb> <call id>`, e.g. `record 12`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let call: CallId = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        match verb.to_ascii_lowercase().as_str() {
            "record" => Some(UserCommand::Record(call)),
            "stop" => Some(UserCommand::Stop(call)),
            "discard" => Some(UserCommand::Discard(call)),
            "confirm" | "yes" => Some(UserCommand::Confirm(call)),
            "deny" | "no" => Some(UserCommand::Deny(call)),
            _ => None,
        }
    }
}

/// Everything the recorder reports to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    CallStarted {
        call: CallId,
        partner: String,
    },
    CallStopped {
        call: CallId,
    },
    RecordingStarted {
        call: CallId,
        file: PathBuf,
    },
    RecordingStopped {
        call: CallId,
    },
    ConfirmationRequested {
        call: CallId,
        request: Uuid,
        partner: String,
        display_name: String,
    },
    /// Recording may be subject to consent laws
    LegalNotice,
    Error {
        call: CallId,
        kind: String,
        message: String,
    },
}

/// Outgoing side of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<Notification>,
}

impl Notifier {
    pub fn new(tx: Sender<Notification>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, Receiver<Notification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    /// Nobody listening is not an error
    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification dropped, no receiver");
        }
    }
}

/// Drain `events` into `registry` until shutdown or until every sender is gone
pub fn run(mut registry: CallRegistry, events: Receiver<Event>) {
    tracing::info!("Event loop started");

    for event in events.iter() {
        match event {
            Event::Control(line) => registry.on_control_line(&line),
            Event::Audio {
                call,
                side,
                session,
                data,
            } => registry.on_audio(call, side, session, &data),
            Event::StreamClosed {
                call,
                side,
                session,
            } => {
                tracing::debug!("Call {}: {} stream closed", call, side);
                registry.on_stream_closed(call, side, session);
            }
            Event::User(command) => dispatch(&mut registry, command),
            Event::Shutdown => break,
        }
    }

    registry.shutdown();
    tracing::info!("Event loop stopped");
}

/// Forward user commands read line by line from `input` until it ends or
/// the event loop is gone. Blocks the calling thread.
pub fn read_commands(input: impl BufRead, events: &Sender<Event>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match UserCommand::parse(line) {
            Some(command) => {
                if events.send(Event::User(command)).is_err() {
                    break;
                }
            }
            None => tracing::warn!(
                "Unknown command '{}' (expected record|stop|discard|confirm|deny <call>)",
                line
            ),
        }
    }
}

fn dispatch(registry: &mut CallRegistry, command: UserCommand) {
    tracing::debug!("User command: {:?}", command);
    match command {
        UserCommand::Record(call) => registry.record(call),
        UserCommand::Stop(call) => registry.stop(call),
        UserCommand::Discard(call) => registry.discard(call),
        UserCommand::Confirm(call) => registry.confirm(call),
        UserCommand::Deny(call) => registry.deny(call),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RecordPolicy, RecorderConfig};
    use crate::testing::{drain, FakePorts, MemoryEncoders, ScriptedControl};
    use std::sync::Arc;

    #[test]
    fn test_parse_user_commands() {
        assert_eq!(UserCommand::parse("record 12"), Some(UserCommand::Record(CallId(12))));
        assert_eq!(UserCommand::parse("  STOP 3 "), Some(UserCommand::Stop(CallId(3))));
        assert_eq!(UserCommand::parse("yes 4"), Some(UserCommand::Confirm(CallId(4))));
        assert_eq!(UserCommand::parse("deny 5"), Some(UserCommand::Deny(CallId(5))));
        assert_eq!(UserCommand::parse("discard"), None);
        assert_eq!(UserCommand::parse("record x"), None);
        assert_eq!(UserCommand::parse("record 1 2"), None);
        assert_eq!(UserCommand::parse("pause 1"), None);
    }

    #[test]
    fn test_read_commands_until_end_of_input() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let input = std::io::Cursor::new("record 4\n\nbogus\n deny 4 \n");

        read_commands(input, &tx);

        let commands: Vec<UserCommand> = rx
            .try_iter()
            .map(|e| match e {
                Event::User(command) => command,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            commands,
            vec![UserCommand::Record(CallId(4)), UserCommand::Deny(CallId(4))]
        );
    }

    #[test]
    fn test_read_commands_stops_when_loop_is_gone() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        read_commands(std::io::Cursor::new("record 1\nrecord 2\n"), &tx);
    }

    #[test]
    fn test_notification_json() {
        let json = serde_json::to_value(Notification::Error {
            call: CallId(7),
            kind: "write".into(),
            message: "disk full".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["call"], 7);
        assert_eq!(json["kind"], "write");

        let json = serde_json::to_value(Notification::LegalNotice).unwrap();
        assert_eq!(json["event"], "legal_notice");
    }

    #[test]
    fn test_notifier_without_receiver() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.send(Notification::LegalNotice);
    }

    #[test]
    fn test_run_processes_events_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::default();
        config.policy.default = RecordPolicy::Ask;
        config.output.directory = dir.path().to_path_buf();

        let encoders = MemoryEncoders::default();
        let (notifier, notifications) = Notifier::channel();
        let registry = CallRegistry::new(
            Arc::new(config),
            Box::new(ScriptedControl::default()),
            Box::new(FakePorts::default()),
            Box::new(encoders.clone()),
            notifier,
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Event::Control("CALL 1 STATUS INPROGRESS".into())).unwrap();
        tx.send(Event::User(UserCommand::Confirm(CallId(1)))).unwrap();
        tx.send(Event::Shutdown).unwrap();
        tx.send(Event::Control("CALL 2 STATUS INPROGRESS".into())).unwrap();

        run(registry, rx);

        let events = drain(&notifications);
        assert!(matches!(events[0], Notification::CallStarted { call: CallId(1), .. }));
        assert!(matches!(events[1], Notification::ConfirmationRequested { call: CallId(1), .. }));
        assert_eq!(events[2], Notification::LegalNotice);
        assert!(matches!(events[3], Notification::RecordingStarted { call: CallId(1), .. }));
        assert_eq!(events[4], Notification::RecordingStopped { call: CallId(1) });
        assert_eq!(events.len(), 5);
        assert!(encoders.last().lock().closed);
    }
}
