//! Call-control text protocol
//!
//! Notifications arrive as `CALL <id> <PROPERTY> <value>` lines. Requests are
//! plain command lines answered by a single reply line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque call identifier assigned by the call-control host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CallId)
    }
}

/// Conference group identifier. Zero means the call is not part of a conference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConferenceId(pub i64);

impl ConferenceId {
    pub const NONE: ConferenceId = ConferenceId(0);

    pub fn is_conference(&self) -> bool {
        self.0 != 0
    }
}

/// Call status as reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    #[default]
    Unknown,
    Unplaced,
    Routing,
    EarlyMedia,
    Ringing,
    InProgress,
    OnHold,
    LocalHold,
    RemoteHold,
    Transferring,
    Transferred,
    Busy,
    Cancelled,
    Failed,
    Finished,
    Missed,
    Refused,
    VmFailed,
}

impl CallStatus {
    /// Audio is flowing (or paused on hold) for this call
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallStatus::InProgress
                | CallStatus::OnHold
                | CallStatus::LocalHold
                | CallStatus::RemoteHold
        )
    }

    /// The call is over and will not become active again
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            CallStatus::Busy
                | CallStatus::Cancelled
                | CallStatus::Failed
                | CallStatus::Finished
                | CallStatus::Missed
                | CallStatus::Refused
                | CallStatus::VmFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Unknown => "UNKNOWN",
            CallStatus::Unplaced => "UNPLACED",
            CallStatus::Routing => "ROUTING",
            CallStatus::EarlyMedia => "EARLYMEDIA",
            CallStatus::Ringing => "RINGING",
            CallStatus::InProgress => "INPROGRESS",
            CallStatus::OnHold => "ONHOLD",
            CallStatus::LocalHold => "LOCALHOLD",
            CallStatus::RemoteHold => "REMOTEHOLD",
            CallStatus::Transferring => "TRANSFERRING",
            CallStatus::Transferred => "TRANSFERRED",
            CallStatus::Busy => "BUSY",
            CallStatus::Cancelled => "CANCELLED",
            CallStatus::Failed => "FAILED",
            CallStatus::Finished => "FINISHED",
            CallStatus::Missed => "MISSED",
            CallStatus::Refused => "REFUSED",
            CallStatus::VmFailed => "VM_FAILED",
        }
    }

    /// Parse a status value. Values this recorder does not know map to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "UNPLACED" => CallStatus::Unplaced,
            "ROUTING" => CallStatus::Routing,
            "EARLYMEDIA" => CallStatus::EarlyMedia,
            "RINGING" => CallStatus::Ringing,
            "INPROGRESS" => CallStatus::InProgress,
            "ONHOLD" => CallStatus::OnHold,
            "LOCALHOLD" => CallStatus::LocalHold,
            "REMOTEHOLD" => CallStatus::RemoteHold,
            "TRANSFERRING" => CallStatus::Transferring,
            "TRANSFERRED" => CallStatus::Transferred,
            "BUSY" => CallStatus::Busy,
            "CANCELLED" => CallStatus::Cancelled,
            "FAILED" => CallStatus::Failed,
            "FINISHED" => CallStatus::Finished,
            "MISSED" => CallStatus::Missed,
            "REFUSED" => CallStatus::Refused,
            "VM_FAILED" => CallStatus::VmFailed,
            _ => CallStatus::Unknown,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a `CALL` notification reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    Status(CallStatus),
    Duration(u64),
    PartnerHandle(String),
    PartnerDisplayName(String),
    ConferenceId(ConferenceId),
    /// Any other property; carried so the registry still sees the call id
    Other { property: String, value: String },
}

/// One `CALL <id> <PROPERTY> <value>` notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub call: CallId,
    pub update: CallUpdate,
}

impl StatusEvent {
    /// Parse a notification line. Returns `None` for lines that are not call notifications.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(4, ' ');
        if parts.next()? != "CALL" {
            return None;
        }
        let call = parts.next()?.parse().ok()?;
        let property = parts.next()?;
        let value = parts.next().unwrap_or("").trim();

        let update = match property {
            "STATUS" => CallUpdate::Status(CallStatus::parse(value)),
            "DURATION" => CallUpdate::Duration(value.parse().unwrap_or(0)),
            "PARTNER_HANDLE" => CallUpdate::PartnerHandle(value.to_string()),
            "PARTNER_DISPNAME" => CallUpdate::PartnerDisplayName(value.to_string()),
            "CONF_ID" => CallUpdate::ConferenceId(ConferenceId(value.parse().unwrap_or(0))),
            other => CallUpdate::Other {
                property: other.to_string(),
                value: value.to_string(),
            },
        };

        Some(Self { call, update })
    }
}

/// Call properties queried from the host
pub mod property {
    pub const PARTNER_HANDLE: &str = "PARTNER_HANDLE";
    pub const PARTNER_DISPNAME: &str = "PARTNER_DISPNAME";
    pub const CONF_ID: &str = "CONF_ID";
}

/// Object path of a call property, e.g. `CALL 12 PARTNER_HANDLE`
pub fn call_property(call: CallId, property: &str) -> String {
    format!("CALL {} {}", call, property)
}

/// Object path of the signed-in user's handle
pub const CURRENT_USER_HANDLE: &str = "CURRENTUSERHANDLE";

/// Object path of the signed-in user's full name
pub const PROFILE_FULLNAME: &str = "PROFILE FULLNAME";

/// Build a property query for `object`
pub fn get_command(object: &str) -> String {
    format!("GET {}", object)
}

/// Extract the value from a `GET` reply, which echoes the object path
pub fn parse_get_reply(object: &str, reply: &str) -> Option<String> {
    reply
        .strip_prefix(object)
        .and_then(|rest| rest.strip_prefix(' ').or(if rest.is_empty() { Some("") } else { None }))
        .map(|value| value.trim().to_string())
}

/// Ask the host to send the local microphone stream to `port`
pub fn capture_mic_command(call: CallId, port: u16) -> String {
    format!("ALTER CALL {} SET_CAPTURE_MIC PORT=\"{}\"", call, port)
}

/// Ask the host to duplicate the remote party's stream to `port`
pub fn output_command(call: CallId, port: u16) -> String {
    format!(
        "ALTER CALL {} SET_OUTPUT SOUNDCARD=\"default\" PORT=\"{}\"",
        call, port
    )
}

/// A redirect request succeeded iff the host echoes `ALTER CALL`
pub fn is_alter_ack(reply: &str) -> bool {
    reply.starts_with("ALTER CALL")
}
