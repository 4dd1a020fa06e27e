//! A single tracked call and its recording state machine
//!
//! Status updates move a call between inactive, active and done. Entering
//! the active set starts recording (subject to policy and conference
//! dedup); leaving it does not stop recording, which ends when both audio
//! streams have closed so that trailing audio still gets written.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::audio::{CallAudioPipeline, DriftLog, PipelineConfig, StreamSide};
use crate::codec::{Encoder, EncoderFactory};
use crate::config::{RecordPolicy, RecorderConfig};
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::error::RecordingError;
use crate::network::{AudioPorts, ControlLink, EndpointPair};
use crate::protocol::{self, property, CallId, CallStatus, ConferenceId};
use crate::service::{Notification, Notifier};

const UNKNOWN_HANDLE: &str = "UnknownCaller";
const UNKNOWN_DISPLAY_NAME: &str = "Unnamed Caller";

/// The other party of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    pub handle: String,
    pub display_name: String,
}

/// An outstanding "record this call?" question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub asked_at: DateTime<Local>,
}

/// Collaborators a call needs while handling one event
pub struct CallContext<'a> {
    pub control: &'a mut dyn ControlLink,
    pub ports: &'a mut dyn AudioPorts,
    pub encoders: &'a dyn EncoderFactory,
    pub notifier: &'a Notifier,
    /// Another call of the same conference is already being recorded
    pub conference_recording: bool,
}

/// Live recording state; exists exactly while the call is recording
struct Recording {
    pipeline: CallAudioPipeline,
    endpoints: EndpointPair,
    local_closed: bool,
    remote_closed: bool,
}

pub struct Call {
    id: CallId,
    partner: Partner,
    conference: ConferenceId,
    status: CallStatus,
    policy: RecordPolicy,
    config: Arc<RecorderConfig>,
    recording: Option<Recording>,
    confirmation: Option<ConfirmationRequest>,
    /// Output file, known once a recording has been attempted
    file_name: Option<PathBuf>,
}

impl Call {
    /// Create a call and resolve its partner and conference from the host
    pub fn new(id: CallId, config: Arc<RecorderConfig>, control: &mut dyn ControlLink) -> Self {
        tracing::debug!("Call {}: call object constructed", id);

        let handle = control
            .get_property(&protocol::call_property(id, property::PARTNER_HANDLE))
            .unwrap_or_else(|| {
                tracing::debug!("Call {}: cannot get partner handle", id);
                UNKNOWN_HANDLE.to_string()
            });
        let display_name = control
            .get_property(&protocol::call_property(id, property::PARTNER_DISPNAME))
            .unwrap_or_else(|| {
                tracing::debug!("Call {}: cannot get partner display name", id);
                UNKNOWN_DISPLAY_NAME.to_string()
            });

        let mut call = Self {
            id,
            partner: Partner {
                handle,
                display_name,
            },
            conference: ConferenceId::NONE,
            status: CallStatus::Unknown,
            policy: RecordPolicy::Ask,
            config,
            recording: None,
            confirmation: None,
            file_name: None,
        };
        call.update_conference_id(control);
        call
    }

    /// Re-read the conference id; the host does not announce every change
    pub fn update_conference_id(&mut self, control: &mut dyn ControlLink) {
        self.conference = control
            .get_property(&protocol::call_property(self.id, property::CONF_ID))
            .and_then(|v| v.parse().ok())
            .map(ConferenceId)
            .unwrap_or(ConferenceId::NONE);
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn partner(&self) -> &Partner {
        &self.partner
    }

    pub fn conference_id(&self) -> ConferenceId {
        self.conference
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn policy(&self) -> RecordPolicy {
        self.policy
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn confirmation(&self) -> Option<&ConfirmationRequest> {
        self.confirmation.as_ref()
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    pub fn set_config(&mut self, config: Arc<RecorderConfig>) {
        self.config = config;
    }

    pub fn set_partner_handle(&mut self, handle: String) {
        if !handle.is_empty() {
            self.partner.handle = handle;
        }
    }

    pub fn set_partner_display_name(&mut self, name: String) {
        if !name.is_empty() {
            self.partner.display_name = name;
        }
    }

    pub fn set_conference_id(&mut self, conference: ConferenceId) {
        self.conference = conference;
    }

    /// Whether the registry may forget this call. A call whose recording
    /// decision is still pending must stay even after it has ended.
    pub fn ok_to_delete(&self) -> bool {
        !self.is_recording() && self.confirmation.is_none()
    }

    pub fn set_status(&mut self, status: CallStatus, ctx: &mut CallContext<'_>) {
        let was_active = self.status.is_active();
        self.status = status;
        let now_active = status.is_active();

        if !was_active && now_active {
            ctx.notifier.send(Notification::CallStarted {
                call: self.id,
                partner: self.partner.handle.clone(),
            });
            self.start_recording(false, ctx);
        } else if was_active && !now_active {
            // keep recording until both streams close so trailing audio is written
            ctx.notifier.send(Notification::CallStopped { call: self.id });
        }
    }

    /// Start recording. `force` bypasses the record policy and settles any
    /// pending confirmation as allowed.
    pub fn start_recording(&mut self, force: bool, ctx: &mut CallContext<'_>) {
        if force {
            self.confirmation = None;
            self.policy = RecordPolicy::Allow;
        }

        if self.is_recording() {
            return;
        }

        if ctx.conference_recording {
            tracing::debug!(
                "Call {}: call is part of a conference that is already being recorded",
                self.id
            );
            return;
        }

        if !force {
            self.policy = self.config.policy_for(&self.partner.handle);
            match self.policy {
                RecordPolicy::Deny => return,
                RecordPolicy::Ask => {
                    self.ask(ctx);
                    return;
                }
                RecordPolicy::Allow => {}
            }
        }

        if !self.config.policy.suppress_legal_notice {
            ctx.notifier.send(Notification::LegalNotice);
        }

        tracing::debug!("Call {}: start recording", self.id);
        if let Err(e) = self.begin_recording(ctx) {
            tracing::error!("Call {}: {}", self.id, e);
            self.report(ctx, &e);
        }
    }

    /// Stop recording, optionally writing out everything still buffered
    pub fn stop_recording(&mut self, flush: bool, ctx: &mut CallContext<'_>) {
        let Some(recording) = self.recording.take() else {
            return;
        };

        tracing::debug!("Call {}: stop recording", self.id);

        let closed = recording.pipeline.close(flush);
        ctx.ports.close(self.id, recording.endpoints.session);

        if let Err(e) = closed {
            let e = RecordingError::Write(e);
            tracing::error!("Call {}: {}", self.id, e);
            self.report(ctx, &e);
        }

        tracing::info!("Call {}: recording stopped", self.id);
        ctx.notifier.send(Notification::RecordingStopped { call: self.id });
    }

    /// Raw PCM from one of the endpoints
    pub fn on_audio(
        &mut self,
        side: StreamSide,
        session: u64,
        bytes: &[u8],
        ctx: &mut CallContext<'_>,
    ) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        if recording.endpoints.session != session {
            return;
        }

        if let Err(e) = recording.pipeline.push(side, bytes) {
            let e = RecordingError::Write(e);
            tracing::error!("Call {}: {}", self.id, e);
            self.report(ctx, &e);
            self.stop_recording(false, ctx);
        }
    }

    /// One endpoint disconnected; recording ends once both have
    pub fn on_stream_closed(&mut self, side: StreamSide, session: u64, ctx: &mut CallContext<'_>) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        if recording.endpoints.session != session {
            return;
        }

        match side {
            StreamSide::Local => recording.local_closed = true,
            StreamSide::Remote => recording.remote_closed = true,
        }

        if recording.local_closed && recording.remote_closed {
            tracing::debug!("Call {}: both connections closed, stop recording", self.id);
            self.stop_recording(true, ctx);
        }
    }

    /// The user agreed to record
    pub fn confirm(&mut self, ctx: &mut CallContext<'_>) {
        if self.confirmation.is_none() {
            return;
        }
        if self.is_done() {
            tracing::debug!("Call {}: confirmed after the call ended, nothing to record", self.id);
            self.confirmation = None;
            self.policy = RecordPolicy::Allow;
            return;
        }
        self.start_recording(true, ctx);
    }

    /// The user refused recording: stop without flushing and delete the file
    pub fn deny(&mut self, ctx: &mut CallContext<'_>) {
        if self.confirmation.take().is_none() {
            return;
        }
        self.policy = RecordPolicy::Deny;
        self.stop_recording(false, ctx);
        self.remove_file();
    }

    /// User stop: keep what was recorded
    pub fn stop(&mut self, ctx: &mut CallContext<'_>) {
        self.stop_recording(true, ctx);
        self.settle_confirmation(RecordPolicy::Allow);
    }

    /// User stop: throw the recording away
    pub fn discard(&mut self, ctx: &mut CallContext<'_>) {
        self.stop_recording(true, ctx);
        self.remove_file();
        self.settle_confirmation(RecordPolicy::Deny);
    }

    fn settle_confirmation(&mut self, policy: RecordPolicy) {
        if self.confirmation.take().is_some() {
            self.policy = policy;
        }
    }

    fn ask(&mut self, ctx: &mut CallContext<'_>) {
        if self.confirmation.is_some() {
            return;
        }
        let request = ConfirmationRequest {
            id: Uuid::new_v4(),
            asked_at: Local::now(),
        };
        tracing::debug!("Call {}: asking whether to record ({})", self.id, request.id);
        ctx.notifier.send(Notification::ConfirmationRequested {
            call: self.id,
            request: request.id,
            partner: self.partner.handle.clone(),
            display_name: self.partner.display_name.clone(),
        });
        self.confirmation = Some(request);
    }

    fn begin_recording(&mut self, ctx: &mut CallContext<'_>) -> Result<(), RecordingError> {
        let started = Local::now();
        let path = self.target_path(started);
        let layout = self.config.channel_layout();

        let mut encoder = ctx
            .encoders
            .create(self.config.output.format)
            .map_err(|source| RecordingError::OutputTarget {
                path: path.clone(),
                source,
            })?;

        if self.config.output.write_tags {
            let comment = self.comment_tag(ctx.control);
            encoder.set_tags(&comment, started);
        }

        let opened = encoder.open(&path, CAPTURE_SAMPLE_RATE, layout.is_stereo());
        self.file_name = Some(encoder.file_name().to_path_buf());
        if let Err(source) = opened {
            self.remove_file();
            return Err(RecordingError::OutputTarget {
                path: encoder.file_name().to_path_buf(),
                source,
            });
        }

        let endpoints = match ctx.ports.open(self.id) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                self.abandon(encoder);
                return Err(RecordingError::Endpoints(e));
            }
        };

        let local_reply = Self::request(
            ctx.control,
            &protocol::capture_mic_command(self.id, endpoints.local_port),
        );
        let remote_reply = Self::request(
            ctx.control,
            &protocol::output_command(self.id, endpoints.remote_port),
        );

        if !protocol::is_alter_ack(&local_reply) || !protocol::is_alter_ack(&remote_reply) {
            ctx.ports.close(self.id, endpoints.session);
            self.abandon(encoder);
            return Err(RecordingError::Negotiation {
                local_reply,
                remote_reply,
            });
        }

        let mut pipeline =
            CallAudioPipeline::new(self.id, PipelineConfig::new(layout), encoder);
        if self.config.debug.write_sync_file {
            let mut sync_path = path.into_os_string();
            sync_path.push(".sync");
            match DriftLog::create(Path::new(&sync_path)) {
                Ok(log) => pipeline = pipeline.with_drift_log(log),
                Err(e) => tracing::warn!("Call {}: cannot create drift log: {}", self.id, e),
            }
        }

        let file = pipeline.file_name().to_path_buf();
        self.recording = Some(Recording {
            pipeline,
            endpoints,
            local_closed: false,
            remote_closed: false,
        });

        tracing::info!("Call {}: recording to {}", self.id, file.display());
        ctx.notifier.send(Notification::RecordingStarted {
            call: self.id,
            file,
        });
        Ok(())
    }

    /// Send a redirect request; transport failures become the reply text
    fn request(control: &mut dyn ControlLink, command: &str) -> String {
        control
            .send_with_reply(command)
            .unwrap_or_else(|e| e.to_string())
    }

    /// Drop a freshly opened encoder and its partial file
    fn abandon(&mut self, mut encoder: Box<dyn Encoder>) {
        if let Err(e) = encoder.close() {
            tracing::debug!("Call {}: closing abandoned encoder: {}", self.id, e);
        }
        self.remove_file();
    }

    fn remove_file(&self) {
        let Some(path) = &self.file_name else {
            return;
        };
        tracing::debug!("Call {}: removing '{}'", self.id, path.display());
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Call {}: cannot remove '{}': {}", self.id, path.display(), e);
            }
        }
    }

    fn report(&self, ctx: &CallContext<'_>, error: &RecordingError) {
        ctx.notifier.send(Notification::Error {
            call: self.id,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
    }

    fn target_path(&self, started: DateTime<Local>) -> PathBuf {
        let handle: String = self
            .partner
            .handle
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // the call id keeps simultaneous calls with the same partner apart
        self.config.output.directory.join(format!(
            "{}-{}-{}.{}",
            started.format("%Y-%m-%d_%H-%M-%S"),
            handle,
            self.id,
            self.config.output.format.extension()
        ))
    }

    fn comment_tag(&self, control: &mut dyn ControlLink) -> String {
        let own_handle = control
            .get_property(protocol::CURRENT_USER_HANDLE)
            .unwrap_or_default();
        let own_name = control
            .get_property(protocol::PROFILE_FULLNAME)
            .map(|n| format!(" ({})", n))
            .unwrap_or_default();
        let partner_name = if self.partner.display_name.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.partner.display_name)
        };

        format!(
            "Call between {}{} and {}{}.",
            self.partner.handle, partner_name, own_handle, own_name
        )
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if self.is_recording() {
            tracing::warn!("Call {}: destroyed while recording", self.id);
        }
        tracing::debug!("Call {}: call object destroyed", self.id);
    }
}
