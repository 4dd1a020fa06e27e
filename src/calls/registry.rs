//! Live call tracking
//!
//! Owns every [`Call`] plus the collaborators they need. Ids of pruned calls
//! are remembered so late notifications from the host cannot bring a
//! finished call back.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::call::{Call, CallContext};
use crate::audio::StreamSide;
use crate::codec::EncoderFactory;
use crate::config::RecorderConfig;
use crate::network::{AudioPorts, ControlLink};
use crate::protocol::{CallId, CallStatus, CallUpdate, ConferenceId, StatusEvent};
use crate::service::Notifier;

pub struct CallRegistry {
    calls: BTreeMap<CallId, Call>,
    forgotten: HashSet<CallId>,
    config: Arc<RecorderConfig>,
    control: Box<dyn ControlLink>,
    ports: Box<dyn AudioPorts>,
    encoders: Box<dyn EncoderFactory>,
    notifier: Notifier,
}

impl CallRegistry {
    pub fn new(
        config: Arc<RecorderConfig>,
        control: Box<dyn ControlLink>,
        ports: Box<dyn AudioPorts>,
        encoders: Box<dyn EncoderFactory>,
        notifier: Notifier,
    ) -> Self {
        Self {
            calls: BTreeMap::new(),
            forgotten: HashSet::new(),
            config,
            control,
            ports,
            encoders,
            notifier,
        }
    }

    /// Handle one line from the control link. Lines other than call
    /// notifications are ignored.
    pub fn on_control_line(&mut self, line: &str) {
        match StatusEvent::parse(line) {
            Some(event) => self.on_status_event(event),
            None => tracing::trace!("Ignoring control line: {}", line),
        }
    }

    pub fn on_status_event(&mut self, event: StatusEvent) {
        let StatusEvent { call: id, update } = event;

        if self.forgotten.contains(&id) {
            return;
        }

        let is_new = !self.calls.contains_key(&id);
        if is_new {
            self.update_conference_ids();
            let call = Call::new(id, self.config.clone(), self.control.as_mut());
            self.calls.insert(id, call);
        }

        match update {
            CallUpdate::Status(status) => {
                self.with_call(id, |call, ctx| call.set_status(status, ctx));
            }
            CallUpdate::Duration(_) if is_new => {
                // the call was already running when we attached
                self.with_call(id, |call, ctx| call.set_status(CallStatus::InProgress, ctx));
            }
            CallUpdate::PartnerHandle(handle) => {
                self.with_call(id, |call, _| call.set_partner_handle(handle));
            }
            CallUpdate::PartnerDisplayName(name) => {
                self.with_call(id, |call, _| call.set_partner_display_name(name));
            }
            CallUpdate::ConferenceId(conference) => {
                self.with_call(id, |call, _| call.set_conference_id(conference));
            }
            CallUpdate::Duration(_) | CallUpdate::Other { .. } => {}
        }

        self.prune();
    }

    pub fn on_audio(&mut self, id: CallId, side: StreamSide, session: u64, bytes: &[u8]) {
        self.with_call(id, |call, ctx| call.on_audio(side, session, bytes, ctx));
        self.prune();
    }

    pub fn on_stream_closed(&mut self, id: CallId, side: StreamSide, session: u64) {
        self.with_call(id, |call, ctx| call.on_stream_closed(side, session, ctx));
        self.prune();
    }

    /// Start recording regardless of policy
    pub fn record(&mut self, id: CallId) -> bool {
        self.user_command(id, |call, ctx| call.start_recording(true, ctx))
    }

    pub fn stop(&mut self, id: CallId) -> bool {
        self.user_command(id, |call, ctx| call.stop(ctx))
    }

    pub fn discard(&mut self, id: CallId) -> bool {
        self.user_command(id, |call, ctx| call.discard(ctx))
    }

    pub fn confirm(&mut self, id: CallId) -> bool {
        self.user_command(id, |call, ctx| call.confirm(ctx))
    }

    pub fn deny(&mut self, id: CallId) -> bool {
        self.user_command(id, |call, ctx| call.deny(ctx))
    }

    /// True iff a live call of `conference` is recording. Calls outside a
    /// conference never block each other.
    pub fn is_conference_recording(&self, conference: ConferenceId) -> bool {
        conference.is_conference()
            && self
                .calls
                .values()
                .any(|c| c.conference_id() == conference && c.is_recording())
    }

    /// Forget every finished call that has nothing left to decide
    pub fn prune(&mut self) {
        let done: Vec<CallId> = self
            .calls
            .values()
            .filter(|c| c.is_done() && c.ok_to_delete())
            .map(Call::id)
            .collect();

        for id in done {
            if let Some(call) = self.calls.remove(&id) {
                tracing::debug!("Call {}: forgetting call ({})", id, call.status());
                self.forgotten.insert(id);
            }
        }
    }

    /// Apply a new configuration to the registry and every live call
    pub fn update_config(&mut self, config: RecorderConfig) {
        self.config = Arc::new(config);
        for call in self.calls.values_mut() {
            call.set_config(self.config.clone());
        }
    }

    /// Stop every recording with flush and drop all calls
    pub fn shutdown(&mut self) {
        let ids: Vec<CallId> = self.calls.keys().copied().collect();
        for id in &ids {
            self.with_call(*id, |call, ctx| call.stop_recording(true, ctx));
        }
        if !ids.is_empty() {
            tracing::debug!("Shutting down with {} calls still tracked", ids.len());
        }
        self.calls.clear();
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn is_forgotten(&self, id: CallId) -> bool {
        self.forgotten.contains(&id)
    }

    pub fn call(&self, id: CallId) -> Option<&Call> {
        self.calls.get(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn update_conference_ids(&mut self) {
        for call in self.calls.values_mut() {
            call.update_conference_id(self.control.as_mut());
        }
    }

    fn user_command(&mut self, id: CallId, f: impl FnOnce(&mut Call, &mut CallContext<'_>)) -> bool {
        let found = self.with_call(id, f).is_some();
        if !found {
            tracing::debug!("Call {}: no such call", id);
        }
        self.prune();
        found
    }

    /// Run `f` on a live call with a context borrowing the collaborators
    fn with_call<R>(
        &mut self,
        id: CallId,
        f: impl FnOnce(&mut Call, &mut CallContext<'_>) -> R,
    ) -> Option<R> {
        let conference = self.calls.get(&id)?.conference_id();
        let conference_recording = self.is_conference_recording(conference);

        let Self {
            calls,
            control,
            ports,
            encoders,
            notifier,
            ..
        } = self;
        let call = calls.get_mut(&id)?;
        let mut ctx = CallContext {
            control: control.as_mut(),
            ports: ports.as_mut(),
            encoders: encoders.as_ref(),
            notifier,
            conference_recording,
        };
        Some(f(call, &mut ctx))
    }
}

impl Drop for CallRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
