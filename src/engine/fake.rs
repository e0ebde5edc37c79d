use std::collections::VecDeque;

use str0m::media::{Direction, MediaKind, Mid};
use str0m::IceConnectionState;

use crate::bandwidth::EncodingParameters;
use crate::engine::*;
use crate::error::EngineError;
use crate::model::MediaTrack;
use crate::protocol::events::IceCandidate;

struct Slot {
    info: TransceiverInfo,
    params: Vec<EncodingParameters>,
    track: Option<MediaTrack>,
}

/// In-memory engine that records what the session asked of it.
///
/// Accepting a remote description settles every layer at once and queues
/// the matching state-change events.
pub(crate) struct FakeEngine {
    pub config: EngineConfig,
    slots: Vec<Slot>,
    state: EngineState,
    events: VecDeque<EngineEvent>,
    ops: Vec<String>,
    pub remote_candidates: Vec<IceCandidate>,
    pub fail_remote_description: bool,
    pub closed: bool,
}

impl FakeEngine {
    pub fn new(config: &EngineConfig) -> FakeEngine {
        FakeEngine {
            config: config.clone(),
            slots: vec![],
            state: EngineState::new(),
            events: VecDeque::new(),
            ops: vec![],
            remote_candidates: vec![],
            fail_remote_description: false,
            closed: false,
        }
    }

    pub fn ops(&self) -> &[String] {
        &self.ops
    }

    pub fn push_event(&mut self, event: EngineEvent) {
        self.events.push_back(event);
    }

    pub fn set_state(&mut self, state: EngineState) {
        self.state = state;
    }

    pub fn sender_track(&self, sender: SenderId) -> Option<&MediaTrack> {
        self.slot(sender).and_then(|s| s.track.as_ref())
    }

    fn slot(&self, sender: SenderId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.info.sender == Some(sender))
    }

    fn slot_mut(&mut self, sender: SenderId) -> Result<&mut Slot, EngineError> {
        self.slots
            .iter_mut()
            .find(|s| s.info.sender == Some(sender))
            .ok_or(EngineError::UnknownSender)
    }

    fn push_slot(&mut self, kind: MediaKind, direction: Direction, sender: Option<SenderId>) -> &mut Slot {
        let index = self.slots.len();
        self.slots.push(Slot {
            info: TransceiverInfo {
                index,
                mid: None,
                kind,
                direction,
                sender,
            },
            params: vec![],
            track: None,
        });
        &mut self.slots[index]
    }
}

impl MediaEngine for FakeEngine {
    fn create_offer(&mut self) -> Result<String, EngineError> {
        self.ops.push("create_offer".into());
        let mut sdp = String::from("v=0\r\n");
        for slot in &mut self.slots {
            let mid = slot
                .info
                .mid
                .get_or_insert_with(|| Mid::from(slot.info.index.to_string().as_str()));
            sdp.push_str(&format!("a=mid:{}\r\n", mid));
        }
        Ok(sdp)
    }

    fn set_local_description(&mut self, _sdp: &str) -> Result<(), EngineError> {
        self.ops.push("set_local_description".into());
        self.state.signaling = SignalingState::HaveLocalOffer;
        Ok(())
    }

    fn set_remote_description(&mut self, _sdp: &str) -> Result<(), EngineError> {
        self.ops.push("set_remote_description".into());
        if self.fail_remote_description {
            return Err(EngineError::Sdp("rejected by test".into()));
        }
        if self.state.signaling != SignalingState::HaveLocalOffer {
            return Err(EngineError::NoPendingOffer);
        }

        self.state = EngineState {
            signaling: SignalingState::Stable,
            connection: ConnectionState::Connected,
            ice: IceConnectionState::Connected,
        };
        self.events.push_back(EngineEvent::SignalingStateChange(SignalingState::Stable));
        self.events.push_back(EngineEvent::IceConnectionStateChange(IceConnectionState::Connected));
        self.events.push_back(EngineEvent::ConnectionStateChange(ConnectionState::Connected));
        Ok(())
    }

    fn restart_ice(&mut self) {
        self.ops.push("restart_ice".into());
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        self.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn add_source(&mut self, track: &MediaTrack, init: TransceiverInit) -> Result<SenderId, EngineError> {
        self.ops.push(format!("add_source {}", track.id()));
        let sender = SenderId::next();
        let slot = self.push_slot(track.kind(), init.direction, Some(sender));
        slot.params = init.send_encodings;
        slot.track = Some(track.clone());
        Ok(sender)
    }

    fn remove_source(&mut self, sender: SenderId) -> Result<(), EngineError> {
        self.ops.push(format!("remove_source {}", sender));
        let slot = self.slot_mut(sender)?;
        slot.info.sender = None;
        slot.track = None;
        slot.info.direction = match slot.info.direction {
            Direction::SendRecv => Direction::RecvOnly,
            _ => Direction::Inactive,
        };
        Ok(())
    }

    fn replace_track(&mut self, sender: SenderId, track: Option<&MediaTrack>) -> Result<(), EngineError> {
        self.ops.push(format!("replace_track {}", sender));
        self.slot_mut(sender)?.track = track.cloned();
        Ok(())
    }

    fn add_recv_only(&mut self, kind: MediaKind) {
        self.ops.push(format!("add_recv_only {:?}", kind));
        self.push_slot(kind, Direction::RecvOnly, None);
    }

    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.slots.iter().map(|s| s.info.clone()).collect()
    }

    fn set_direction(&mut self, index: usize, direction: Direction) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.info.direction = direction;
        }
    }

    fn sender_parameters(&self, sender: SenderId) -> Option<Vec<EncodingParameters>> {
        self.slot(sender).map(|s| s.params.clone())
    }

    fn set_sender_parameters(&mut self, sender: SenderId, params: Vec<EncodingParameters>) -> Result<(), EngineError> {
        self.slot_mut(sender)?.params = params;
        Ok(())
    }

    fn stats(&self, sender: Option<SenderId>) -> Vec<StatsEntry> {
        let id = sender.map(|s| s.to_string()).unwrap_or_else(|| "peer".into());
        vec![StatsEntry {
            id,
            kind: "fake".into(),
            timestamp: chrono::Utc::now(),
            detail: String::new(),
        }]
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    fn close(&mut self) {
        self.closed = true;
        self.state.signaling = SignalingState::Closed;
        self.state.connection = ConnectionState::Closed;
    }
}
