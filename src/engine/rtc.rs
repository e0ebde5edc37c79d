//! [`MediaEngine`] backed by `str0m`
//!
//! `str0m` is sans-IO as well: the host hands received datagrams and timeouts
//! to [`Str0mEngine::handle_receive`] and [`Str0mEngine::handle_timeout`], and
//! the engine transmits on the shared UDP socket while draining `Rtc` output.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::bandwidth::EncodingParameters;
use crate::engine::{
    ConnectionState, EngineConfig, EngineEvent, EngineState, MediaEngine, SenderId, SignalingState, StatsEntry,
    TransceiverInfo, TransceiverInit,
};
use crate::error::EngineError;
use crate::model::MediaTrack;
use crate::protocol::events::IceCandidate;
use crate::util::get_candidates;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Transceiver {
    info: TransceiverInfo,
    /// Direction as of the last offer, `None` before the first one.
    offered_direction: Option<Direction>,
    stream_id: Option<String>,
    params: Vec<EncodingParameters>,
    track: Option<MediaTrack>,
}

pub struct Str0mEngine {
    rtc: Rtc,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    transceivers: Vec<Transceiver>,
    pending: Option<SdpPendingOffer>,
    events: VecDeque<EngineEvent>,
    state: EngineState,
    timeout: Option<Instant>,
    arrived: HashSet<Mid>,
    stats: Vec<StatsEntry>,
}

impl Str0mEngine {
    pub fn new(socket: Arc<UdpSocket>, config: &EngineConfig) -> Result<Str0mEngine, EngineError> {
        let local_addr = socket.local_addr().map_err(|e| EngineError::Ice(e.to_string()))?;
        let mut rtc = Rtc::builder().set_stats_interval(Some(STATS_INTERVAL)).build();

        for turn in &config.turn_servers {
            info!(
                "Ignoring TURN server {}:{} ({}), only host candidates are gathered",
                turn.server_addr, turn.server_port, turn.transport
            );
        }

        let mut events = VecDeque::new();
        for candidate in get_candidates(local_addr) {
            events.push_back(EngineEvent::LocalCandidate(IceCandidate {
                candidate: candidate.to_sdp_string(),
                sdp_m_line_index: 0,
                sdp_mid: None,
                username_fragment: None,
            }));
            rtc.add_local_candidate(candidate);
        }
        if events.is_empty() {
            warn!("No usable host candidates on {}", local_addr);
        }

        Ok(Str0mEngine {
            rtc,
            socket,
            local_addr,
            transceivers: vec![],
            pending: None,
            events,
            state: EngineState::new(),
            timeout: Some(Instant::now()),
            arrived: HashSet::new(),
            stats: vec![],
        })
    }

    /// Feed a datagram received on the engine's socket.
    pub fn handle_receive(&mut self, now: Instant, source: SocketAddr, contents: &[u8]) -> Result<(), EngineError> {
        let input = Input::Receive(
            now,
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents: contents
                    .try_into()
                    .map_err(|e| EngineError::Ice(format!("{:?}", e)))?,
            },
        );
        self.handle_input(input)
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), EngineError> {
        self.handle_input(Input::Timeout(now))
    }

    /// When [`Str0mEngine::handle_timeout`] should next be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timeout
    }

    fn handle_input(&mut self, input: Input) -> Result<(), EngineError> {
        if !self.rtc.is_alive() {
            return Ok(());
        }
        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Rtc rejected input: {:?}", e);
            self.fail();
            return Err(EngineError::Ice(e.to_string()));
        }
        self.drive()
    }

    fn drive(&mut self) -> Result<(), EngineError> {
        while self.rtc.is_alive() {
            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => {
                    self.timeout = Some(t);
                    return Ok(());
                }
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self.socket.try_send_to(&transmit.contents, transmit.destination) {
                        debug!("Dropping datagram to {}: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_rtc_event(event),
                Err(e) => {
                    warn!("Rtc poll_output failed: {:?}", e);
                    self.fail();
                    return Err(EngineError::Ice(e.to_string()));
                }
            }
        }
        self.timeout = None;
        Ok(())
    }

    fn fail(&mut self) {
        self.rtc.disconnect();
        self.set_connection(ConnectionState::Failed);
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.state.connection != state {
            self.state.connection = state;
            self.events.push_back(EngineEvent::ConnectionStateChange(state));
        }
    }

    fn set_signaling(&mut self, state: SignalingState) {
        if self.state.signaling != state {
            self.state.signaling = state;
            self.events.push_back(EngineEvent::SignalingStateChange(state));
        }
    }

    fn handle_rtc_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("ICE connection state {:?}", state);
                self.state.ice = state;
                self.events.push_back(EngineEvent::IceConnectionStateChange(state));
                if state == IceConnectionState::Disconnected {
                    self.set_connection(ConnectionState::Disconnected);
                }
            }
            Event::Connected => self.set_connection(ConnectionState::Connected),
            Event::MediaAdded(added) => debug!("Media added: {:?} {:?}", added.mid, added.kind),
            Event::MediaData(data) => {
                if !self.arrived.insert(data.mid) {
                    return;
                }
                let Some(transceiver) = self.transceivers.iter().find(|t| t.info.mid == Some(data.mid)) else {
                    debug!("Media on unknown mid {}", data.mid);
                    return;
                };
                let track = MediaTrack::new(format!("remote-{}", data.mid), transceiver.info.kind);
                self.events.push_back(EngineEvent::TrackArrived {
                    mid: data.mid,
                    track,
                    stream_id: None,
                });
            }
            Event::PeerStats(stats) => self.record_stats("peer".to_string(), "peer", format!("{:?}", stats)),
            Event::MediaEgressStats(stats) => {
                self.record_stats(stats.mid.to_string(), "outbound-rtp", format!("{:?}", stats))
            }
            Event::MediaIngressStats(stats) => {
                self.record_stats(stats.mid.to_string(), "inbound-rtp", format!("{:?}", stats))
            }
            other => debug!("Rtc event: {:?}", other),
        }
    }

    fn record_stats(&mut self, id: String, kind: &str, detail: String) {
        let entry = StatsEntry {
            id,
            kind: kind.to_string(),
            timestamp: Utc::now(),
            detail,
        };
        match self.stats.iter_mut().find(|s| s.id == entry.id && s.kind == entry.kind) {
            Some(existing) => *existing = entry,
            None => self.stats.push(entry),
        }
    }

    fn transceiver_mut(&mut self, sender: SenderId) -> Result<&mut Transceiver, EngineError> {
        self.transceivers
            .iter_mut()
            .find(|t| t.info.sender == Some(sender))
            .ok_or(EngineError::UnknownSender)
    }

    fn push_transceiver(&mut self, transceiver: Transceiver) {
        debug!(
            "Transceiver {} added: {:?} {:?}",
            transceiver.info.index, transceiver.info.kind, transceiver.info.direction
        );
        self.transceivers.push(transceiver);
    }
}

impl MediaEngine for Str0mEngine {
    fn create_offer(&mut self) -> Result<String, EngineError> {
        if self.pending.take().is_some() {
            debug!("Discarding unanswered offer");
        }

        let mut change = self.rtc.sdp_api();
        for transceiver in &mut self.transceivers {
            let direction = transceiver.info.direction;
            match transceiver.info.mid {
                None => {
                    let mid = change.add_media(
                        transceiver.info.kind,
                        direction,
                        transceiver.stream_id.clone(),
                        transceiver.track.as_ref().map(|t| t.id().to_string()),
                        None,
                    );
                    transceiver.info.mid = Some(mid);
                }
                Some(mid) if transceiver.offered_direction != Some(direction) => {
                    change.set_direction(mid, direction);
                }
                Some(_) => {}
            }
            transceiver.offered_direction = Some(direction);
        }

        let Some((offer, pending)) = change.apply() else {
            return Err(EngineError::NoChanges);
        };
        self.pending = Some(pending);
        Ok(offer.to_sdp_string())
    }

    fn set_local_description(&mut self, _sdp: &str) -> Result<(), EngineError> {
        // `apply()` already made the offer local.
        if self.pending.is_none() {
            return Err(EngineError::NoPendingOffer);
        }
        self.set_signaling(SignalingState::HaveLocalOffer);
        Ok(())
    }

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), EngineError> {
        let answer = SdpAnswer::from_sdp_string(sdp).map_err(|e| EngineError::Sdp(e.to_string()))?;
        let pending = self.pending.take().ok_or(EngineError::NoPendingOffer)?;
        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| EngineError::Sdp(e.to_string()))?;

        self.set_signaling(SignalingState::Stable);
        if self.state.connection == ConnectionState::New {
            self.set_connection(ConnectionState::Connecting);
        }
        self.drive()
    }

    fn restart_ice(&mut self) {
        info!("ICE restart requested, keeping current credentials");
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        let parsed = Candidate::from_sdp_string(&candidate.candidate).map_err(|e| EngineError::Ice(e.to_string()))?;
        self.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    fn add_source(&mut self, track: &MediaTrack, init: TransceiverInit) -> Result<SenderId, EngineError> {
        if !self.rtc.is_alive() {
            return Err(EngineError::Closed);
        }
        if init.send_encodings.len() > 1 {
            debug!("Track {} has {} layers, sent as one stream", track.id(), init.send_encodings.len());
        }

        let sender = SenderId::next();
        self.push_transceiver(Transceiver {
            info: TransceiverInfo {
                index: self.transceivers.len(),
                mid: None,
                kind: track.kind(),
                direction: init.direction,
                sender: Some(sender),
            },
            offered_direction: None,
            stream_id: Some(init.stream_id),
            params: init.send_encodings,
            track: Some(track.clone()),
        });
        Ok(sender)
    }

    fn remove_source(&mut self, sender: SenderId) -> Result<(), EngineError> {
        let transceiver = self.transceiver_mut(sender)?;
        transceiver.info.sender = None;
        transceiver.track = None;
        transceiver.params.clear();
        transceiver.info.direction = Direction::Inactive;
        Ok(())
    }

    fn replace_track(&mut self, sender: SenderId, track: Option<&MediaTrack>) -> Result<(), EngineError> {
        self.transceiver_mut(sender)?.track = track.cloned();
        Ok(())
    }

    fn add_recv_only(&mut self, kind: MediaKind) {
        self.push_transceiver(Transceiver {
            info: TransceiverInfo {
                index: self.transceivers.len(),
                mid: None,
                kind,
                direction: Direction::RecvOnly,
                sender: None,
            },
            offered_direction: None,
            stream_id: None,
            params: vec![],
            track: None,
        });
    }

    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.transceivers.iter().map(|t| t.info.clone()).collect()
    }

    fn set_direction(&mut self, index: usize, direction: Direction) {
        if let Some(transceiver) = self.transceivers.get_mut(index) {
            transceiver.info.direction = direction;
        }
    }

    fn sender_parameters(&self, sender: SenderId) -> Option<Vec<EncodingParameters>> {
        self.transceivers
            .iter()
            .find(|t| t.info.sender == Some(sender))
            .map(|t| t.params.clone())
    }

    fn set_sender_parameters(&mut self, sender: SenderId, params: Vec<EncodingParameters>) -> Result<(), EngineError> {
        self.transceiver_mut(sender)?.params = params;
        Ok(())
    }

    fn stats(&self, sender: Option<SenderId>) -> Vec<StatsEntry> {
        let Some(sender) = sender else {
            return self.stats.clone();
        };
        let Some(mid) = self
            .transceivers
            .iter()
            .find(|t| t.info.sender == Some(sender))
            .and_then(|t| t.info.mid)
        else {
            return vec![];
        };
        let mid = mid.to_string();
        self.stats.iter().filter(|s| s.id == mid).cloned().collect()
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    fn close(&mut self) {
        info!("Closing media engine");
        self.rtc.disconnect();
        self.pending = None;
        self.set_signaling(SignalingState::Closed);
        self.set_connection(ConnectionState::Closed);
    }
}
