use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use str0m::media::{MediaKind, Mid};

use super::*;
use crate::config::ReconnectConfig;
use crate::engine::fake::FakeEngine;
use crate::engine::EngineEvent;
use crate::model::{BandwidthLimit, MediaTrack, NegotiationStatus, SimulcastConfig, TrackEncoding};

fn session() -> Session<FakeEngine> {
    session_with(SessionConfig::default())
}

fn session_with(config: SessionConfig) -> Session<FakeEngine> {
    Session::new(config, Box::new(|config| Ok(FakeEngine::new(config))))
}

fn drain(session: &mut Session<FakeEngine>) -> Vec<Output> {
    std::iter::from_fn(|| session.poll_output()).collect()
}

fn sent(outputs: &[Output]) -> Vec<Value> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Transmit(text) => serde_json::from_str(text).ok(),
            _ => None,
        })
        .collect()
}

/// Inner type of every custom event sent.
fn custom_sent(outputs: &[Output]) -> Vec<String> {
    sent(outputs)
        .iter()
        .filter(|v| v["type"] == "custom")
        .filter_map(|v| v["data"]["type"].as_str().map(str::to_string))
        .collect()
}

fn find_custom(outputs: &[Output], kind: &str) -> Option<Value> {
    sent(outputs)
        .into_iter()
        .find(|v| v["type"] == "custom" && v["data"]["type"] == kind)
        .map(|v| v["data"]["data"].clone())
}

fn notified(outputs: &[Output]) -> Vec<&'static str> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Notification(n) => Some(n.name()),
            _ => None,
        })
        .collect()
}

fn receive(session: &mut Session<FakeEngine>, message: Value) {
    session.handle_transport_message(Instant::now(), &message.to_string());
}

fn custom(kind: &str, data: Value) -> Value {
    json!({"type": "custom", "data": {"type": kind, "data": data}})
}

fn offer_data(audio: usize, video: usize) -> Value {
    custom(
        "offerData",
        json!({"tracksTypes": {"audio": audio, "video": video}, "integratedTurnServers": []}),
    )
}

fn answer(mids: Value) -> Value {
    custom("sdpAnswer", json!({"type": "answer", "sdp": "v=0\r\n", "midToTrackId": mids}))
}

fn peer_with_camera() -> Value {
    json!({
        "id": "peer",
        "type": "webrtc",
        "metadata": {"name": "Peer"},
        "tracks": {
            "peer:cam": {
                "metadata": {"source": "camera"},
                "simulcastConfig": {"enabled": true, "activeEncodings": ["h", "l"]}
            }
        }
    })
}

/// Connect as `me` into a room holding one peer with a camera.
fn join(session: &mut Session<FakeEngine>) -> Vec<Output> {
    session.connect(json!({"name": "me"}));
    receive(
        session,
        json!({"type": "connected", "data": {"id": "me", "otherEndpoints": [peer_with_camera()]}}),
    );
    drain(session)
}

/// Queue a three-layer simulcast camera.
fn add_camera(session: &mut Session<FakeEngine>) -> TrackId {
    let (track_id, _) = session.add_track(
        MediaTrack::new("cam", MediaKind::Video),
        json!({"source": "camera"}),
        SimulcastConfig::with_encodings(&TrackEncoding::ALL),
        BandwidthLimit::default(),
    );
    track_id
}

/// Rid and active flag of every sender layer of a local track.
fn layers(session: &Session<FakeEngine>, track_id: &TrackId) -> Vec<(TrackEncoding, bool)> {
    let sender = session.track(track_id).unwrap().sender.unwrap();
    session
        .engine()
        .unwrap()
        .sender_parameters(sender)
        .unwrap()
        .iter()
        .filter_map(|p| Some((p.rid?, p.active)))
        .collect()
}

fn microphone() -> MediaTrack {
    MediaTrack::new("mic", MediaKind::Audio)
}

fn add(session: &mut Session<FakeEngine>, track: MediaTrack) -> (TrackId, PendingCommand<TrackId>) {
    session.add_track(track, json!({"source": "mic"}), SimulcastConfig::disabled(), BandwidthLimit::default())
}

/// Run one offer/answer cycle, mapping every offered mid back to its track.
fn negotiate(session: &mut Session<FakeEngine>) -> Value {
    receive(session, offer_data(0, 1));
    let outputs = drain(session);
    let offer = find_custom(&outputs, "sdpOffer").expect("offer sent");
    receive(session, answer(offer["midToTrackId"].clone()));
    offer
}

/// Joined session with one negotiated microphone.
fn publishing() -> (Session<FakeEngine>, TrackId) {
    let mut session = session();
    join(&mut session);
    let (track_id, _) = add(&mut session, microphone());
    negotiate(&mut session);
    drain(&mut session);
    (session, track_id)
}

#[test]
fn connected_populates_roster() {
    let mut session = session();
    let outputs = join(&mut session);

    assert_eq!(sent(&outputs)[0], json!({"type": "connect", "data": {"metadata": {"name": "me"}}}));
    assert_eq!(notified(&outputs), vec!["connected", "trackAdded"]);
    assert_eq!(session.local_endpoint().id, "me");
    assert_eq!(session.remote_endpoints().count(), 1);
    assert_eq!(session.endpoint("peer").unwrap().endpoint_type, "webrtc");
    assert_eq!(session.endpoint("me").unwrap().metadata.raw, json!({"name": "me"}));
    assert!(session.endpoint("ghost").is_none());
    let track = session.track(&TrackId::from("peer:cam")).unwrap();
    assert_eq!(track.endpoint_id, "peer");
    assert_eq!(track.metadata.raw, json!({"source": "camera"}));
}

#[test]
fn publishes_track_through_offer_answer() {
    let mut session = session();
    join(&mut session);

    let (track_id, mut pending) = add(&mut session, microphone());
    assert!(track_id.starts_with("me:"));
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["renegotiateTracks"]);
    assert_eq!(notified(&outputs), vec!["localTrackAdded"]);
    assert!(pending.try_result().is_none());

    receive(&mut session, offer_data(0, 1));
    let outputs = drain(&mut session);
    let ops = session.engine().unwrap().ops().to_vec();
    assert_eq!(
        ops,
        vec!["add_source mic", "add_recv_only Video", "create_offer", "set_local_description"]
    );

    let offer = find_custom(&outputs, "sdpOffer").unwrap();
    assert_eq!(offer["sdpOffer"]["type"], "offer");
    assert_eq!(offer["midToTrackId"], json!({"0": track_id.as_str()}));
    assert_eq!(offer["trackIdToTrackMetadata"][track_id.as_str()], json!({"source": "mic"}));
    assert_eq!(offer["trackIdToTrackBitrates"][track_id.as_str()], json!(50_000.0));
    assert_eq!(
        session.track(&track_id).unwrap().negotiation_status,
        NegotiationStatus::Offered
    );
    assert!(pending.try_result().is_none());

    receive(&mut session, answer(json!({"0": track_id.as_str(), "1": "peer:cam"})));
    assert_eq!(session.track(&track_id).unwrap().negotiation_status, NegotiationStatus::Done);
    assert_eq!(pending.try_result(), Some(Ok(track_id)));
}

#[test]
fn one_renegotiation_at_a_time() {
    let mut session = session();
    join(&mut session);

    let (first, mut first_pending) = add(&mut session, microphone());
    let (second, mut second_pending) = add(&mut session, MediaTrack::new("cam", MediaKind::Video));
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["renegotiateTracks"]);
    assert!(session.track(&second).is_none());

    negotiate(&mut session);
    assert_eq!(first_pending.try_result(), Some(Ok(first)));
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["renegotiateTracks"]);
    assert!(second_pending.try_result().is_none());

    let offer = negotiate(&mut session);
    assert!(session.engine().unwrap().ops().contains(&"restart_ice".to_string()));
    assert_eq!(offer["midToTrackId"].as_object().unwrap().len(), 2);
    assert_eq!(second_pending.try_result(), Some(Ok(second)));
}

#[test]
fn rejects_tracks_before_join() {
    let mut session = session();
    let (_, mut pending) = add(&mut session, microphone());
    assert_eq!(pending.try_result(), Some(Err(CommandError::NotAccepted)));
    assert!(custom_sent(&drain(&mut session)).is_empty());
}

#[test]
fn rejects_simulcast_limits_on_plain_track() {
    let mut session = session();
    join(&mut session);

    let limit = BandwidthLimit::Simulcast(HashMap::from([(TrackEncoding::High, 500)]));
    let (_, mut pending) = session.add_track(microphone(), json!({}), SimulcastConfig::disabled(), limit);
    assert_eq!(pending.try_result(), Some(Err(CommandError::InvalidBandwidthLimit)));
}

#[test]
fn rejects_handle_already_attached() {
    let (mut session, _) = publishing();

    let (_, mut pending) = add(&mut session, microphone());
    assert_eq!(pending.try_result(), Some(Err(CommandError::DuplicateTrack)));
    assert!(custom_sent(&drain(&mut session)).is_empty());
}

#[test]
fn own_track_events_are_ignored() {
    let (mut session, track_id) = publishing();

    receive(
        &mut session,
        json!({"type": "tracksAdded", "data": {"endpointId": "me", "tracks": {track_id.as_str(): {}}}}),
    );
    receive(
        &mut session,
        json!({"type": "trackUpdated", "data": {"endpointId": "me", "trackId": track_id.as_str(), "metadata": {}}}),
    );
    assert!(notified(&drain(&mut session)).is_empty());
    assert!(!session.renegotiation_in_flight);

    receive(
        &mut session,
        json!({"type": "tracksAdded", "data": {"endpointId": "peer", "tracks": {"peer:screen": {}}}}),
    );
    assert_eq!(notified(&drain(&mut session)), vec!["trackAdded"]);
    assert!(session.renegotiation_in_flight);
}

#[test]
fn negotiation_status_never_regresses() {
    let (mut session, track_id) = publishing();

    receive(&mut session, offer_data(0, 1));
    assert_eq!(session.track(&track_id).unwrap().negotiation_status, NegotiationStatus::Done);
}

#[test]
fn bad_messages_leave_session_untouched() {
    let mut session = session();
    session.handle_transport_message(Instant::now(), "not json");
    session.handle_transport_message(Instant::now(), r#"{"type":"somethingNew","data":{}}"#);
    session.handle_transport_message(Instant::now(), r#"{"type":"custom","data":{"type":"later"}}"#);
    assert!(drain(&mut session).is_empty());

    join(&mut session);
    assert_eq!(session.local_endpoint().id, "me");
}

#[test]
fn metadata_parse_failure_is_isolated() {
    let strict = Arc::new(|raw: &Value| {
        raw.get("source")
            .map(|_| raw.clone())
            .ok_or_else(|| "source required".to_string())
    });
    let mut session = session_with(SessionConfig::default().with_track_metadata_parser(strict));
    join(&mut session);

    receive(
        &mut session,
        json!({"type": "tracksAdded", "data": {"endpointId": "peer", "tracks": {"peer:bad": {"metadata": {"x": 1}}}}}),
    );
    let bad = session.track(&TrackId::from("peer:bad")).unwrap();
    assert_eq!(bad.metadata.parsing_error.as_deref(), Some("source required"));
    assert_eq!(bad.metadata.raw, json!({"x": 1}));
    assert!(session.track(&TrackId::from("peer:cam")).unwrap().metadata.is_valid());
}

#[test]
fn remote_media_makes_track_ready() {
    let mut session = session();
    join(&mut session);
    receive(&mut session, offer_data(0, 1));
    receive(&mut session, answer(json!({"0": "peer:cam"})));
    drain(&mut session);

    let engine = session.engine_mut().unwrap();
    engine.push_event(EngineEvent::TrackArrived {
        mid: Mid::from("7"),
        track: MediaTrack::new("remote-7", MediaKind::Video),
        stream_id: None,
    });
    engine.push_event(EngineEvent::TrackArrived {
        mid: Mid::from("0"),
        track: MediaTrack::new("remote-0", MediaKind::Video),
        stream_id: Some("peer-stream".into()),
    });
    session.handle_engine_events(Instant::now());

    let outputs = drain(&mut session);
    assert_eq!(notified(&outputs), vec!["trackReady"]);
    let track = session.track(&TrackId::from("peer:cam")).unwrap();
    assert_eq!(track.kind, Some(MediaKind::Video));
    assert_eq!(track.stream_id.as_deref(), Some("peer-stream"));
}

#[test]
fn local_candidates_are_forwarded() {
    let (mut session, _) = publishing();
    let candidate = crate::protocol::events::IceCandidate {
        candidate: "candidate:1 1 udp 2130706431 10.0.0.2 40000 typ host".into(),
        sdp_m_line_index: 0,
        sdp_mid: Some("0".into()),
        username_fragment: None,
    };
    session
        .engine_mut()
        .unwrap()
        .push_event(EngineEvent::LocalCandidate(candidate));
    session.handle_engine_events(Instant::now());

    let data = find_custom(&drain(&mut session), "candidate").unwrap();
    assert_eq!(data["sdpMLineIndex"], json!(0));

    receive(&mut session, custom("candidate", data));
    assert_eq!(session.engine().unwrap().remote_candidates.len(), 1);
}

#[test]
fn endpoint_removal_reports_tracks_first() {
    let mut session = session();
    join(&mut session);

    receive(&mut session, json!({"type": "endpointRemoved", "data": {"id": "peer"}}));
    assert_eq!(notified(&drain(&mut session)), vec!["trackRemoved", "endpointRemoved"]);
    assert_eq!(session.remote_endpoints().count(), 0);
    assert!(session.track(&TrackId::from("peer:cam")).is_none());
}

#[test]
fn removal_of_local_endpoint_ends_session() {
    let (mut session, _) = publishing();

    receive(&mut session, json!({"type": "endpointRemoved", "data": {"id": "me"}}));
    assert_eq!(notified(&drain(&mut session)), vec!["disconnected"]);
    assert!(session.engine().is_none());
    assert_eq!(session.poll_timeout(), None);
}

#[test]
fn priority_splits_remote_tracks() {
    let mut session = session();
    join(&mut session);
    receive(
        &mut session,
        json!({"type": "tracksAdded", "data": {"endpointId": "peer", "tracks": {"peer:screen": {}}}}),
    );
    drain(&mut session);

    receive(&mut session, json!({"type": "tracksPriority", "data": {"tracks": ["peer:screen"]}}));
    let outputs = drain(&mut session);
    let Some(Output::Notification(Notification::TracksPriorityChanged { enabled, disabled })) = outputs.first() else {
        panic!("expected a priority change, got {:?}", outputs);
    };
    assert_eq!(enabled[0].track_id, TrackId::from("peer:screen"));
    assert_eq!(disabled[0].track_id, TrackId::from("peer:cam"));
}

#[test]
fn server_events_update_remote_tracks() {
    let mut session = session();
    join(&mut session);

    receive(
        &mut session,
        custom(
            "encodingSwitched",
            json!({"endpointId": "peer", "trackId": "peer:cam", "encoding": "l", "reason": "low_bandwidth"}),
        ),
    );
    receive(&mut session, custom("vadNotification", json!({"trackId": "peer:cam", "status": "speech"})));
    receive(&mut session, custom("bandwidthEstimation", json!({"estimation": 812000.0})));
    receive(
        &mut session,
        json!({"type": "trackEncodingDisabled", "data": {"endpointId": "peer", "trackId": "peer:cam", "encoding": "h"}}),
    );

    assert_eq!(
        notified(&drain(&mut session)),
        vec![
            "encodingChanged",
            "voiceActivityChanged",
            "bandwidthEstimationChanged",
            "trackEncodingDisabled"
        ]
    );
    let track = session.track(&TrackId::from("peer:cam")).unwrap();
    assert_eq!(track.encoding, Some(TrackEncoding::Low));
    assert_eq!(track.simulcast_config.disabled_encodings, vec![TrackEncoding::High]);
    assert_eq!(session.bandwidth_estimation(), 812000.0);
}

#[tokio::test]
async fn server_error_closes_session() {
    let mut session = session();
    join(&mut session);
    let (_, pending) = add(&mut session, microphone());
    drain(&mut session);

    receive(&mut session, json!({"type": "error", "data": {"message": "room closed"}}));
    let outputs = drain(&mut session);
    assert_eq!(notified(&outputs), vec!["signalingError"]);
    assert_eq!(sent(&outputs), vec![json!({"type": "disconnect"})]);

    assert_eq!(pending.await, Err(CommandError::SessionClosed));
}

#[test]
fn remove_without_engine_resolves_at_once() {
    let mut session = session();
    join(&mut session);
    let (track_id, _) = add(&mut session, microphone());
    drain(&mut session);

    // Stand-in for the server finishing the add's renegotiation.
    session.renegotiation_in_flight = false;
    let mut pending = session.remove_track(&track_id);
    assert_eq!(pending.try_result(), Some(Ok(())));
    assert!(custom_sent(&drain(&mut session)).is_empty());
}

#[test]
fn remove_track_renegotiates() {
    let (mut session, track_id) = publishing();

    let mut pending = session.remove_track(&track_id);
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["renegotiateTracks"]);
    assert_eq!(notified(&outputs), vec!["localTrackRemoved"]);
    assert!(session.track(&track_id).is_none());
    assert!(pending.try_result().is_none());

    negotiate(&mut session);
    assert_eq!(pending.try_result(), Some(Ok(())));
}

#[test]
fn replace_with_none_mutes() {
    let (mut session, track_id) = publishing();
    let sender = session.track(&track_id).unwrap().sender.unwrap();

    let mut pending = session.replace_track(&track_id, None, None);
    assert_eq!(pending.try_result(), Some(Ok(())));
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["muteTrack"]);
    assert_eq!(notified(&outputs), vec!["localTrackMuted", "localTrackReplaced"]);
    assert!(session.engine().unwrap().sender_track(sender).is_none());

    let mut pending = session.replace_track(&track_id, Some(microphone()), Some(json!({"source": "headset"})));
    assert_eq!(pending.try_result(), Some(Ok(())));
    let outputs = drain(&mut session);
    assert_eq!(custom_sent(&outputs), vec!["unmuteTrack"]);
    assert_eq!(
        notified(&outputs),
        vec!["localTrackUnmuted", "localTrackMetadataChanged", "localTrackReplaced"]
    );
}

#[test]
fn track_metadata_follows_negotiation() {
    let mut session = session();
    join(&mut session);
    let (track_id, _) = add(&mut session, microphone());
    drain(&mut session);

    session.update_track_metadata(&track_id, json!({"source": "a"})).unwrap();
    assert!(drain(&mut session).is_empty());

    receive(&mut session, offer_data(0, 0));
    let offer = find_custom(&drain(&mut session), "sdpOffer").unwrap();
    assert_eq!(offer["trackIdToTrackMetadata"][track_id.as_str()], json!({"source": "a"}));

    session.update_track_metadata(&track_id, json!({"source": "b"})).unwrap();
    assert!(drain(&mut session).is_empty());

    receive(&mut session, answer(offer["midToTrackId"].clone()));
    let outputs = drain(&mut session);
    assert_eq!(
        sent(&outputs),
        vec![json!({"type": "updateTrackMetadata", "data": {"trackId": track_id.as_str(), "trackMetadata": {"source": "b"}}})]
    );
    assert_eq!(notified(&outputs), vec!["localTrackMetadataChanged"]);

    session.update_track_metadata(&track_id, json!({"source": "c"})).unwrap();
    assert_eq!(sent(&drain(&mut session)).len(), 1);

    let unknown = session.update_track_metadata(&TrackId::from("me:nope"), json!({}));
    assert!(unknown.is_err());
}

#[test]
fn endpoint_metadata_update_is_sent() {
    let mut session = session();
    join(&mut session);

    session.update_endpoint_metadata(json!({"name": "renamed"}));
    let outputs = drain(&mut session);
    assert_eq!(
        sent(&outputs),
        vec![json!({"type": "updateEndpointMetadata", "data": {"metadata": {"name": "renamed"}}})]
    );
    assert_eq!(notified(&outputs), vec!["localEndpointMetadataChanged"]);
    assert_eq!(session.local_endpoint().metadata.raw, json!({"name": "renamed"}));
}

#[test]
fn target_encoding_needs_active_variant() {
    let mut session = session();
    join(&mut session);
    let cam = TrackId::from("peer:cam");

    session.set_target_track_encoding(&cam, TrackEncoding::Low);
    let outputs = drain(&mut session);
    assert_eq!(
        find_custom(&outputs, "setTargetTrackVariant"),
        Some(json!({"trackId": "peer:cam", "variant": "l"}))
    );
    assert_eq!(notified(&outputs), vec!["targetTrackEncodingRequested"]);

    session.set_target_track_encoding(&cam, TrackEncoding::Medium);
    session.set_target_track_encoding(&TrackId::from("peer:nope"), TrackEncoding::Low);
    assert!(drain(&mut session).is_empty());
}

#[test]
fn bandwidth_limit_waits_for_sender() {
    let mut session = session();
    join(&mut session);
    let (track_id, _) = add(&mut session, MediaTrack::new("cam", MediaKind::Video));
    drain(&mut session);

    assert!(!session.set_track_bandwidth(&track_id, 300).unwrap());
    assert_eq!(session.track(&track_id).unwrap().max_bandwidth, BandwidthLimit::Single(300));

    negotiate(&mut session);
    drain(&mut session);

    assert!(session.set_track_bandwidth(&track_id, 500).unwrap());
    let outputs = drain(&mut session);
    assert_eq!(
        find_custom(&outputs, "trackVariantBitrates"),
        Some(json!({"trackId": track_id.as_str(), "variantBitrates": 512_000.0}))
    );
    assert_eq!(notified(&outputs), vec!["localTrackBandwidthSet"]);

    assert!(session.set_track_bandwidth(&TrackId::from("me:nope"), 1).is_err());
}

#[test]
fn stats_cover_senders_and_connection() {
    let (session, track_id) = publishing();
    let sender = session.track(&track_id).unwrap().sender.unwrap();

    assert_eq!(session.get_stats(Some(&track_id))[0].id, sender.to_string());
    assert_eq!(session.get_stats(None)[0].id, "peer");
    assert!(session.get_stats(Some(&TrackId::from("peer:cam"))).is_empty());
}

#[test]
fn reconnects_and_republishes() {
    let (mut session, _) = publishing();
    let now = Instant::now();

    session.handle_transport_closed(now, Some("going away"));
    assert_eq!(notified(&drain(&mut session)), vec!["reconnectionStarted"]);
    assert_eq!(session.reconnect_status(), Some(ReconnectStatus::Reconnecting));
    let deadline = session.poll_timeout().unwrap();
    assert_eq!(deadline, now + Duration::from_millis(500));

    session.handle_timeout(now + Duration::from_millis(499));
    assert!(drain(&mut session).is_empty());

    session.handle_timeout(deadline);
    let outputs = drain(&mut session);
    let [Output::Reconnect { metadata }] = outputs.as_slice() else {
        panic!("expected a reconnect request, got {:?}", outputs);
    };
    assert_eq!(metadata, &json!({"name": "me"}));
    assert!(session.engine().is_none());

    let outputs = join(&mut session);
    assert_eq!(notified(&outputs), vec!["connected", "trackAdded", "localTrackAdded", "reconnected"]);
    assert_eq!(custom_sent(&outputs), vec!["renegotiateTracks"]);
    assert_eq!(session.reconnect_status(), Some(ReconnectStatus::Initial));
}

#[test]
fn stopped_tracks_are_not_republished() {
    let mut session = session();
    join(&mut session);
    let track = microphone();
    add(&mut session, track.clone());
    negotiate(&mut session);
    drain(&mut session);

    let now = Instant::now();
    session.handle_transport_error(now, "reset by peer");
    track.stop();
    session.handle_timeout(now + Duration::from_secs(1));
    drain(&mut session);

    let outputs = join(&mut session);
    assert_eq!(notified(&outputs), vec!["connected", "trackAdded", "reconnected"]);
}

#[test]
fn auth_close_is_final() {
    let (mut session, _) = publishing();

    session.handle_transport_closed(Instant::now(), Some("Unauthorized"));
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.poll_timeout(), None);
}

#[test]
fn failures_before_join_are_not_retried() {
    let mut session = session();
    session.connect(json!({}));
    drain(&mut session);

    session.handle_transport_closed(Instant::now(), None);
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.reconnect_status(), Some(ReconnectStatus::Initial));
}

#[test]
fn retries_give_up_at_limit() {
    let config = SessionConfig::default().with_reconnect(ReconnectConfig {
        max_attempts: 1,
        ..ReconnectConfig::default()
    });
    let mut session = session_with(config);
    join(&mut session);
    let now = Instant::now();

    session.handle_transport_error(now, "reset");
    session.handle_timeout(now + Duration::from_secs(1));
    drain(&mut session);

    session.handle_transport_error(now + Duration::from_secs(2), "refused");
    assert_eq!(notified(&drain(&mut session)), vec!["reconnectionRetriesLimitReached"]);
    assert_eq!(session.reconnect_status(), Some(ReconnectStatus::Failed));
}

#[test]
fn disabled_reconnect_does_nothing() {
    let mut session = session_with(SessionConfig::default().without_reconnect());
    join(&mut session);

    session.handle_transport_closed(Instant::now(), None);
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.reconnect_status(), None);
}

#[test]
fn engine_failure_triggers_reconnect() {
    let (mut session, _) = publishing();

    session
        .engine_mut()
        .unwrap()
        .push_event(EngineEvent::ConnectionStateChange(crate::engine::ConnectionState::Failed));
    session.handle_engine_events(Instant::now());
    assert_eq!(
        notified(&drain(&mut session)),
        vec!["connectionError", "reconnectionStarted"]
    );
}

#[test]
fn engine_factory_failure_is_reported() {
    let mut session: Session<FakeEngine> = Session::new(
        SessionConfig::default(),
        Box::new(|_| Err(crate::error::EngineError::Closed)),
    );
    join(&mut session);

    receive(&mut session, offer_data(0, 1));
    assert_eq!(
        notified(&drain(&mut session)),
        vec!["connectionError", "reconnectionStarted"]
    );
    assert!(session.engine().is_none());
}

#[test]
fn rejected_answer_keeps_queue_blocked() {
    let mut session = session();
    join(&mut session);
    let (_, mut pending) = add(&mut session, microphone());
    receive(&mut session, offer_data(0, 0));
    let offer = find_custom(&drain(&mut session), "sdpOffer").unwrap();

    session.engine_mut().unwrap().fail_remote_description = true;
    receive(&mut session, answer(offer["midToTrackId"].clone()));
    assert!(pending.try_result().is_none());
    assert!(session.renegotiation_in_flight);
}

#[test]
fn encoding_toggles_reach_sender_and_server() {
    let mut session = session();
    join(&mut session);
    let cam = add_camera(&mut session);
    negotiate(&mut session);
    drain(&mut session);

    session.disable_track_encoding(&cam, TrackEncoding::Low).unwrap();
    let outputs = drain(&mut session);
    assert_eq!(
        find_custom(&outputs, "disableTrackEncoding"),
        Some(json!({"trackId": cam.as_str(), "encoding": "l"}))
    );
    assert_eq!(notified(&outputs), vec!["localTrackEncodingDisabled"]);
    assert_eq!(
        layers(&session, &cam),
        vec![(TrackEncoding::Low, false), (TrackEncoding::Medium, true), (TrackEncoding::High, true)]
    );
    assert_eq!(
        session.track(&cam).unwrap().simulcast_config.disabled_encodings,
        vec![TrackEncoding::Low]
    );

    session.enable_track_encoding(&cam, TrackEncoding::Low).unwrap();
    let outputs = drain(&mut session);
    assert_eq!(
        find_custom(&outputs, "enableTrackEncoding"),
        Some(json!({"trackId": cam.as_str(), "encoding": "l"}))
    );
    assert_eq!(notified(&outputs), vec!["localTrackEncodingEnabled"]);
    assert!(layers(&session, &cam).iter().all(|(_, active)| *active));
    assert!(session.track(&cam).unwrap().simulcast_config.disabled_encodings.is_empty());

    assert!(session.disable_track_encoding(&TrackId::from("me:nope"), TrackEncoding::Low).is_err());
}

#[test]
fn encoding_disabled_before_engine_applies_after_answer() {
    let mut session = session();
    join(&mut session);
    let cam = add_camera(&mut session);
    drain(&mut session);

    session.disable_track_encoding(&cam, TrackEncoding::Low).unwrap();
    assert_eq!(custom_sent(&drain(&mut session)), vec!["disableTrackEncoding"]);

    negotiate(&mut session);
    assert_eq!(
        layers(&session, &cam),
        vec![(TrackEncoding::Low, false), (TrackEncoding::Medium, true), (TrackEncoding::High, true)]
    );
}

#[test]
fn encoding_bandwidth_caps_one_layer() {
    let mut session = session();
    join(&mut session);
    let cam = add_camera(&mut session);
    drain(&mut session);

    assert!(!session.set_encoding_bandwidth(&cam, TrackEncoding::High, 1000).unwrap());
    negotiate(&mut session);
    drain(&mut session);

    assert!(session.set_encoding_bandwidth(&cam, TrackEncoding::Medium, 300).unwrap());
    let outputs = drain(&mut session);
    assert_eq!(
        find_custom(&outputs, "trackVariantBitrates"),
        Some(json!({
            "trackId": cam.as_str(),
            "variantBitrates": {"l": 150_000.0, "m": 307_200.0, "h": 1_024_000.0}
        }))
    );
    assert_eq!(notified(&outputs), vec!["localTrackEncodingBandwidthSet"]);
    assert_eq!(
        session.track(&cam).unwrap().max_bandwidth,
        BandwidthLimit::Simulcast(HashMap::from([(TrackEncoding::High, 1000), (TrackEncoding::Medium, 300)]))
    );
}

#[test]
fn encoding_bandwidth_on_plain_track_changes_nothing() {
    let mut session = session();
    join(&mut session);
    let (queued, _) = add(&mut session, microphone());
    drain(&mut session);

    // Without an engine the limit would otherwise only be stored.
    assert!(session.set_encoding_bandwidth(&queued, TrackEncoding::High, 100).is_err());
    assert_eq!(session.track(&queued).unwrap().max_bandwidth, BandwidthLimit::Single(0));

    let (mut session, mic) = publishing();
    assert!(session.set_encoding_bandwidth(&mic, TrackEncoding::High, 100).is_err());
    assert_eq!(session.track(&mic).unwrap().max_bandwidth, BandwidthLimit::Single(0));
    assert!(drain(&mut session).is_empty());
}
