use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::events::{MediaEvent, CONTROL_EVENTS, CUSTOM_EVENTS};

/// Outcome of decoding one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(MediaEvent),
    /// A well-formed message of a type this client does not know.
    Unknown { event_type: String },
}

pub fn encode(event: &MediaEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode one message.
///
/// Unknown event types are reported as [`Decoded::Unknown`] so that newer
/// servers can add events without breaking this client.
pub fn decode(text: &str) -> Result<Decoded, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(event_type) = unknown_type(&value)? {
        return Ok(Decoded::Unknown { event_type });
    }

    Ok(Decoded::Event(serde_json::from_value(value)?))
}

fn unknown_type(value: &Value) -> Result<Option<String>, ProtocolError> {
    let event_type = type_tag(value)?;

    if !CONTROL_EVENTS.contains(&event_type) {
        return Ok(Some(event_type.to_string()));
    }

    if event_type == "custom" {
        let inner = value.get("data").ok_or(ProtocolError::MissingCustomPayload)?;
        let inner_type = type_tag(inner)?;
        if !CUSTOM_EVENTS.contains(&inner_type) {
            return Ok(Some(format!("custom/{}", inner_type)));
        }
    }

    Ok(None)
}

fn type_tag(value: &Value) -> Result<&str, ProtocolError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackId;
    use crate::protocol::events::*;
    use serde_json::json;

    fn decode_value(value: Value) -> Result<Decoded, ProtocolError> {
        decode(&value.to_string())
    }

    #[test]
    fn custom_events_are_wrapped_twice() {
        let event = MediaEvent::Custom(CustomEvent::RenegotiateTracks);
        let value: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(value, json!({"type": "custom", "data": {"type": "renegotiateTracks"}}));

        let event = MediaEvent::Custom(CustomEvent::MuteTrack(TrackIdData {
            track_id: TrackId::from("me:1"),
        }));
        let value: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "custom", "data": {"type": "muteTrack", "data": {"trackId": "me:1"}}})
        );
    }

    #[test]
    fn disconnect_has_no_payload() {
        let value: Value = serde_json::from_str(&encode(&MediaEvent::Disconnect).unwrap()).unwrap();
        assert_eq!(value, json!({"type": "disconnect"}));
    }

    #[test]
    fn decodes_connected_roster() {
        let decoded = decode_value(json!({
            "type": "connected",
            "data": {
                "id": "me",
                "otherEndpoints": [{
                    "id": "peer",
                    "type": "webrtc",
                    "metadata": {"name": "B"},
                    "tracks": {"peer:1": {"metadata": {}, "simulcastConfig": {"enabled": false}}}
                }]
            }
        }))
        .unwrap();

        let Decoded::Event(MediaEvent::Connected(data)) = decoded else {
            panic!("expected connected, got {:?}", decoded);
        };
        assert_eq!(data.id, "me");
        assert_eq!(data.other_endpoints[0].endpoint_type, "webrtc");
        assert!(data.other_endpoints[0].tracks.contains_key(&TrackId::from("peer:1")));
    }

    #[test]
    fn decodes_sdp_answer_with_mids() {
        let decoded = decode_value(json!({
            "type": "custom",
            "data": {
                "type": "sdpAnswer",
                "data": {"type": "answer", "sdp": "v=0", "midToTrackId": {"0": "me:1"}}
            }
        }))
        .unwrap();

        let Decoded::Event(MediaEvent::Custom(CustomEvent::SdpAnswer(answer))) = decoded else {
            panic!("expected sdpAnswer");
        };
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert_eq!(answer.mid_to_track_id["0"], TrackId::from("me:1"));
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let event = MediaEvent::Custom(CustomEvent::Candidate(IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_m_line_index: 0,
            sdp_mid: Some("0".into()),
            username_fragment: None,
        }));
        let value: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(value["data"]["data"]["sdpMLineIndex"], json!(0));
        assert_eq!(value["data"]["data"]["sdpMid"], json!("0"));
        assert!(value["data"]["data"].get("usernameFragment").is_none());
    }

    #[test]
    fn unknown_types_are_ignorable() {
        let top = decode_value(json!({"type": "somethingNew", "data": {}})).unwrap();
        assert_eq!(top, Decoded::Unknown { event_type: "somethingNew".into() });

        let custom = decode_value(json!({"type": "custom", "data": {"type": "later"}})).unwrap();
        assert_eq!(custom, Decoded::Unknown { event_type: "custom/later".into() });
    }

    #[test]
    fn malformed_messages_are_errors() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_value(json!({"data": {}})), Err(ProtocolError::MissingType)));
        assert!(matches!(
            decode_value(json!({"type": "tracksRemoved", "data": {"endpointId": 3}})),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_value(json!({"type": "custom"})),
            Err(ProtocolError::MissingCustomPayload)
        ));
    }

    #[test]
    fn every_known_custom_name_round_trips_through_name() {
        let events = [
            CustomEvent::RenegotiateTracks,
            CustomEvent::BandwidthEstimation(BandwidthEstimationData { estimation: 1.0 }),
        ];
        for event in events {
            assert!(CUSTOM_EVENTS.contains(&event.name()));
        }
        assert!(CONTROL_EVENTS.contains(&MediaEvent::Disconnect.name()));
    }
}
