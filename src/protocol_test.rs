use super::*;
use serde_json::json;

#[test]
fn event_serializes_flat() {
    let mut data = Data::new();
    data.insert("vehicle_id".into(), json!(7));
    data.insert("lat".into(), json!(40.7));
    let envelope = Envelope::event("vehicle_location_update", data);

    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["action"], "vehicle_location_update");
    assert_eq!(value["vehicle_id"], 7);
    assert_eq!(value["lat"], 40.7);
    assert!(value.get("data").is_none());
}

#[test]
fn action_error_shape() {
    let envelope = Envelope::error("Unauthorized");
    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["action"], "error");
    assert_eq!(value["message"], "Unauthorized");
}

#[test]
fn protocol_error_shape() {
    let envelope = Envelope::protocol_error("Unknown action: frobnicate");
    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["error"], "Unknown action: frobnicate");
    assert!(value.get("action").is_none());
}

#[test]
fn envelope_round_trip() {
    let mut data = Data::new();
    data.insert("vehicle_id".into(), json!(3));
    let original = Envelope::event("vehicle_subscribed", data);

    let json = serde_json::to_string(&original).expect("serialize");
    let restored: Envelope = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, original);

    let err: Envelope = serde_json::from_str(r#"{"action":"error","message":"Invalid type"}"#)
        .expect("deserialize");
    assert_eq!(err, Envelope::error("Invalid type"));

    let proto: Envelope =
        serde_json::from_str(r#"{"error":"Invalid JSON"}"#).expect("deserialize");
    assert_eq!(proto, Envelope::protocol_error("Invalid JSON"));
}

#[test]
fn parse_extracts_action_and_args() {
    let req = ActionRequest::parse(r#"{"action":"update_unit_location","vehicle_id":7,"lat":1.0,"lng":2.0}"#)
        .expect("parse");
    assert_eq!(req.action, "update_unit_location");
    assert!(req.to_user_id.is_none());
    assert_eq!(req.data.get("vehicle_id"), Some(&json!(7)));
    assert!(req.data.get("action").is_none());
}

#[test]
fn parse_strips_to_user_id() {
    let req = ActionRequest::parse(r#"{"action":"send_message","message":"hi","to_user_id":42}"#)
        .expect("parse");
    assert_eq!(req.to_user_id, Some(42));
    assert!(req.data.get("to_user_id").is_none());
}

#[test]
fn parse_rejects_bad_input() {
    assert_eq!(ActionRequest::parse("not json").unwrap_err(), ParseError::InvalidJson);
    assert_eq!(ActionRequest::parse("[1,2]").unwrap_err(), ParseError::InvalidJson);
    assert_eq!(ActionRequest::parse(r#"{"foo":1}"#).unwrap_err(), ParseError::NoAction);
    assert_eq!(ActionRequest::parse(r#"{"action":5}"#).unwrap_err(), ParseError::NoAction);
}

#[test]
fn parse_error_messages_are_wire_format() {
    assert_eq!(ParseError::InvalidJson.to_string(), "Invalid JSON");
    assert_eq!(ParseError::NoAction.to_string(), "No action specified");
}
