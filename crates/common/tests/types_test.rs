use chrono::{TimeZone, Utc};
use xapp_arbiter_common::*;

#[test]
fn test_ratio_bounds_accepts_full_range() {
    let bounds = RatioBounds::new(0, i32::from(MAX_RATIO)).unwrap();
    assert_eq!(bounds.min(), 0);
    assert_eq!(bounds.max(), 100);

    let point = RatioBounds::new(12, 12).unwrap();
    assert_eq!(point.min(), point.max());
}

#[test]
fn test_ratio_bounds_rejects_invalid_ranges() {
    for (min, max) in [(6, 5), (-1, 5), (0, 101), (101, 101)] {
        match RatioBounds::new(min, max) {
            Err(ArbiterError::InvalidRange { min: m, max: x }) => {
                assert_eq!((m, x), (min, max));
            }
            other => panic!("{}..{} gave {:?}", min, max, other),
        }
    }
}

#[test]
fn test_ratio_bounds_deserialization_is_validated() {
    let bounds: RatioBounds = serde_json::from_str(r#"{"min": 3, "max": 6}"#).unwrap();
    assert_eq!(bounds, RatioBounds::new(3, 6).unwrap());

    let inverted = serde_json::from_str::<RatioBounds>(r#"{"min": 9, "max": 2}"#);
    assert!(inverted.unwrap_err().to_string().contains("9"));
    assert!(serde_json::from_str::<RatioBounds>(r#"{"min": 0, "max": 400}"#).is_err());

    let request = r#"{
        "id": 1,
        "agent_id": "xApp1",
        "target": {"node_id": "gnb-1", "sub_entity_id": 0},
        "bounds": {"min": 50, "max": 10},
        "timestamp": "2024-01-01T00:00:00Z"
    }"#;
    assert!(serde_json::from_str::<Request>(request).is_err());
}

#[test]
fn test_agent_id_parse_rejects_blank() {
    assert!(AgentId::parse("xApp1").is_ok());
    assert!(matches!(AgentId::parse(""), Err(ArbiterError::InvalidAgentId(_))));
    assert!(matches!(AgentId::parse(" \t"), Err(ArbiterError::InvalidAgentId(_))));
}

#[test]
fn test_display_formats() {
    let target = TargetKey::new("gnbd_001_001_00019b_0", 0);
    assert_eq!(target.to_string(), "gnbd_001_001_00019b_0/ue0");
    assert_eq!(RatioBounds::new(1, 5).unwrap().to_string(), "[1, 5]");
    assert_eq!(RequestId(7).to_string(), "#7");

    let key = PendingKey {
        agent_id: AgentId::from("xApp2"),
        target,
    };
    assert_eq!(key.to_string(), "xApp2@gnbd_001_001_00019b_0/ue0");
}

#[test]
fn test_request_pending_key_and_serialization() {
    let submission = Submission::new(
        AgentId::from("xApp1"),
        TargetKey::new("gnb-1", 3),
        10,
        20,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let request = Request::from_submission(RequestId(1), submission);

    let key = request.pending_key();
    assert_eq!(key.agent_id, request.agent_id);
    assert_eq!(key.target, request.target);

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["agent_id"], "xApp1");
    assert_eq!(value["bounds"]["min"], 10);
    assert_eq!(value["target"]["node_id"], "gnb-1");
}

#[test]
fn test_event_kind_serialization_is_tagged() {
    let event = EngineEvent::new(
        EventKind::ConflictDetected {
            first_agent: AgentId::from("xApp1"),
            second_agent: AgentId::from("xApp2"),
            target: TargetKey::new("gnb-1", 0),
        },
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap(),
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["kind"]["type"], "conflict_detected");
    assert_eq!(value["kind"]["second_agent"], "xApp2");
    assert_eq!(event.kind.to_string(), "ConflictDetected");
    assert!(event.kind.request().is_none());

    let back: EngineEvent = serde_json::from_value(value).unwrap();
    assert_eq!(back, event);
}

#[test]
fn test_error_classification() {
    assert!(ArbiterError::UnknownAgent("xApp9".into()).is_caller_error());
    assert!(!ArbiterError::EngineStopped.is_caller_error());
    assert!(SinkError::Timeout { millis: 10 }.is_retryable());
    assert!(!SinkError::rejected("quota exceeded").is_retryable());
}
