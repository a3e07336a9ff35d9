//! Integration tests for scenario replay

mod common;

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use xapp_arbiter::{Disposition, RecordingSink, Scenario, StepReport, TracingNotifier};
use xapp_arbiter_common::{EngineConfig, EventKind};

fn disposition(report: &StepReport) -> Option<Disposition> {
    match report {
        StepReport::Submitted { disposition, .. } => Some(*disposition),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_demo_replay() {
    common::init_test_logging();
    let sink = RecordingSink::new();

    let run = Scenario::demo()
        .run(
            &EngineConfig::default(),
            Arc::new(sink.clone()),
            Arc::new(TracingNotifier),
        )
        .await
        .unwrap();

    let dispositions: Vec<_> = run.steps.iter().filter_map(disposition).collect();
    assert_eq!(
        dispositions,
        vec![
            Disposition::Applied,
            Disposition::Buffered,
            Disposition::Applied
        ]
    );
    assert!(run.dropped.is_empty());

    let conflicts = run
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ConflictDetected { .. }))
        .count();
    assert_eq!(conflicts, 1);

    let deferred: Vec<_> = run
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Applied { deferred: true, .. }))
        .collect();
    assert_eq!(deferred.len(), 1);
    let buffered_at = run
        .events
        .iter()
        .find(|e| matches!(e.kind, EventKind::Buffered { .. }))
        .map(|e| e.timestamp)
        .unwrap();
    assert_eq!(
        deferred[0].timestamp - buffered_at,
        chrono::Duration::milliseconds(5_000)
    );

    // xApp1 twice (pass-through and winner), xApp2 deferred, xApp1's last request.
    assert_eq!(sink.applied().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_replay_from_file_with_skew_and_rejected_step() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skewed.toml");
    fs::write(
        &path,
        r#"
name = "skewed"

[engine]
buffer_delay_ms = 2000

[[steps]]
action = "onboard"
at_ms = 0
agent = "xApp1"

[[steps]]
action = "submit"
at_ms = 0
agent = "xApp1"
node_id = "gnb-7"
sub_entity_id = 4
min_ratio = 1
max_ratio = 5

[[steps]]
action = "submit"
at_ms = 500
agent = "xApp2"
node_id = "gnb-7"
sub_entity_id = 4
min_ratio = 3
max_ratio = 6
timestamp_ms = -1000

[[steps]]
action = "submit"
at_ms = 600
agent = "xApp3"
node_id = "gnb-7"
sub_entity_id = 4
min_ratio = 50
max_ratio = 10
"#,
    )
    .unwrap();

    let scenario = Scenario::from_file(&path).unwrap();
    let sink = RecordingSink::new();
    let run = scenario
        .run(
            &EngineConfig::default(),
            Arc::new(sink.clone()),
            Arc::new(TracingNotifier),
        )
        .await
        .unwrap();

    // xApp2's request is stamped before xApp1's, so xApp1 is the one deferred.
    assert_eq!(disposition(&run.steps[1]), Some(Disposition::Applied));
    assert_eq!(disposition(&run.steps[2]), Some(Disposition::Applied));
    assert!(matches!(run.steps[3], StepReport::Rejected { step: 3, .. }));

    let buffered = run
        .events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::Buffered {
                request, delay_ms, ..
            } => Some((request.agent_id.to_string(), *delay_ms)),
            _ => None,
        })
        .unwrap();
    assert_eq!(buffered, ("xApp1".to_string(), 2_000));

    let applied_agents: Vec<String> = sink
        .applied()
        .iter()
        .map(|r| r.agent_id.to_string())
        .collect();
    assert_eq!(applied_agents, vec!["xApp1", "xApp2", "xApp1"]);
}

#[tokio::test(start_paused = true)]
async fn test_bundled_scenario_replays() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../scenarios/xapp_conflict.toml");
    let scenario = Scenario::from_file(path).unwrap();

    let run = scenario
        .run(
            &EngineConfig::default(),
            Arc::new(RecordingSink::new()),
            Arc::new(TracingNotifier),
        )
        .await
        .unwrap();

    assert!(run.dropped.is_empty());
    assert!(run
        .events
        .iter()
        .any(|e| matches!(e.kind, EventKind::ConflictDetected { .. })));
}

#[test]
fn test_missing_scenario_file_is_reported() {
    let result = Scenario::from_file("/nonexistent/scenario.toml");
    assert!(result.is_err());
}
