//! End-to-end runs of a small in-process cluster.

use replaygate_harness::{
    Cluster, EngineConfig, GeneratorConfig, HarnessConfig, SubmitOptions, WorkloadConfig,
};
use replaygate_state::{load_expected_state, ExportedState};
use replaygate_types::{ControlType, NodeId, PayloadType};
use replaygate_workload::Stage;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn test_config(export_dir: &Path, workload: WorkloadConfig) -> HarnessConfig {
    HarnessConfig::default()
        .with_nodes(4)
        .with_export_dir(export_dir)
        .with_engine(EngineConfig::default().with_round_interval(Duration::from_millis(10)))
        .with_workload(workload)
        .with_submit(SubmitOptions {
            sleep_after_test_ms: 200,
            ..Default::default()
        })
}

/// Earliest export of every node.
fn first_exports(dir: &Path) -> BTreeMap<NodeId, ExportedState> {
    let mut first: BTreeMap<NodeId, ExportedState> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let exported = load_expected_state(&entry.unwrap().path()).unwrap();
        match first.get(&exported.node) {
            Some(existing) if existing.timestamp <= exported.timestamp => {}
            _ => {
                first.insert(exported.node, exported);
            }
        }
    }
    first
}

#[test]
fn test_fixed_workload_validates_and_exports_agree() {
    let dir = tempfile::tempdir().unwrap();
    let workload = WorkloadConfig::default()
        .with_generator(GeneratorConfig::Fixed {
            payload_type: PayloadType::EntityCreate,
            size: 100,
        })
        .with_total_per_node(Some(20));
    let cluster = Cluster::new(test_config(dir.path(), workload)).unwrap();

    let report = cluster.run_for(Duration::from_secs(20)).unwrap();

    assert!(report.passed(), "every node should reach EXIT_VALIDATION");
    assert_eq!(report.total_submitted(), 80);
    assert_eq!(report.total_divergences(), 0);
    assert!(report.states_agree(), "replicas should end on the same entities");
    for node in &report.nodes {
        assert_eq!(node.submit.submitted, 20);
        assert!(node.delivery.reached(ControlType::EnterValidation));
        assert_eq!(node.entities, 80, "every create lands on every replica");
    }

    let exports = first_exports(dir.path());
    assert_eq!(exports.len(), 4, "one validation export per node");
    let reference = &exports[&NodeId(0)];
    assert!(!reference.entities.is_empty());
    for exported in exports.values() {
        assert_eq!(exported.timestamp, reference.timestamp);
        assert_eq!(exported.entities, reference.entities);
    }
}

#[test]
fn test_sequential_schedule_runs_sync_phase() {
    let dir = tempfile::tempdir().unwrap();
    let workload = WorkloadConfig::default().with_generator(GeneratorConfig::Sequential {
        stages: vec![
            Stage::payload(PayloadType::EntityCreate, 100, 5),
            Stage::test_sync(),
            Stage::payload(PayloadType::Bytes, 64, 5),
        ],
    });
    let cluster = Cluster::new(test_config(dir.path(), workload)).unwrap();

    let report = cluster.run_for(Duration::from_secs(20)).unwrap();

    assert!(report.passed());
    for node in &report.nodes {
        assert!(node.delivery.reached(ControlType::EnterSync));
        assert!(node.delivery.reached(ControlType::ExitSync));
        assert_eq!(node.submit.submitted, 10);
        assert_eq!(node.entities, 20);
    }
}
