//! Harness configuration.
//!
//! One file describes the whole in-process cluster: roster, ordering engine,
//! workload, governor, submission options, replay settings and the
//! synthetic bottleneck. Files are TOML or JSON, chosen by extension.

use crate::engine::EngineConfig;
use replaygate_bottleneck::BottleneckConfig;
use replaygate_governor::{GovernorConfig, GovernorConfigError, SubmitGoal};
use replaygate_state::DEFAULT_LOG_THRESHOLD;
use replaygate_types::{
    NodeId, PayloadCategory, PayloadType, Roster, RosterEntry, RosterError, StaticRoster,
};
use replaygate_workload::{
    DistributionBucket, DistributionError, FactoryConfig, InterleavedGenerator, KeySelection,
    PayloadDistribution, PayloadGenerator, PayloadMode, SequentialSchedule, Stage, StageKind,
    TreeMix, TreePayloadGenerator, WeightedPayloadGenerator,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest accepted per-node submission queue.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// Largest accepted number of transactions one node contributes to a round.
pub const MAX_EVENT_TRANSACTIONS: usize = 100_000;

/// Configuration errors. All of them are reported before anything starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported config format {}; use .toml or .json", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid roster: {0}")]
    Roster(#[from] RosterError),

    #[error("node {0} is not in the roster")]
    UnknownNode(NodeId),

    #[error("invalid distribution: {0}")]
    Distribution(#[from] DistributionError),

    #[error("{0} payloads cannot be generated")]
    UnsupportedPayload(PayloadType),

    #[error("interleaved distribution must not contain tree payloads")]
    InterleavedTreeOverlap,

    #[error("{name} must be within [0, 1], got {value}")]
    InvalidRatio { name: &'static str, value: f64 },

    #[error("invalid governor settings: {0}")]
    Governor(#[from] GovernorConfigError),

    #[error("{0} must be positive")]
    Zero(&'static str),

    #[error("{name} of {value} exceeds the limit of {limit}")]
    ResourceLimit {
        name: &'static str,
        value: u64,
        limit: u64,
    },
}

// ═══════════════════════════════════════════════════════════════════════════
// Workload
// ═══════════════════════════════════════════════════════════════════════════

/// Which generator each node runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Fixed {
        #[serde(rename = "type")]
        payload_type: PayloadType,
        size: usize,
    },
    Weighted {
        distribution: PayloadDistribution,
    },
    Sequential {
        stages: Vec<Stage>,
    },
    Tree {
        #[serde(default)]
        mix: TreeMix,
    },
    /// Lifecycle payloads from `distribution`, tree payloads from `tree`,
    /// picking the lifecycle side with probability `ratio`.
    Interleaved {
        distribution: PayloadDistribution,
        #[serde(default)]
        tree: TreeMix,
        ratio: f64,
    },
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Fixed {
            payload_type: PayloadType::EntityAssorted,
            size: 100,
        }
    }
}

/// Payload generation settings, shared by all nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub generator: GeneratorConfig,
    /// Sign envelopes.
    pub sign: bool,
    pub invalid_sig_ratio: f64,
    /// Lease on created entities; expired entities are purged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_secs: Option<u64>,
    pub selection: KeySelection,
    /// Payloads per node for fixed, weighted and interleaved generators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_per_node: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            sign: true,
            invalid_sig_ratio: 0.0,
            lease_secs: None,
            selection: KeySelection::default(),
            total_per_node: Some(1_000),
        }
    }
}

impl WorkloadConfig {
    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_invalid_sig_ratio(mut self, ratio: f64) -> Self {
        self.invalid_sig_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_total_per_node(mut self, total: Option<u64>) -> Self {
        self.total_per_node = total;
        self
    }

    pub fn with_lease_secs(mut self, lease_secs: Option<u64>) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    fn factory_config(&self, node: NodeId) -> FactoryConfig {
        FactoryConfig::new(node)
            .with_signing(self.sign)
            .with_invalid_sig_ratio(self.invalid_sig_ratio)
            .with_lease_secs(self.lease_secs)
            .with_selection(self.selection)
    }

    /// Build the generator for `node`.
    pub fn build_generator(&self, node: NodeId, seed: u64) -> Box<dyn PayloadGenerator> {
        let factory = self.factory_config(node);
        let limited = |generator: WeightedPayloadGenerator| match self.total_per_node {
            Some(total) => generator.with_limit(total),
            None => generator,
        };
        match &self.generator {
            GeneratorConfig::Fixed { payload_type, size } => {
                let mode = PayloadMode::Fixed {
                    payload_type: *payload_type,
                    size: *size,
                };
                Box::new(limited(WeightedPayloadGenerator::new(factory, mode, seed)))
            }
            GeneratorConfig::Weighted { distribution } => {
                let mode = PayloadMode::Weighted {
                    distribution: distribution.clone(),
                };
                Box::new(limited(WeightedPayloadGenerator::new(factory, mode, seed)))
            }
            GeneratorConfig::Sequential { stages } => {
                Box::new(SequentialSchedule::new(factory, stages.clone(), seed))
            }
            GeneratorConfig::Tree { mix } => {
                Box::new(TreePayloadGenerator::new(factory, *mix, seed))
            }
            GeneratorConfig::Interleaved {
                distribution,
                tree,
                ratio,
            } => {
                let mode = PayloadMode::Weighted {
                    distribution: distribution.clone(),
                };
                let lifecycle = limited(WeightedPayloadGenerator::new(factory.clone(), mode, seed));
                let tree = TreePayloadGenerator::new(factory, *tree, seed.rotate_left(17));
                Box::new(InterleavedGenerator::new(
                    lifecycle,
                    tree,
                    *ratio,
                    seed.rotate_left(31),
                ))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("workload.invalid_sig_ratio", self.invalid_sig_ratio)?;
        match &self.generator {
            GeneratorConfig::Fixed { payload_type, .. } => check_generatable(*payload_type)?,
            GeneratorConfig::Weighted { distribution } => distribution.validate()?,
            GeneratorConfig::Sequential { stages } => {
                for stage in stages {
                    if let StageKind::Payload { payload_type, .. } = stage.kind {
                        check_generatable(payload_type)?;
                    }
                    for tps in &stage.tps {
                        if !tps.is_finite() || *tps < 0.0 {
                            return Err(ConfigError::Zero("stage tps"));
                        }
                    }
                }
            }
            GeneratorConfig::Tree { mix } => check_ratio("tree.create_ratio", mix.create_ratio)?,
            GeneratorConfig::Interleaved {
                distribution,
                tree,
                ratio,
            } => {
                distribution.validate()?;
                if distribution
                    .buckets()
                    .iter()
                    .any(|b| b.payload_type.category() == PayloadCategory::Tree)
                {
                    return Err(ConfigError::InterleavedTreeOverlap);
                }
                check_ratio("tree.create_ratio", tree.create_ratio)?;
                check_ratio("interleaved.ratio", *ratio)?;
            }
        }
        Ok(())
    }
}

fn check_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRatio { name, value })
    }
}

fn check_generatable(payload_type: PayloadType) -> Result<(), ConfigError> {
    match payload_type {
        PayloadType::Control | PayloadType::Freeze => {
            Err(ConfigError::UnsupportedPayload(payload_type))
        }
        _ => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Submission and replay
// ═══════════════════════════════════════════════════════════════════════════

/// Who submits, when, and how the test ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Global switch for payload submission.
    pub allow_run_submit: bool,
    /// Stagger start times: node at roster position i waits i intervals.
    pub submit_in_turn: bool,
    pub in_turn_interval_ms: u64,
    /// Only this node submits payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_node_submit: Option<NodeId>,
    /// Wait after a vetoed submission before retrying the same payload.
    pub retry_delay_ms: u64,
    /// Keep running this long after EXIT_VALIDATION reached quorum.
    pub sleep_after_test_ms: u64,
    /// Freeze start, relative to the consensus time of the freeze transaction.
    pub freeze_after_secs: u64,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            allow_run_submit: true,
            submit_in_turn: false,
            in_turn_interval_ms: 1_000,
            single_node_submit: None,
            retry_delay_ms: 50,
            sleep_after_test_ms: 2_000,
            freeze_after_secs: 5,
        }
    }
}

impl SubmitOptions {
    /// Whether `node` generates payloads at all.
    pub fn may_submit(&self, node: NodeId) -> bool {
        self.allow_run_submit && self.single_node_submit.map_or(true, |only| only == node)
    }

    /// Start delay of the node at roster position `index`.
    pub fn start_delay(&self, index: usize) -> Duration {
        if self.submit_in_turn {
            Duration::from_millis(self.in_turn_interval_ms.saturating_mul(index as u64))
        } else {
            Duration::ZERO
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn sleep_after_test(&self) -> Duration {
        Duration::from_millis(self.sleep_after_test_ms)
    }
}

/// Settings for each node's delivery worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Lifetime of records appended to queue entities.
    pub record_ttl_secs: u64,
    /// Occurrences logged per error class before suppression.
    pub log_threshold: u64,
    /// Let control types reach quorum again after firing.
    pub auto_reset: bool,
    /// Upper bound of the random delay before each round; 0 disables it.
    pub random_delay_ms: u64,
    /// Queued rounds after which a node counts as behind and reconnects.
    pub reconnect_backlog: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            record_ttl_secs: 60,
            log_threshold: DEFAULT_LOG_THRESHOLD,
            auto_reset: false,
            random_delay_ms: 0,
            reconnect_backlog: 64,
        }
    }
}

impl ReplayConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn random_delay(&self) -> Duration {
        Duration::from_millis(self.random_delay_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

/// Complete configuration of a harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub roster: Vec<RosterEntry>,
    pub seed: u64,
    /// Directory receiving expected-state exports.
    pub export_dir: PathBuf,
    /// Most divergences a node may report for the run to pass.
    pub divergence_threshold: u64,
    pub engine: EngineConfig,
    pub workload: WorkloadConfig,
    pub governor: GovernorConfig,
    pub submit: SubmitOptions,
    pub replay: ReplayConfig,
    pub bottleneck: BottleneckConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            roster: uniform_roster(4),
            seed: 42,
            export_dir: PathBuf::from("expected_state"),
            divergence_threshold: 0,
            engine: EngineConfig::default(),
            workload: WorkloadConfig::default(),
            governor: GovernorConfig::default(),
            submit: SubmitOptions::default(),
            replay: ReplayConfig::default(),
            bottleneck: BottleneckConfig::default(),
        }
    }
}

fn uniform_roster(count: u64) -> Vec<RosterEntry> {
    (0..count)
        .map(|i| RosterEntry {
            id: NodeId(i),
            weight: 1,
        })
        .collect()
}

impl HarnessConfig {
    /// Read a config file. `.toml` and `.json` are accepted.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            }),
            Some("json") => serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            }),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// A small weighted-workload config, printed by `sample-config`.
    pub fn sample() -> Self {
        let distribution = PayloadDistribution::new(vec![
            DistributionBucket::new(PayloadType::EntityCreate, 100, 30),
            DistributionBucket::new(PayloadType::EntityTransfer, 100, 30),
            DistributionBucket::new(PayloadType::EntityAssorted, 200, 30),
            DistributionBucket::new(PayloadType::Bytes, 64, 10),
        ])
        .unwrap_or_default();
        Self::default()
            .with_workload(
                WorkloadConfig::default()
                    .with_generator(GeneratorConfig::Weighted { distribution })
                    .with_total_per_node(Some(500)),
            )
            .with_governor(
                GovernorConfig::default().with_goal(SubmitGoal::transactions_per_sec(200.0)),
            )
    }

    pub fn with_nodes(mut self, count: u64) -> Self {
        self.roster = uniform_roster(count);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_submit(mut self, submit: SubmitOptions) -> Self {
        self.submit = submit;
        self
    }

    pub fn with_bottleneck(mut self, bottleneck: BottleneckConfig) -> Self {
        self.bottleneck = bottleneck;
        self
    }

    /// Build the roster described by the config.
    pub fn build_roster(&self) -> Result<StaticRoster, ConfigError> {
        Ok(StaticRoster::new(&self.roster)?)
    }

    /// Seed of the generator on `node`.
    pub fn node_seed(&self, node: NodeId) -> u64 {
        self.seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(node.0)
    }

    /// Reject anything that cannot run or would grow without bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let roster = self.build_roster()?;
        let members: HashSet<NodeId> = self.roster.iter().map(|e| e.id).collect();
        let known = |node: NodeId| {
            if members.contains(&node) {
                Ok(())
            } else {
                Err(ConfigError::UnknownNode(node))
            }
        };
        if let Some(node) = self.submit.single_node_submit {
            known(node)?;
        }
        for node in &self.bottleneck.targets {
            known(*node)?;
        }
        if self.bottleneck.is_enabled() && self.bottleneck.targets.len() >= roster.size() {
            // Reconnect needs at least one healthy peer to copy from.
            return Err(ConfigError::ResourceLimit {
                name: "bottleneck.targets",
                value: self.bottleneck.targets.len() as u64,
                limit: roster.size() as u64 - 1,
            });
        }

        self.engine.validate()?;
        self.workload.validate()?;
        self.governor.validate()?;

        if self.submit.retry_delay_ms == 0 {
            return Err(ConfigError::Zero("submit.retry_delay_ms"));
        }
        if self.replay.reconnect_backlog == 0 {
            return Err(ConfigError::Zero("replay.reconnect_backlog"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_and_sample_are_valid() {
        HarnessConfig::default().validate().unwrap();
        HarnessConfig::sample().validate().unwrap();
    }

    #[test]
    fn test_roster_errors() {
        let mut config = HarnessConfig::default();
        config.roster.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Roster(RosterError::Empty))
        ));

        let mut config = HarnessConfig::default();
        config.roster[1].id = NodeId(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Roster(RosterError::DuplicateNode(NodeId(0))))
        ));

        let mut config = HarnessConfig::default();
        for entry in &mut config.roster {
            entry.weight = 0;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Roster(RosterError::ZeroWeight))
        ));
    }

    #[test]
    fn test_unknown_nodes_rejected() {
        let mut config = HarnessConfig::default();
        config.submit.single_node_submit = Some(NodeId(9));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownNode(NodeId(9)))));

        let config = HarnessConfig::default()
            .with_bottleneck(BottleneckConfig::default().with_targets(vec![NodeId(7)]));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownNode(NodeId(7)))));
    }

    #[test]
    fn test_every_node_throttled_is_rejected() {
        let config = HarnessConfig::default().with_nodes(2).with_bottleneck(
            BottleneckConfig::default().with_targets(vec![NodeId(0), NodeId(1)]),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ResourceLimit { name: "bottleneck.targets", .. })
        ));
    }

    #[test]
    fn test_workload_errors() {
        let mut config = HarnessConfig::default();
        config.workload.invalid_sig_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRatio { .. })));

        let config = HarnessConfig::default().with_workload(WorkloadConfig::default().with_generator(
            GeneratorConfig::Fixed {
                payload_type: PayloadType::Freeze,
                size: 0,
            },
        ));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedPayload(PayloadType::Freeze))
        ));

        let distribution = PayloadDistribution::new(vec![DistributionBucket::new(
            PayloadType::TreeCreate,
            10,
            50,
        )])
        .unwrap();
        let config = HarnessConfig::default().with_workload(WorkloadConfig::default().with_generator(
            GeneratorConfig::Interleaved {
                distribution,
                tree: TreeMix::default(),
                ratio: 0.5,
            },
        ));
        assert!(matches!(config.validate(), Err(ConfigError::InterleavedTreeOverlap)));
    }

    #[test]
    fn test_unbounded_queue_rejected() {
        let mut config = HarnessConfig::default();
        config.engine.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));

        config.engine.queue_capacity = MAX_QUEUE_CAPACITY + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ResourceLimit { name: "engine.queue_capacity", .. })
        ));
    }

    #[test]
    fn test_load_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("run.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(
            file,
            r#"
seed = 7
divergence_threshold = 2

[[roster]]
id = 0

[[roster]]
id = 1
weight = 3

[workload]
total_per_node = 50

[workload.generator]
kind = "weighted"
distribution = [
    {{ type = "ENTITY_CREATE", size = 100, weight = 60 }},
    {{ type = "BYTES", size = 10, weight = 40 }},
]

[governor.goal]
metric = "transactions_per_sec"
threshold = 100.0
"#
        )
        .unwrap();
        let config = HarnessConfig::load(&toml_path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.roster[1].weight, 3);
        assert_eq!(config.roster[0].weight, 1, "weight defaults to 1");
        assert_eq!(config.workload.total_per_node, Some(50));
        assert!(matches!(config.workload.generator, GeneratorConfig::Weighted { .. }));
        config.validate().unwrap();

        let json_path = dir.path().join("run.json");
        std::fs::write(
            &json_path,
            r#"{"roster": [{"id": 0}, {"id": 1}, {"id": 2}],
                "workload": {"generator": {"kind": "sequential", "stages": [
                    {"stage": "payload", "type": "TREE_CREATE", "size": 50, "amount": 5},
                    {"stage": "test_sync"}
                ]}}}"#,
        )
        .unwrap();
        let config = HarnessConfig::load(&json_path).unwrap();
        assert_eq!(config.roster.len(), 3);
        config.validate().unwrap();

        let yaml_path = dir.path().join("run.yaml");
        std::fs::write(&yaml_path, "seed: 1").unwrap();
        assert!(matches!(
            HarnessConfig::load(&yaml_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_sample_round_trips_through_toml() {
        let sample = HarnessConfig::sample();
        let text = toml::to_string_pretty(&sample).unwrap();
        let parsed: HarnessConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn test_submit_options() {
        let options = SubmitOptions {
            submit_in_turn: true,
            in_turn_interval_ms: 500,
            single_node_submit: Some(NodeId(2)),
            ..Default::default()
        };
        assert_eq!(options.start_delay(3), Duration::from_millis(1_500));
        assert!(options.may_submit(NodeId(2)));
        assert!(!options.may_submit(NodeId(0)));

        let off = SubmitOptions {
            allow_run_submit: false,
            ..Default::default()
        };
        assert!(!off.may_submit(NodeId(0)));
    }

    #[test]
    fn test_generators_build_for_every_kind() {
        let distribution = PayloadDistribution::new(vec![DistributionBucket::new(
            PayloadType::EntityCreate,
            10,
            100,
        )])
        .unwrap();
        let kinds = vec![
            GeneratorConfig::default(),
            GeneratorConfig::Weighted {
                distribution: distribution.clone(),
            },
            GeneratorConfig::Sequential {
                stages: vec![Stage::payload(PayloadType::Dummy, 0, 1)],
            },
            GeneratorConfig::Tree {
                mix: TreeMix::default(),
            },
            GeneratorConfig::Interleaved {
                distribution,
                tree: TreeMix::default(),
                ratio: 0.5,
            },
        ];
        for kind in kinds {
            let workload = WorkloadConfig::default().with_generator(kind.clone());
            let mut generator = workload.build_generator(NodeId(1), 42);
            let generated = generator.next_payload().unwrap();
            assert!(generated.into_payload().is_some(), "{kind:?} produced nothing");
        }
    }
}
