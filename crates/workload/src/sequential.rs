//! Staged generation.
//!
//! A schedule is a list of stages run in order. Payload stages generate a
//! fixed amount of one type; a `test_sync` stage asks the orchestrator to
//! send ENTER_SYNC; a `test_loop` stage jumps back to the first stage a
//! configured number of times. Stages can be limited to a set of nodes and
//! can carry a per-node TPS that overrides the governor's goal while the
//! stage runs.

use crate::factory::{FactoryConfig, GenerateError, PayloadFactory};
use crate::progress::ProgressTracker;
use crate::{Generated, PayloadGenerator};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use replaygate_types::{ControlType, NodeId, PayloadType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What a stage does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageKind {
    Payload {
        #[serde(rename = "type")]
        payload_type: PayloadType,
        size: usize,
        amount: u64,
    },
    /// Pause the cluster until every node has caught up.
    TestSync,
    /// Restart the schedule from the first stage.
    TestLoop { times: u32 },
}

/// One stage of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(flatten)]
    pub kind: StageKind,
    /// Nodes that run this stage; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeId>,
    /// TPS per node, indexed by node id. Missing entries use the goal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tps: Vec<f64>,
}

impl Stage {
    pub fn payload(payload_type: PayloadType, size: usize, amount: u64) -> Self {
        Self::from_kind(StageKind::Payload {
            payload_type,
            size,
            amount,
        })
    }

    pub fn test_sync() -> Self {
        Self::from_kind(StageKind::TestSync)
    }

    pub fn test_loop(times: u32) -> Self {
        Self::from_kind(StageKind::TestLoop { times })
    }

    fn from_kind(kind: StageKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            tps: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_tps(mut self, tps: Vec<f64>) -> Self {
        self.tps = tps;
        self
    }

    fn runs_on(&self, node: NodeId) -> bool {
        self.nodes.is_empty() || self.nodes.contains(&node)
    }

    fn tps_for(&self, node: NodeId) -> Option<f64> {
        usize::try_from(node.0)
            .ok()
            .and_then(|i| self.tps.get(i).copied())
            .filter(|t| *t > 0.0)
    }
}

/// Runs a list of stages for one node.
#[derive(Debug)]
pub struct SequentialSchedule {
    factory: PayloadFactory,
    stages: Vec<Stage>,
    rng: ChaCha8Rng,
    index: usize,
    progress: Option<ProgressTracker>,
    loops_done: u32,
    last_was_sync: bool,
    tps: Option<f64>,
    done: bool,
}

impl SequentialSchedule {
    pub fn new(config: FactoryConfig, stages: Vec<Stage>, seed: u64) -> Self {
        Self {
            factory: PayloadFactory::new(config),
            stages,
            rng: ChaCha8Rng::seed_from_u64(seed),
            index: 0,
            progress: None,
            loops_done: 0,
            last_was_sync: false,
            tps: None,
            done: false,
        }
    }

    fn node(&self) -> NodeId {
        self.factory.node()
    }

    fn advance_stage(&mut self) {
        self.index += 1;
        self.progress = None;
    }
}

impl PayloadGenerator for SequentialSchedule {
    fn next_payload(&mut self) -> Result<Generated, GenerateError> {
        let node = self.node();
        loop {
            if self.done {
                return Ok(Generated::Exhausted);
            }
            let Some(stage) = self.stages.get(self.index).cloned() else {
                info!(node = %node, stages = self.stages.len(), "Sequential schedule finished");
                self.done = true;
                self.tps = None;
                return Ok(Generated::Exhausted);
            };

            if !stage.runs_on(node) {
                info!(node = %node, stage = self.index, "Skipping stage not assigned to this node");
                self.advance_stage();
                continue;
            }

            match stage.kind {
                StageKind::TestSync => {
                    self.advance_stage();
                    if self.last_was_sync {
                        warn!(node = %node, "Sync stage directly after another sync stage skipped");
                        continue;
                    }
                    self.last_was_sync = true;
                    return Ok(Generated::Control(ControlType::EnterSync));
                }
                StageKind::TestLoop { times } => {
                    if self.loops_done < times {
                        self.loops_done += 1;
                        self.index = 0;
                        self.progress = None;
                        info!(node = %node, loop_counter = self.loops_done, "Restarting schedule");
                    } else {
                        self.advance_stage();
                    }
                    continue;
                }
                StageKind::Payload { amount: 0, payload_type, .. } => {
                    warn!(node = %node, %payload_type, "Stage amount is 0, skipped");
                    self.advance_stage();
                    continue;
                }
                StageKind::Payload {
                    payload_type,
                    size,
                    amount,
                } => {
                    if self.progress.is_none() {
                        self.tps = stage.tps_for(node);
                        self.progress = Some(ProgressTracker::new(node, payload_type, amount));
                    }
                    self.last_was_sync = false;

                    let payload = self.factory.build(payload_type, size, &mut self.rng)?;
                    if let Some(progress) = self.progress.as_mut() {
                        progress.advance();
                        if progress.is_done() {
                            self.advance_stage();
                        }
                    }
                    return Ok(Generated::Payload(payload));
                }
            }
        }
    }

    fn customized_tps(&self) -> Option<f64> {
        self.tps
    }

    fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        self.factory.control(control)
    }

    fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        self.factory.freeze(start_after_secs)
    }
}
