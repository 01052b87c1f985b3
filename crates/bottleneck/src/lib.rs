//! Synthetic bottleneck.
//!
//! Slows down the delivery path of selected nodes so they fall behind the
//! rest of the cluster and have to reconnect. Each call to
//! [`SyntheticBottleneck::throttle_if_needed`] sleeps one increment on the
//! caller's thread until the node's sleep budget is spent. A reconnect
//! refills the budget, so a node is pushed behind again until it has
//! reconnected `max_reconnects` times.
//!
//! ```text
//!   warm-up      increments (budget)       reconnect     increments ...
//! |---------|--z--z--z--z--z--z--|-------------R-------|--z--z--z--...
//! ```

use parking_lot::Mutex;
use replaygate_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Which nodes to slow down and by how much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleneckConfig {
    /// Nodes to throttle. Empty disables the bottleneck.
    pub targets: Vec<NodeId>,
    /// No throttling before this much time has passed since start.
    pub warm_up_ms: u64,
    /// Sleep per call.
    pub sleep_increment_ms: u64,
    /// Total sleep allowed between reconnects.
    pub sleep_budget_ms: u64,
    /// Stop throttling a node once it has reconnected this many times.
    pub max_reconnects: u32,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            warm_up_ms: 60_000,
            sleep_increment_ms: 100,
            sleep_budget_ms: 10_000,
            max_reconnects: 1,
        }
    }
}

impl BottleneckConfig {
    pub fn with_targets(mut self, targets: Vec<NodeId>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up_ms = millis(warm_up);
        self
    }

    pub fn with_sleep_increment(mut self, increment: Duration) -> Self {
        self.sleep_increment_ms = millis(increment);
        self
    }

    pub fn with_sleep_budget(mut self, budget: Duration) -> Self {
        self.sleep_budget_ms = millis(budget);
        self
    }

    pub fn with_max_reconnects(mut self, max_reconnects: u32) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.targets.is_empty() && self.sleep_increment_ms > 0 && self.sleep_budget_ms > 0
    }

    fn warm_up(&self) -> Duration {
        Duration::from_millis(self.warm_up_ms)
    }

    fn increment(&self) -> Duration {
        Duration::from_millis(self.sleep_increment_ms)
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.sleep_budget_ms)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-node throttle bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
struct NodeThrottle {
    slept: Duration,
    reconnects: u32,
    exhausted_logged: bool,
}

/// Deliberate throttling of targeted nodes.
#[derive(Debug)]
pub struct SyntheticBottleneck {
    config: BottleneckConfig,
    started: Instant,
    nodes: Mutex<HashMap<NodeId, NodeThrottle>>,
}

impl SyntheticBottleneck {
    pub fn new(config: BottleneckConfig) -> Self {
        Self::started_at(config, Instant::now())
    }

    /// Bottleneck whose warm-up is measured from `started`.
    pub fn started_at(config: BottleneckConfig, started: Instant) -> Self {
        if config.is_enabled() {
            info!(
                targets = ?config.targets,
                warm_up_ms = config.warm_up_ms,
                budget_ms = config.sleep_budget_ms,
                max_reconnects = config.max_reconnects,
                "Synthetic bottleneck configured"
            );
        }
        Self {
            config,
            started,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BottleneckConfig {
        &self.config
    }

    pub fn is_target(&self, node: NodeId) -> bool {
        self.config.is_enabled() && self.config.targets.contains(&node)
    }

    /// Sleep one increment if `node` is a target with budget left.
    ///
    /// Returns how long the caller was blocked.
    pub fn throttle_if_needed(&self, node: NodeId) -> Duration {
        let sleep = self.plan(node, Instant::now());
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
        sleep
    }

    /// Charge and return the sleep `node` owes at `now` without sleeping.
    pub fn plan(&self, node: NodeId, now: Instant) -> Duration {
        if !self.is_target(node) {
            return Duration::ZERO;
        }
        if now.saturating_duration_since(self.started) < self.config.warm_up() {
            return Duration::ZERO;
        }

        let mut nodes = self.nodes.lock();
        let state = nodes.entry(node).or_default();
        if state.reconnects >= self.config.max_reconnects {
            return Duration::ZERO;
        }

        let remaining = self.config.budget().saturating_sub(state.slept);
        if remaining.is_zero() {
            if !state.exhausted_logged {
                state.exhausted_logged = true;
                info!(node = %node, reconnects = state.reconnects, "Bottleneck sleep budget exhausted");
            }
            return Duration::ZERO;
        }

        let sleep = self.config.increment().min(remaining);
        if state.slept.is_zero() {
            info!(node = %node, reconnects = state.reconnects, "Bottleneck engaged");
        }
        state.slept += sleep;
        debug!(node = %node, sleep_ms = sleep.as_millis() as u64, slept_ms = state.slept.as_millis() as u64, "Throttling");
        sleep
    }

    /// Refill the node's sleep budget after it reconnected.
    pub fn register_reconnect(&self, node: NodeId) {
        if !self.is_target(node) {
            return;
        }
        let mut nodes = self.nodes.lock();
        let state = nodes.entry(node).or_default();
        state.reconnects += 1;
        state.slept = Duration::ZERO;
        state.exhausted_logged = false;
        info!(
            node = %node,
            reconnects = state.reconnects,
            max_reconnects = self.config.max_reconnects,
            "Bottleneck target reconnected"
        );
    }

    pub fn reconnects(&self, node: NodeId) -> u32 {
        self.nodes.lock().get(&node).map_or(0, |s| s.reconnects)
    }

    /// Sleep charged to `node` since its last reconnect.
    pub fn slept(&self, node: NodeId) -> Duration {
        self.nodes.lock().get(&node).map_or(Duration::ZERO, |s| s.slept)
    }
}
