//! End-of-run report.

use crate::delivery::DeliveryOutcome;
use crate::engine::EngineSummary;
use crate::orchestrator::SubmitOutcome;
use replaygate_state::{ApplyStats, DivergenceSummary, TransactionCounter};
use replaygate_types::{ControlType, Hash, NodeId, PayloadCategory};
use std::time::Duration;

/// Everything one node did during a run.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: NodeId,
    pub submit: SubmitOutcome,
    pub submitted_bytes: u64,
    pub submitted_by_category: Vec<(PayloadCategory, u64)>,
    /// Applied transactions summed over all creators.
    pub applied: TransactionCounter,
    pub version: u64,
    pub entities: usize,
    /// Digest of the final entity map, comparable across nodes.
    pub entities_digest: Hash,
    pub apply: ApplyStats,
    pub divergences: DivergenceSummary,
    pub purge_runs: u64,
    pub purged_entities: u64,
    pub purge_p99: Option<Duration>,
    pub delivery: DeliveryOutcome,
    /// Log lines suppressed per error class.
    pub suppressed: Vec<(&'static str, u64)>,
}

impl NodeReport {
    /// EXIT_VALIDATION reached quorum on this node.
    pub fn validation_passed(&self) -> bool {
        self.delivery.reached(ControlType::ExitValidation)
    }
}

/// Outcome of a harness run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub divergence_threshold: u64,
    pub engine: EngineSummary,
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    /// Every node saw EXIT_VALIDATION reach quorum and none reported more
    /// divergences than the threshold.
    pub fn passed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().all(|n| {
                n.validation_passed() && n.divergences.total() <= self.divergence_threshold
            })
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == node)
    }

    pub fn total_submitted(&self) -> u64 {
        self.nodes.iter().map(|n| n.submit.submitted).sum()
    }

    pub fn total_divergences(&self) -> u64 {
        self.nodes.iter().map(|n| n.divergences.total()).sum()
    }

    /// Whether every node ended on the same entity map.
    pub fn states_agree(&self) -> bool {
        self.nodes
            .windows(2)
            .all(|pair| pair[0].entities_digest == pair[1].entities_digest)
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        println!();
        println!("=== Run Report ===");
        println!("Duration:        {:.1}s", self.elapsed.as_secs_f64());
        println!(
            "Result:          {}",
            if self.passed() { "PASSED" } else { "FAILED" }
        );
        println!(
            "Submitted:       {} ({:.1} TPS)",
            self.total_submitted(),
            self.total_submitted() as f64 / secs
        );
        println!(
            "Rounds:          {} ({} events, {} transactions, {} rejected)",
            self.engine.rounds, self.engine.events, self.engine.transactions, self.engine.rejected
        );
        if let (Some(p50), Some(p99)) = (self.engine.latency_p50, self.engine.latency_p99) {
            println!(
                "Latency:         p50 {:.1}ms, p99 {:.1}ms",
                p50.as_secs_f64() * 1000.0,
                p99.as_secs_f64() * 1000.0
            );
        }
        println!(
            "State agreement: {}",
            if self.states_agree() { "yes" } else { "NO" }
        );
        println!(
            "Divergences:     {} (threshold {} per node)",
            self.total_divergences(),
            self.divergence_threshold
        );

        for node in &self.nodes {
            println!();
            println!(
                "--- Node {} {}---",
                node.node,
                if node.node.is_leader() { "(leader) " } else { "" }
            );
            println!(
                "  submitted {} ({} bytes, {} vetoed), applied {} in {} rounds",
                node.submit.submitted,
                node.submitted_bytes,
                node.submit.vetoed,
                node.applied.total(),
                node.apply.rounds
            );
            for (category, count) in &node.submitted_by_category {
                println!(
                    "    {:<10} {:>8} ({:.1}/s)",
                    category.to_string(),
                    count,
                    *count as f64 / secs
                );
            }
            println!(
                "  version {}, {} entities, digest {}",
                node.version, node.entities, node.entities_digest
            );
            println!(
                "  creates {}, deletes {}, purges {} ({} entities{})",
                node.applied.creates(),
                node.applied.deletes(),
                node.purge_runs,
                node.purged_entities,
                node.purge_p99
                    .map(|p| format!(", p99 {}us", p.as_micros()))
                    .unwrap_or_default()
            );
            println!(
                "  divergences: invalid_sig {}, handle_failed {}, value_mismatch {}, ambiguous_recreate {}",
                node.divergences.invalid_sig,
                node.divergences.handle_failed,
                node.divergences.value_mismatch,
                node.divergences.ambiguous_recreate
            );
            println!(
                "  errors: decode {}, timestamp {}, seq {}, system_sig {}",
                node.apply.decode_errors,
                node.apply.timestamp_violations,
                node.apply.seq_mismatches,
                node.apply.system_invalid_signatures
            );
            let phases: Vec<String> = node
                .delivery
                .quorums
                .iter()
                .map(|(kind, _)| kind.to_string())
                .collect();
            println!("  quorums: [{}]", phases.join(", "));
            println!(
                "  exports {}, reconnects {}, skipped rounds {}, throttled {:.1}s",
                node.delivery.exports.len(),
                node.delivery.reconnects,
                node.delivery.skipped_rounds,
                node.delivery.throttled.as_secs_f64()
            );
            for (class, count) in &node.suppressed {
                println!("  suppressed {count} more '{class}' log lines");
            }
        }
        println!();
    }
}
