//! In-process cluster: one engine, one delivery worker and one orchestrator
//! per node, all on named threads.

use crate::config::{ConfigError, HarnessConfig};
use crate::delivery::{DeliveryWorker, FinishedDelivery, PeerArenas};
use crate::engine::LocalOrderingEngine;
use crate::error::HarnessError;
use crate::orchestrator::{Orchestrator, SubmitOutcome};
use crate::report::{NodeReport, RunReport};
use crate::stats::{NodeProbe, StatsSampler};
use crossbeam::channel;
use replaygate_bottleneck::SyntheticBottleneck;
use replaygate_governor::{SubmissionGovernor, SubmissionMetrics};
use replaygate_quorum::QuorumGate;
use replaygate_state::{MachineConfig, ReplicatedStateMachine};
use replaygate_types::{NodeId, Roster};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How often the supervisor checks for completion.
const SUPERVISE_POLL: Duration = Duration::from_millis(50);

struct NodeThreads {
    node: NodeId,
    metrics: Arc<SubmissionMetrics>,
    delivery: JoinHandle<FinishedDelivery>,
    orchestrator: JoinHandle<SubmitOutcome>,
}

/// A validated cluster ready to run.
pub struct Cluster {
    config: HarnessConfig,
    roster: Arc<dyn Roster>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.roster.nodes())
            .field("seed", &self.config.seed)
            .finish()
    }
}

impl Cluster {
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let roster: Arc<dyn Roster> = Arc::new(config.build_roster()?);
        Ok(Self { config, roster })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run until every orchestrator finishes or `duration` elapses.
    pub fn run_for(&self, duration: Duration) -> Result<RunReport, HarnessError> {
        self.run_until(Arc::new(AtomicBool::new(false)), Some(Instant::now() + duration))
    }

    /// Run until every orchestrator finishes or `stop` is set.
    pub fn run(&self, stop: Arc<AtomicBool>) -> Result<RunReport, HarnessError> {
        self.run_until(stop, None)
    }

    fn run_until(
        &self,
        stop: Arc<AtomicBool>,
        deadline: Option<Instant>,
    ) -> Result<RunReport, HarnessError> {
        let started = Instant::now();
        let config = &self.config;
        let engine = Arc::new(LocalOrderingEngine::new(
            config.engine.clone(),
            self.roster.as_ref(),
        ));
        let bottleneck = config
            .bottleneck
            .is_enabled()
            .then(|| Arc::new(SyntheticBottleneck::started_at(config.bottleneck.clone(), started)));

        info!(
            nodes = self.roster.size(),
            seed = config.seed,
            bottleneck = bottleneck.is_some(),
            "Starting cluster"
        );

        // Build every node before spawning so peers can see all arenas.
        let mut workers = Vec::with_capacity(self.roster.size());
        let mut orchestrators = Vec::with_capacity(self.roster.size());
        let mut probes = Vec::with_capacity(self.roster.size());
        for (index, &node) in self.roster.nodes().iter().enumerate() {
            let quorum = Arc::new(
                QuorumGate::new(self.roster.clone()).with_auto_reset(config.replay.auto_reset),
            );
            quorum.on_quorum(move |action| {
                info!(node = %node, control = %action.kind, timestamp = %action.timestamp, "Quorum reached");
            });

            let machine_config = MachineConfig {
                log_threshold: config.replay.log_threshold,
                ..MachineConfig::new(node).with_record_ttl(config.replay.record_ttl())
            };
            let machine =
                ReplicatedStateMachine::new(machine_config, self.roster.clone(), quorum.clone());
            let governor =
                SubmissionGovernor::new(config.governor.clone(), quorum, engine.clone(), started);
            let handle = engine
                .connect(node)
                .ok_or(ConfigError::UnknownNode(node))?;
            let (signals_tx, signals_rx) = channel::unbounded();

            probes.push(NodeProbe {
                node,
                metrics: governor.metrics().clone(),
                arena: machine.arena().clone(),
            });

            let mut worker = DeliveryWorker::new(
                machine,
                engine.subscribe(),
                signals_tx,
                governor.force_pause_handle(),
            )
            .with_export_dir(config.export_dir.clone())
            .with_random_delay(config.replay.random_delay())
            .with_reconnect_backlog(config.replay.reconnect_backlog)
            .with_seed(config.node_seed(node));
            if let Some(bottleneck) = &bottleneck {
                worker = worker.with_bottleneck(bottleneck.clone());
            }
            workers.push(worker);

            let generator = config
                .workload
                .build_generator(node, config.node_seed(node));
            let orchestrator = Orchestrator::new(
                node,
                generator,
                governor,
                Arc::new(handle),
                signals_rx,
                stop.clone(),
            )
            .with_options(config.submit.clone(), index);
            orchestrators.push(orchestrator);
        }

        let peers: PeerArenas = Arc::new(
            probes
                .iter()
                .map(|probe| (probe.node, probe.arena.clone()))
                .collect(),
        );

        let mut nodes = Vec::with_capacity(workers.len());
        for (worker, orchestrator) in workers.into_iter().zip(orchestrators) {
            let node = worker.node();
            let metrics = orchestrator.governor().metrics().clone();
            let worker = worker.with_peers(peers.clone());
            let worker_stop = stop.clone();
            let delivery = spawn(format!("delivery-{}", node.0), &stop, move || {
                worker.run(&worker_stop)
            })?;
            let orchestrator = spawn(format!("orchestrator-{}", node.0), &stop, move || {
                orchestrator.run()
            })?;
            nodes.push(NodeThreads {
                node,
                metrics,
                delivery,
                orchestrator,
            });
        }

        let engine_thread = {
            let engine = engine.clone();
            let engine_stop = stop.clone();
            spawn("ordering-engine".to_string(), &stop, move || {
                engine.run(&engine_stop)
            })?
        };
        let stats_thread = {
            let sampler = StatsSampler::new(probes, engine.clone());
            let stats_stop = stop.clone();
            spawn("stats".to_string(), &stop, move || sampler.run(&stats_stop))?
        };

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested");
                break;
            }
            if nodes.iter().all(|n| n.orchestrator.is_finished()) {
                info!("All orchestrators finished");
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Run deadline reached before the test finished");
                break;
            }
            std::thread::sleep(SUPERVISE_POLL);
        }
        stop.store(true, Ordering::SeqCst);

        let mut reports = Vec::with_capacity(nodes.len());
        for threads in nodes {
            let submit = join(threads.orchestrator, format!("orchestrator-{}", threads.node.0))?;
            let finished = join(threads.delivery, format!("delivery-{}", threads.node.0))?;
            reports.push(node_report(threads.node, submit, &threads.metrics, finished));
        }
        join(engine_thread, "ordering-engine".to_string())?;
        join(stats_thread, "stats".to_string())?;

        let report = RunReport {
            elapsed: started.elapsed(),
            divergence_threshold: config.divergence_threshold,
            engine: engine.summary(),
            nodes: reports,
        };
        info!(
            passed = report.passed(),
            submitted = report.total_submitted(),
            divergences = report.total_divergences(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cluster stopped"
        );
        Ok(report)
    }
}

/// Spawn a named thread. On failure `stop` is set so threads already
/// running wind down.
fn spawn<T, F>(name: String, stop: &AtomicBool, body: F) -> Result<JoinHandle<T>, HarnessError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| {
            stop.store(true, Ordering::SeqCst);
            HarnessError::Spawn { name, source }
        })
}

fn join<T>(handle: JoinHandle<T>, name: String) -> Result<T, HarnessError> {
    handle
        .join()
        .map_err(|_| HarnessError::WorkerPanicked(name))
}

fn node_report(
    node: NodeId,
    submit: SubmitOutcome,
    metrics: &SubmissionMetrics,
    finished: FinishedDelivery,
) -> NodeReport {
    let machine = finished.machine;
    let snapshot = machine.arena().latest();
    let purge = machine.purge_stats();
    NodeReport {
        node,
        submit,
        submitted_bytes: metrics.total_bytes(),
        submitted_by_category: metrics.by_category(),
        applied: snapshot.counters().total(),
        version: snapshot.version(),
        entities: snapshot.entity_count(),
        entities_digest: snapshot.entities_digest(),
        apply: machine.stats().clone(),
        divergences: machine.divergences(),
        purge_runs: purge.runs,
        purged_entities: purge.entities,
        purge_p99: purge.latency_at(0.99),
        delivery: finished.outcome,
        suppressed: machine.limiter().suppressed(),
    }
}
