//! Run orchestration: pair planning, generation, dispatch, parsing and
//! matrix assembly.
//!
//! A run walks `Initialized → Generating → Dispatching → Parsing →
//! Assembling` and terminates in `Completed` when every planned pair
//! resolved, or `PartiallyFailed` when some pairs failed while the rest
//! produced a usable partial matrix. Per-pair errors never abort the run;
//! only global misconfiguration does, and that happens before any process
//! is spawned.

use std::sync::Arc;

use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;

use crate::config::{EngineParams, RunConfig};
use crate::dispatch::{CancelToken, ComputationJob, JobDispatcher};
use crate::error::{Result, VfError};
use crate::inputs::PairInputGenerator;
use crate::matrix::{PairKey, ViewFactorMatrix};
use crate::obstruction::ObstructionResolver;
use crate::parse::parse_batch;
use crate::registry::SurfaceRegistry;
use crate::surface::SurfaceId;

/// Phases of a computation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Initialized,
    Generating,
    Dispatching,
    Parsing,
    Assembling,
    Completed,
    PartiallyFailed,
}

/// A pair that did not resolve, with the error that stopped it. The error
/// is shared because one failed engine invocation can take a whole
/// receiver batch down with it.
#[derive(Debug, Clone)]
pub struct PairFailure {
    pub pair: PairKey,
    pub error: Arc<VfError>,
}

/// Reproducibility record of one run: the knobs that shaped the
/// computation plus the failed subset, serializable for archival next to
/// the exported matrix.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workers: usize,
    pub ray_count: u32,
    pub ambient_bounces: u32,
    pub precision: f64,
    pub receivers_per_batch: usize,
    pub pairs_planned: usize,
    pub pairs_computed: usize,
    pub failed: Vec<FailedPair>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedPair {
    pub a: String,
    pub b: String,
    pub kind: String,
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub matrix: ViewFactorMatrix,
    pub failures: Vec<PairFailure>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.state == RunState::Completed
    }

    /// The pairs to resubmit after fixing whatever failed; successful
    /// results are already in [`RunReport::matrix`] and need no recompute.
    pub fn failed_pairs(&self) -> Vec<PairKey> {
        self.failures.iter().map(|f| f.pair.clone()).collect()
    }
}

pub struct Orchestrator {
    registry: SurfaceRegistry,
    params: EngineParams,
    config: RunConfig,
    resolver: ObstructionResolver,
    /// Planned computations in submission order, keeping the caller's
    /// emitter → receiver orientation.
    plan: Vec<(SurfaceId, SurfaceId)>,
    planned: std::collections::HashSet<PairKey>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(registry: SurfaceRegistry, params: EngineParams, config: RunConfig) -> Self {
        Self {
            registry,
            params,
            config,
            resolver: ObstructionResolver::none(),
            plan: Vec::new(),
            planned: std::collections::HashSet::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_obstruction(mut self, resolver: ObstructionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(&self) -> &SurfaceRegistry {
        &self.registry
    }

    /// Signal observed by the dispatcher: stops new jobs and kills
    /// in-flight processes while keeping completed results.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Plans the computation of one pair, keeping `emitter` as the sender
    /// side of the engine invocation. A pair already planned (in either
    /// orientation) is skipped — one computation serves both directions.
    pub fn add_pair(&mut self, emitter: &SurfaceId, receiver: &SurfaceId) -> Result<()> {
        let emitter_surface = self.registry.get(emitter)?;
        let receiver_surface = self.registry.get(receiver)?;
        if !emitter_surface.role().can_emit() {
            return Err(VfError::InvalidConfig(format!(
                "surface {emitter:?} cannot act as an emitter"
            )));
        }
        if !receiver_surface.role().can_receive() {
            return Err(VfError::InvalidConfig(format!(
                "surface {receiver:?} cannot act as a receiver"
            )));
        }
        let key = PairKey::new(emitter.clone(), receiver.clone())?;
        if self.planned.insert(key) {
            self.plan.push((emitter.clone(), receiver.clone()));
        }
        Ok(())
    }

    /// Plans every unordered pair of registered surfaces once, honoring
    /// role tags. When both surfaces can emit, the earlier-registered one
    /// sends.
    pub fn plan_all_pairs(&mut self) -> Result<()> {
        let ids = self.registry.ids();
        let expected = ids.len() * ids.len().saturating_sub(1) / 2;
        self.plan.reserve(expected);
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let first = self.registry.get(&ids[i])?;
                let second = self.registry.get(&ids[j])?;
                if first.role().can_emit() && second.role().can_receive() {
                    self.add_pair(&ids[i], &ids[j])?;
                } else if second.role().can_emit() && first.role().can_receive() {
                    self.add_pair(&ids[j], &ids[i])?;
                }
                // Neither orientation works (e.g. two receiver-only
                // surfaces): nothing to compute.
            }
        }
        Ok(())
    }

    pub fn pair_count(&self) -> usize {
        self.plan.len()
    }

    /// Executes the full pipeline in `workdir` and returns the report.
    ///
    /// Fails fast (before any dispatch) on invalid configuration or an
    /// unusable work directory; per-pair failures are collected into the
    /// report instead.
    pub fn run(&self, workdir: impl AsRef<std::path::Path>) -> Result<RunReport> {
        self.config.validate(&self.params)?;
        let workdir = workdir.as_ref();

        let mut matrix = ViewFactorMatrix::with_capacity(self.plan.len());
        let mut failures: Vec<PairFailure> = Vec::new();

        info!(
            "run initialized: {} pair(s), {} worker(s), {} ray(s)",
            self.plan.len(),
            self.config.workers,
            self.params.ray_count
        );

        // ── Generating ──────────────────────────────────────────────
        info!("generating engine inputs under {}", workdir.display());
        let generator =
            PairInputGenerator::new(&self.registry, &self.params, &self.config, workdir)?;

        let mut groups: IndexMap<SurfaceId, Vec<SurfaceId>> = IndexMap::new();
        for (emitter, receiver) in &self.plan {
            groups
                .entry(emitter.clone())
                .or_default()
                .push(receiver.clone());
        }
        let group_list: Vec<(SurfaceId, Vec<SurfaceId>)> = groups.into_iter().collect();

        let mut jobs: Vec<ComputationJob> = Vec::with_capacity(self.plan.len());
        for (emitter, outcome) in generator.generate_all(&group_list, self.resolver.resolve()) {
            match outcome {
                Ok(batch_jobs) => jobs.extend(batch_jobs),
                Err(err) => {
                    // The whole emitter group shares one failure cause.
                    warn!("input generation failed for emitter {emitter}: {err}");
                    let shared = Arc::new(err);
                    for (e, r) in self.plan.iter().filter(|(e, _)| e == &emitter) {
                        failures.push(PairFailure {
                            pair: PairKey::new(e.clone(), r.clone())?,
                            error: Arc::clone(&shared),
                        });
                    }
                }
            }
        }

        // ── Dispatching ─────────────────────────────────────────────
        info!("dispatching {} engine job(s)", jobs.len());
        let dispatcher = JobDispatcher::new(self.config.workers, self.config.job_timeout)
            .with_retry(self.config.retry)
            .with_cancel_token(self.cancel.clone());
        let outcomes = dispatcher.dispatch(jobs);

        // ── Parsing & Assembling ────────────────────────────────────
        info!("parsing {} engine output(s)", outcomes.len());
        for (job, outcome) in outcomes {
            match outcome {
                Ok(raw) => {
                    match parse_batch(&raw, job.receivers.len(), self.config.epsilon) {
                        Ok(values) => {
                            for (receiver, value) in job.receivers.iter().zip(values) {
                                let pair = PairKey::new(job.emitter.clone(), receiver.clone())?;
                                if self.config.overwrite {
                                    matrix.insert_overwrite(pair, value);
                                } else if let Err(err) = matrix.insert(pair.clone(), value) {
                                    warn!("conflicting result for pair {pair}: {err}");
                                    failures.push(PairFailure {
                                        pair,
                                        error: Arc::new(err),
                                    });
                                }
                            }
                        }
                        Err(err) => {
                            warn!("unparsable output for emitter {}: {err}", job.emitter);
                            let shared = Arc::new(VfError::Parse(err));
                            for receiver in &job.receivers {
                                failures.push(PairFailure {
                                    pair: PairKey::new(job.emitter.clone(), receiver.clone())?,
                                    error: Arc::clone(&shared),
                                });
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("dispatch failed for emitter {}: {err}", job.emitter);
                    let shared = Arc::new(VfError::Dispatch(err));
                    for receiver in &job.receivers {
                        failures.push(PairFailure {
                            pair: PairKey::new(job.emitter.clone(), receiver.clone())?,
                            error: Arc::clone(&shared),
                        });
                    }
                }
            }
        }

        let state = if failures.is_empty() {
            RunState::Completed
        } else {
            RunState::PartiallyFailed
        };
        info!(
            "run finished: {:?}, {} pair(s) computed, {} failed",
            state,
            matrix.len(),
            failures.len()
        );

        let summary = RunSummary {
            workers: self.config.workers,
            ray_count: self.params.ray_count,
            ambient_bounces: self.params.ambient_bounces,
            precision: self.params.precision,
            receivers_per_batch: self.config.receivers_per_batch,
            pairs_planned: self.plan.len(),
            pairs_computed: matrix.len(),
            failed: failures
                .iter()
                .map(|f| FailedPair {
                    a: f.pair.a().to_string(),
                    b: f.pair.b().to_string(),
                    kind: error_kind(&f.error).to_string(),
                })
                .collect(),
        };

        Ok(RunReport {
            state,
            matrix,
            failures,
            summary,
        })
    }
}

/// Stable machine-readable label for a failure cause.
fn error_kind(err: &VfError) -> &'static str {
    use crate::error::{DispatchError, ParseError};
    match err {
        VfError::DuplicateId(_) => "duplicate-id",
        VfError::UnknownSurface(_) => "unknown-surface",
        VfError::GeometrySerialization { .. } => "geometry-serialization",
        VfError::Dispatch(DispatchError::Spawn { .. }) => "dispatch-spawn",
        VfError::Dispatch(DispatchError::Timeout { .. }) => "dispatch-timeout",
        VfError::Dispatch(DispatchError::EngineFailure { .. }) => "engine-failure",
        VfError::Dispatch(DispatchError::Cancelled) => "cancelled",
        VfError::Parse(ParseError::Malformed(_)) => "parse-malformed",
        VfError::Parse(ParseError::OutOfRange { .. }) => "parse-out-of-range",
        VfError::Conflict { .. } => "conflict",
        VfError::NotComputed { .. } => "not-computed",
        VfError::InvalidConfig(_) => "invalid-config",
        VfError::Io(_) => "io",
        VfError::Serialize(_) => "serialize",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Role, Surface, Vertex};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn square(id: &str, z: f64) -> Surface {
        Surface::new(
            id,
            vec![
                Vertex::new(0.0, 0.0, z),
                Vertex::new(1.0, 0.0, z),
                Vertex::new(1.0, 1.0, z),
                Vertex::new(0.0, 1.0, z),
            ],
        )
    }

    /// Stub engine: prints one 0.25 triple per receiver surface; fails for
    /// receivers containing the surface "bad".
    fn write_stub_engine(dir: &Path) -> PathBuf {
        let path = dir.join("stub_rfluxmtx.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    !*) ;;
    *.rad) receiver="$arg" ;;
  esac
done
if grep -q "sur_bad " "$receiver"; then
  echo "unusable receiver" >&2
  exit 2
fi
count=$(grep -c " polygon " "$receiver")
i=0
while [ "$i" -lt "$count" ]; do
  printf '0.25\t0.25\t0.25\t'
  i=$((i+1))
done
"#,
        )
        .unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn orchestrator_with(ids: &[&str], stub: &Path) -> Orchestrator {
        let mut registry = SurfaceRegistry::new();
        for (i, id) in ids.iter().enumerate() {
            registry.register(square(id, i as f64)).unwrap();
        }
        let mut config = RunConfig::new();
        config.rfluxmtx_program = stub.display().to_string();
        config.workers = 2;
        Orchestrator::new(registry, EngineParams::new(), config)
    }

    #[test]
    fn test_completed_run_fills_symmetric_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());
        let mut orch = orchestrator_with(&["a", "b", "c"], &stub);
        orch.plan_all_pairs().unwrap();
        assert_eq!(orch.pair_count(), 3);

        let report = orch.run(dir.path().join("run")).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.matrix.len(), 3);
        let ab = report.matrix.get(&"a".into(), &"b".into()).unwrap();
        let ba = report.matrix.get(&"b".into(), &"a".into()).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, 0.25);
        assert!(report.summary.failed.is_empty());
    }

    #[test]
    fn test_invalid_config_aborts_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());
        let mut orch = orchestrator_with(&["a", "b"], &stub);
        orch.plan_all_pairs().unwrap();
        orch.config.workers = 0;
        let err = orch.run(dir.path().join("run")).unwrap_err();
        assert!(matches!(err, VfError::InvalidConfig(_)));
    }

    #[test]
    fn test_partial_failure_keeps_good_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());
        let mut orch = orchestrator_with(&["a", "b", "bad"], &stub);
        orch.plan_all_pairs().unwrap();

        let report = orch.run(dir.path().join("run")).unwrap();
        assert_eq!(report.state, RunState::PartiallyFailed);
        // (a, b) succeeded; the two pairs touching "bad" failed.
        assert!(report.matrix.get(&"a".into(), &"b".into()).is_ok());
        assert_eq!(report.failures.len(), 2);
        for failure in &report.failures {
            assert!(matches!(*failure.error, VfError::Dispatch(_)));
        }
        let kinds: Vec<&str> = report.summary.failed.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["engine-failure", "engine-failure"]);
    }

    #[test]
    fn test_add_pair_validation() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());
        let mut orch = orchestrator_with(&["a", "b"], &stub);

        assert!(orch.add_pair(&"a".into(), &"ghost".into()).is_err());
        let self_pair = orch.add_pair(&"a".into(), &"a".into());
        assert!(matches!(self_pair, Err(VfError::InvalidConfig(_))));

        orch.add_pair(&"a".into(), &"b".into()).unwrap();
        // Re-adding the same pair (either orientation) is a no-op.
        orch.add_pair(&"b".into(), &"a".into()).unwrap();
        assert_eq!(orch.pair_count(), 1);
    }

    #[test]
    fn test_roles_constrain_planning() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());

        let mut registry = SurfaceRegistry::new();
        registry
            .register(square("source", 0.0).with_role(Role::EmitterOnly))
            .unwrap();
        registry
            .register(square("sink_a", 1.0).with_role(Role::ReceiverOnly))
            .unwrap();
        registry
            .register(square("sink_b", 2.0).with_role(Role::ReceiverOnly))
            .unwrap();
        let mut config = RunConfig::new();
        config.rfluxmtx_program = stub.display().to_string();
        let mut orch = Orchestrator::new(registry, EngineParams::new(), config);

        orch.plan_all_pairs().unwrap();
        // sink_a/sink_b cannot see each other in any orientation.
        assert_eq!(orch.pair_count(), 2);

        let err = orch.add_pair(&"sink_a".into(), &"source".into()).unwrap_err();
        assert!(matches!(err, VfError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_plan_completes_trivially() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub_engine(dir.path());
        let orch = orchestrator_with(&["a", "b"], &stub);
        let report = orch.run(dir.path().join("run")).unwrap();
        assert!(report.is_complete());
        assert!(report.matrix.is_empty());
        assert_eq!(report.summary.pairs_planned, 0);
    }
}
