//! End-to-end pipeline suite.
//!
//! Most tests drive the full orchestrator against a stub engine script
//! that mimics `rfluxmtx` output, so they run anywhere. The last two
//! exercise the real Radiance toolchain and skip themselves when it is
//! not installed.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use radiance_vf::{
    analytic, scenarios, EngineParams, Orchestrator, ObstructionResolver, RunConfig, RunState,
    Surface, SurfaceId, SurfaceRegistry, VfError, Vertex,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

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

/// Stand-in for `rfluxmtx`: one R/G/B triple per receiver polygon.
///
/// Failure injection by receiver id: `bad` exits non-zero, `slow` hangs,
/// `hot` emits an out-of-range value. When an octree argument is present
/// the reported factor drops to zero, mimicking a fully blocking scene.
fn write_stub_engine(dir: &Path) -> PathBuf {
    let path = dir.join("stub_rfluxmtx.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(
        br#"#!/bin/sh
octree=""
receiver=""
for arg in "$@"; do
  case "$arg" in
    !*) ;;
    *.rad) receiver="$arg" ;;
    *.oct) octree="$arg" ;;
  esac
done
if grep -q "sur_bad " "$receiver"; then
  echo "unusable receiver" >&2
  exit 2
fi
if grep -q "sur_slow " "$receiver"; then
  sleep 30
fi
value="0.25"
if [ -n "$octree" ]; then
  value="0.0"
fi
if grep -q "sur_hot " "$receiver"; then
  value="1.37"
fi
count=$(grep -c " polygon " "$receiver")
i=0
while [ "$i" -lt "$count" ]; do
  printf '%s\t%s\t%s\t' "$value" "$value" "$value"
  i=$((i+1))
done
"#,
    )
    .unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn stub_config(stub: &Path) -> RunConfig {
    let mut config = RunConfig::new();
    config.rfluxmtx_program = stub.display().to_string();
    config.workers = 2;
    config
}

#[test]
fn test_full_run_symmetry_and_export() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let stub = write_stub_engine(dir.path());

    let mut registry = SurfaceRegistry::new();
    let names = ["n", "e", "s", "w"];
    for (i, name) in names.iter().enumerate() {
        registry.register(square(name, i as f64))?;
    }

    let mut config = stub_config(&stub);
    config.receivers_per_batch = 2;
    let mut orch = Orchestrator::new(registry, EngineParams::new(), config);
    orch.plan_all_pairs()?;
    assert_eq!(orch.pair_count(), 6);

    let report = orch.run(dir.path().join("run"))?;
    assert!(report.is_complete());
    assert_eq!(report.matrix.len(), 6);

    // Symmetry holds for every registered pair.
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let a = SurfaceId::from(names[i]);
            let b = SurfaceId::from(names[j]);
            assert_eq!(report.matrix.get(&a, &b)?, report.matrix.get(&b, &a)?);
        }
    }

    // Dense export: NaN on the diagonal, values mirrored.
    let order: Vec<SurfaceId> = names.iter().map(|&n| n.into()).collect();
    let dense = report.matrix.export_dense(&order);
    assert_eq!(dense.shape(), [4, 4]);
    for i in 0..4 {
        assert!(dense[[i, i]].is_nan());
        for j in 0..4 {
            if i != j {
                assert_eq!(dense[[i, j]], dense[[j, i]]);
                assert_eq!(dense[[i, j]], 0.25);
            }
        }
    }

    // Sparse export carries each unordered pair once and serializes.
    let sparse = report.matrix.export_sparse();
    assert_eq!(sparse.len(), 6);
    let json = serde_json::to_string(&report.summary)?;
    assert!(json.contains("\"ray_count\":10000"));
    Ok(())
}

#[test]
fn test_timeout_isolates_failing_pair() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let stub = write_stub_engine(dir.path());

    let mut registry = SurfaceRegistry::new();
    for name in ["a", "b", "slow", "c", "d"] {
        registry.register(square(name, 0.0))?;
    }

    let mut config = stub_config(&stub);
    config.job_timeout = Some(Duration::from_millis(300));
    let mut orch = Orchestrator::new(registry, EngineParams::new(), config);
    orch.add_pair(&"a".into(), &"b".into())?;
    orch.add_pair(&"a".into(), &"slow".into())?;
    orch.add_pair(&"c".into(), &"d".into())?;

    let report = orch.run(dir.path().join("run"))?;
    assert_eq!(report.state, RunState::PartiallyFailed);

    // The surrounding pairs are unaffected by the timed-out middle pair.
    assert_eq!(report.matrix.get(&"a".into(), &"b".into())?, 0.25);
    assert_eq!(report.matrix.get(&"c".into(), &"d".into())?, 0.25);
    assert!(report.matrix.get(&"a".into(), &"slow".into()).is_err());

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.summary.failed[0].kind, "dispatch-timeout");
    let failed = report.failed_pairs();
    assert_eq!(failed[0].a().as_str(), "a");
    assert_eq!(failed[0].b().as_str(), "slow");
    Ok(())
}

#[test]
fn test_out_of_range_engine_output_is_flagged_not_clamped() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let stub = write_stub_engine(dir.path());

    let mut registry = SurfaceRegistry::new();
    for name in ["a", "b", "hot"] {
        registry.register(square(name, 0.0))?;
    }

    let mut orch = Orchestrator::new(registry, EngineParams::new(), stub_config(&stub));
    orch.add_pair(&"a".into(), &"b".into())?;
    orch.add_pair(&"a".into(), &"hot".into())?;

    let report = orch.run(dir.path().join("run"))?;
    assert_eq!(report.state, RunState::PartiallyFailed);
    assert!(report.matrix.get(&"a".into(), &"b".into()).is_ok());
    assert!(report.matrix.get(&"a".into(), &"hot".into()).is_err());
    assert_eq!(report.summary.failed[0].kind, "parse-out-of-range");
    match &*report.failures[0].error {
        VfError::Parse(radiance_vf::ParseError::OutOfRange { value, .. }) => {
            assert!((value - 1.37).abs() < 1e-9);
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_cancellation_keeps_completed_results() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let stub = write_stub_engine(dir.path());

    let mut registry = SurfaceRegistry::new();
    for name in ["a", "b", "slow", "c", "d"] {
        registry.register(square(name, 0.0))?;
    }

    let mut config = stub_config(&stub);
    config.workers = 1;
    let mut orch = Orchestrator::new(registry, EngineParams::new(), config);
    orch.add_pair(&"a".into(), &"b".into())?;
    orch.add_pair(&"a".into(), &"slow".into())?;
    orch.add_pair(&"c".into(), &"d".into())?;

    let token = orch.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(600));
        token.cancel();
    });

    let report = orch.run(dir.path().join("run"))?;
    canceller.join().unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(report.matrix.get(&"a".into(), &"b".into())?, 0.25);
    assert_eq!(report.failures.len(), 2);
    for failed in &report.summary.failed {
        assert_eq!(failed.kind, "cancelled");
    }
    Ok(())
}

#[test]
fn test_obstruction_scene_zeroes_view_factor() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let stub = write_stub_engine(dir.path());

    let (emitter, receiver) = scenarios::coaxial_parallel_squares(1.0, 1.0);
    let emitter_id = emitter.id().clone();
    let receiver_id = receiver.id().clone();

    let run = |resolver: ObstructionResolver, subdir: &str| -> Result<f64> {
        let mut registry = SurfaceRegistry::new();
        registry.register(emitter.clone())?;
        registry.register(receiver.clone())?;
        let mut orch =
            Orchestrator::new(registry, EngineParams::new(), stub_config(&stub))
                .with_obstruction(resolver);
        orch.add_pair(&emitter_id, &receiver_id)?;
        let report = orch.run(dir.path().join(subdir))?;
        assert!(report.is_complete());
        Ok(report.matrix.get(&emitter_id, &receiver_id)?)
    };

    let unobstructed = run(ObstructionResolver::none(), "direct")?;
    assert!(unobstructed > 0.0);

    let octree = dir.path().join("context.oct");
    std::fs::write(&octree, b"stub octree")?;
    let blocked = run(ObstructionResolver::with_octree(&octree)?, "blocked")?;
    assert!(blocked.abs() < 1e-12);
    Ok(())
}

// ── Real Radiance (skipped when the toolchain is absent) ────────────

fn radiance_available() -> bool {
    std::process::Command::new("rfluxmtx")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|mut child| {
            let _ = child.kill();
            let _ = child.wait();
            true
        })
        .unwrap_or(false)
}

#[test]
fn test_real_engine_matches_analytic_coaxial_squares() -> Result<()> {
    init_logging();
    if !radiance_available() {
        eprintln!("rfluxmtx not found; skipping real-engine test");
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let (emitter, receiver) = scenarios::coaxial_parallel_squares(1.0, 1.0);
    let emitter_id = emitter.id().clone();
    let receiver_id = receiver.id().clone();

    let mut registry = SurfaceRegistry::new();
    registry.register(emitter)?;
    registry.register(receiver)?;

    let mut params = EngineParams::new();
    params.ray_count = 100_000;
    let mut orch = Orchestrator::new(registry, params, RunConfig::new());
    orch.add_pair(&emitter_id, &receiver_id)?;

    let report = orch.run(dir.path().join("run"))?;
    assert!(report.is_complete(), "failures: {:?}", report.summary.failed);

    let computed = report.matrix.get(&emitter_id, &receiver_id)?;
    let expected = analytic::coaxial_parallel_squares(1.0, 1.0, 1.0);
    assert!(
        (computed - expected).abs() < 0.02,
        "engine {computed:.5} vs analytic {expected:.5}"
    );
    Ok(())
}

#[test]
fn test_real_engine_blocking_surface_zeroes_factor() -> Result<()> {
    init_logging();
    if !radiance_available() {
        eprintln!("rfluxmtx not found; skipping real-engine test");
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let (emitter, receiver) = scenarios::coaxial_parallel_squares(1.0, 1.0);
    let emitter_id = emitter.id().clone();
    let receiver_id = receiver.id().clone();

    // Build the blocking octree with oconv, the way an upstream
    // collaborator would hand it to us.
    let blocker = scenarios::blocking_square(1.0, 1.0, 1.0);
    let blocker_rad = dir.path().join("blocker.rad");
    std::fs::write(&blocker_rad, blocker.to_rad_string()?)?;
    let octree_path = dir.path().join("context.oct");
    let octree_file = std::fs::File::create(&octree_path)?;
    let status = std::process::Command::new("oconv")
        .arg(&blocker_rad)
        .stdout(octree_file)
        .status()?;
    assert!(status.success(), "oconv failed");

    let mut registry = SurfaceRegistry::new();
    registry.register(emitter)?;
    registry.register(receiver)?;

    let mut params = EngineParams::new();
    params.ray_count = 100_000;
    let mut orch = Orchestrator::new(registry, params, RunConfig::new())
        .with_obstruction(ObstructionResolver::with_octree(&octree_path)?);
    orch.add_pair(&emitter_id, &receiver_id)?;

    let report = orch.run(dir.path().join("run"))?;
    assert!(report.is_complete(), "failures: {:?}", report.summary.failed);

    let computed = report.matrix.get(&emitter_id, &receiver_id)?;
    assert!(
        computed.abs() < 0.01,
        "fully blocked pair should read ~0, got {computed:.5}"
    );
    Ok(())
}
