//! Synthesis of Radiance input files and engine invocations.
//!
//! For every emitter the generator writes one emitter `.rad` file and one
//! receiver `.rad` file per batch of receivers, then pairs each batch with
//! an `rfluxmtx` argument vector. All paths inside a job are relative to
//! the run's work directory, so generated commands are deterministic for
//! identical inputs regardless of where the run directory lives.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use rayon::prelude::*;

use crate::config::{EngineParams, RunConfig};
use crate::dispatch::ComputationJob;
use crate::error::Result;
use crate::registry::SurfaceRegistry;
use crate::surface::SurfaceId;

/// Directive telling `rfluxmtx` to sample the surface hemisphere uniformly.
const RFLUXMTX_HEADER: &str = "#@rfluxmtx h=u\n";

const EMITTER_DIR: &str = "emitters";
const RECEIVER_DIR: &str = "receivers";

pub struct PairInputGenerator<'a> {
    registry: &'a SurfaceRegistry,
    params: &'a EngineParams,
    config: &'a RunConfig,
    workdir: PathBuf,
}

impl<'a> PairInputGenerator<'a> {
    /// Prepares the emitter/receiver folders under `workdir`.
    pub fn new(
        registry: &'a SurfaceRegistry,
        params: &'a EngineParams,
        config: &'a RunConfig,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let workdir = workdir.into();
        std::fs::create_dir_all(workdir.join(EMITTER_DIR))?;
        std::fs::create_dir_all(workdir.join(RECEIVER_DIR))?;
        Ok(Self {
            registry,
            params,
            config,
            workdir,
        })
    }

    /// Generates the input files for one emitter against its receivers and
    /// returns one [`ComputationJob`] per receiver batch.
    pub fn generate(
        &self,
        emitter: &SurfaceId,
        receivers: &[SurfaceId],
        octree: Option<&Path>,
    ) -> Result<Vec<ComputationJob>> {
        let emitter_surface = self.registry.get(emitter)?;
        let emitter_rad = emitter_surface.to_rad_string()?;

        let emitter_rel = Path::new(EMITTER_DIR).join(format!(
            "emitter_{}.rad",
            emitter.file_stem()
        ));
        write_rad_file(&self.workdir.join(&emitter_rel), &[emitter_rad])?;

        let mut jobs = Vec::with_capacity(receivers.len().div_ceil(self.config.receivers_per_batch));
        for (batch_index, batch) in receivers.chunks(self.config.receivers_per_batch).enumerate() {
            let mut batch_rads = Vec::with_capacity(batch.len());
            for receiver in batch {
                batch_rads.push(self.registry.get(receiver)?.to_rad_string()?);
            }

            let receiver_rel = Path::new(RECEIVER_DIR).join(format!(
                "receiver_{}_batch_{batch_index}.rad",
                emitter.file_stem()
            ));
            write_rad_file(&self.workdir.join(&receiver_rel), &batch_rads)?;

            jobs.push(ComputationJob {
                emitter: emitter.clone(),
                receivers: batch.to_vec(),
                program: self.config.rfluxmtx_program.clone(),
                args: rfluxmtx_args(self.params, &emitter_rel, &receiver_rel, octree),
                workdir: self.workdir.clone(),
            });
        }
        debug!(
            "generated {} job(s) for emitter {emitter} ({} receivers)",
            jobs.len(),
            receivers.len()
        );
        Ok(jobs)
    }

    /// Generates inputs for many emitters in parallel. Each group resolves
    /// independently so one emitter's serialization failure never blocks
    /// the others; results come back in group order.
    pub fn generate_all(
        &self,
        groups: &[(SurfaceId, Vec<SurfaceId>)],
        octree: Option<&Path>,
    ) -> Vec<(SurfaceId, Result<Vec<ComputationJob>>)> {
        groups
            .par_iter()
            .map(|(emitter, receivers)| {
                (emitter.clone(), self.generate(emitter, receivers, octree))
            })
            .collect()
    }
}

/// Writes one `.rad` file: the rfluxmtx hemisphere directive followed by
/// the given surface blocks.
fn write_rad_file(path: &Path, blocks: &[String]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(RFLUXMTX_HEADER.as_bytes())?;
    for block in blocks {
        writer.write_all(block.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// `rfluxmtx -h- -ab <b> -c <rays> -lw <precision> "!xform -I <emitter>"
/// <receiver> [<octree>]`
fn rfluxmtx_args(
    params: &EngineParams,
    emitter: &Path,
    receiver: &Path,
    octree: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "-h-".to_string(),
        "-ab".to_string(),
        params.ambient_bounces.to_string(),
        "-c".to_string(),
        params.ray_count.to_string(),
        "-lw".to_string(),
        params.precision.to_string(),
        format!("!xform -I {}", emitter.display()),
        receiver.display().to_string(),
    ];
    if let Some(octree) = octree {
        args.push(octree.display().to_string());
    }
    args
}
