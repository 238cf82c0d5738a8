//! Galaxy output: per-snapshot write ordering, merge-target remapping,
//! unique indices, and dispatch to the configured output format.

pub mod binary;
pub mod json;

use tracing::debug;

use crate::config::{OutputFormat, RunParams, TaskContext};
use crate::error::{try_vec, ForestError, ForestResult};
use crate::ids::generate_galaxy_indices;
use crate::tree::ForestInfo;
use crate::types::{Galaxy, HaloAux, HaloRecord};

pub use binary::{BinaryGalaxyWriter, GALAXY_RECORD_SIZE};
pub use json::{JsonGalaxyWriter, OutputManifest, SnapshotManifest};

/// One forest, ready to be written.
#[derive(Debug, Clone, Copy)]
pub struct ForestOutput<'a> {
    /// Task-local forest number.
    pub forestnr: i64,
    pub original_filenr: i32,
    pub original_treenr: i64,
    pub halos: &'a [HaloRecord],
    pub galaxies: &'a [Galaxy],
}

impl<'a> ForestOutput<'a> {
    /// Galaxies written to one snapshot slot, in write order.
    pub fn galaxies_in_slot(&self, slot: usize) -> impl Iterator<Item = &'a Galaxy> + 'a {
        self.galaxies
            .iter()
            .filter(move |g| g.output_slot == Some(slot))
    }

    /// Most-bound particle id of a galaxy's halo, -1 if the halo is unknown.
    pub fn simulation_halo_index(&self, galaxy: &Galaxy) -> i64 {
        self.halos
            .get(galaxy.halo_nr)
            .map(|h| h.most_bound_id)
            .unwrap_or(-1)
    }
}

/// Receives the galaxies of each forest.
pub trait GalaxySink {
    /// `counts[slot]` galaxies of `forest` carry `output_slot == Some(slot)`.
    fn write_forest(&mut self, counts: &[i32], forest: &ForestOutput<'_>) -> ForestResult<()>;
}

/// Closed set of output formats.
#[derive(Debug)]
pub enum GalaxyWriter {
    Binary(BinaryGalaxyWriter),
    Json(JsonGalaxyWriter),
}

impl GalaxyWriter {
    /// Open every output file of this task.
    pub fn initialize(
        params: &RunParams,
        task: TaskContext,
        info: &ForestInfo,
    ) -> ForestResult<Self> {
        match params.output_format {
            OutputFormat::SageBinary => Ok(GalaxyWriter::Binary(BinaryGalaxyWriter::initialize(
                params, task, info,
            )?)),
            OutputFormat::SageJson => Ok(GalaxyWriter::Json(JsonGalaxyWriter::initialize(
                params, task, info,
            )?)),
        }
    }

    /// Complete headers and close every file. Only after the last forest.
    pub fn finalize(self) -> ForestResult<()> {
        match self {
            GalaxyWriter::Binary(writer) => writer.finalize(),
            GalaxyWriter::Json(writer) => writer.finalize(),
        }
    }
}

impl GalaxySink for GalaxyWriter {
    fn write_forest(&mut self, counts: &[i32], forest: &ForestOutput<'_>) -> ForestResult<()> {
        match self {
            GalaxyWriter::Binary(writer) => writer.write_forest(counts, forest),
            GalaxyWriter::Json(writer) => writer.write_forest(counts, forest),
        }
    }
}

/// Zeroed galaxies-per-forest table for one output file.
pub(crate) fn per_forest_counts(nforests: usize) -> ForestResult<Vec<i32>> {
    let mut counts = try_vec("galaxies per forest", nforests)?;
    counts.resize(nforests, 0);
    Ok(counts)
}

/// Give every galaxy sitting at an output snapshot its position within
/// that snapshot. Returns per-slot counts and each galaxy's position.
pub fn assign_output_order(
    galaxies: &mut [Galaxy],
    list_output_snaps: &[i32],
) -> ForestResult<(Vec<i32>, Vec<Option<usize>>)> {
    let mut counts = vec![0i32; list_output_snaps.len()];
    let mut order = try_vec::<Option<usize>>("galaxy output order", galaxies.len())?;
    order.resize(galaxies.len(), None);

    for galaxy in galaxies.iter_mut() {
        galaxy.output_slot = None;
    }

    for (slot, &snap) in list_output_snaps.iter().enumerate() {
        for (gal_idx, galaxy) in galaxies.iter_mut().enumerate() {
            if galaxy.snap_num == snap {
                order[gal_idx] = Some(counts[slot] as usize);
                counts[slot] += 1;
                galaxy.output_slot = Some(slot);
            }
        }
    }

    Ok((counts, order))
}

/// Rewrite merge targets from galaxy positions to write positions.
/// A target that is never written becomes `None`.
pub fn remap_merge_targets(galaxies: &mut [Galaxy], order: &[Option<usize>]) -> ForestResult<()> {
    for gal_idx in 0..galaxies.len() {
        let Some(target) = galaxies[gal_idx].merge_into else {
            continue;
        };
        let remapped = order.get(target).copied().ok_or_else(|| {
            ForestError::Linkage(format!(
                "{} merges into galaxy {target} of {}",
                galaxies[gal_idx],
                galaxies.len()
            ))
        })?;
        galaxies[gal_idx].merge_into = remapped;
    }
    Ok(())
}

/// Order, index and write the galaxies of one task-local forest.
pub fn save_galaxies<S: GalaxySink + ?Sized>(
    forestnr: i64,
    halos: &[HaloRecord],
    haloaux: &[HaloAux],
    galaxies: &mut [Galaxy],
    info: &ForestInfo,
    params: &RunParams,
    sink: &mut S,
) -> ForestResult<Vec<i32>> {
    let (counts, order) = assign_output_order(galaxies, &params.list_output_snaps)?;
    remap_merge_targets(galaxies, &order)?;

    // Indices come from the original file coordinates, not the task-local forestnr
    let (original_filenr, original_treenr) = info.original_coordinates(forestnr)?;
    generate_galaxy_indices(
        halos,
        haloaux,
        galaxies,
        original_treenr,
        original_filenr,
        info.multipliers,
    )?;

    let forest = ForestOutput {
        forestnr,
        original_filenr,
        original_treenr,
        halos,
        galaxies,
    };
    sink.write_forest(&counts, &forest)?;

    debug!(forestnr, ngals = galaxies.len(), ?counts, "saved forest");
    Ok(counts)
}
