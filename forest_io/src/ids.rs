//! Run-wide unique galaxy indices.
//!
//! `index = local + forestnr * forest_mulfac + filenr * file_mulfac`, where
//! `forestnr` and `filenr` are the coordinates in the original tree files,
//! never the task-local forest number.

use crate::error::{ForestError, ForestResult};
use crate::types::{Galaxy, HaloAux, HaloRecord};

/// Scale factors fixed by the tree backend during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMultipliers {
    pub forest: i64,
    pub file: i64,
}

impl IdMultipliers {
    /// Placeholder until a backend sets real values.
    pub const UNSET: IdMultipliers = IdMultipliers {
        forest: -1,
        file: -1,
    };
}

/// Global index of a galaxy and of its FOF central.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalaxyIndices {
    pub galaxy_index: u64,
    pub central_galaxy_index: u64,
}

/// Combine local numbers with the original (forest, file) coordinates.
pub fn generate_galaxy_index(
    galaxy_nr: u32,
    central_galaxy_nr: u32,
    forestnr: i64,
    filenr: i32,
    multipliers: IdMultipliers,
) -> ForestResult<GalaxyIndices> {
    let IdMultipliers {
        forest: forest_mulfac,
        file: file_mulfac,
    } = multipliers;

    if forest_mulfac < 0 || file_mulfac < 0 || forestnr < 0 || filenr < 0 {
        return Err(ForestError::IdentifierRange(format!(
            "negative input: forestnr = {forestnr} filenr = {filenr} \
             forest multiplier = {forest_mulfac} file multiplier = {file_mulfac}"
        )));
    }

    // Uniqueness needs every galaxy number to fit below the forest
    // multiplier and every forest offset below the file multiplier.
    let forest_span = i128::from(forestnr) * i128::from(forest_mulfac);
    if i64::from(galaxy_nr) > forest_mulfac
        || i64::from(central_galaxy_nr) > forest_mulfac
        || (file_mulfac > 0 && forest_span > i128::from(file_mulfac))
    {
        return Err(ForestError::IdentifierRange(format!(
            "galaxy numbers must stay below the forest multiplier and forest offsets below the file multiplier: \
             filenr = {filenr} original forestnr = {forestnr} galaxy nr = {galaxy_nr} central nr = {central_galaxy_nr} \
             forest multiplier = {forest_mulfac} file multiplier = {file_mulfac}"
        )));
    }

    let forestnr = forestnr as u64;
    let filenr = filenr as u64;
    let forest_mulfac = forest_mulfac as u64;
    let file_mulfac = file_mulfac as u64;

    if (forestnr > 0 && forest_mulfac > 0 && forestnr > u64::MAX / forest_mulfac)
        || (filenr > 0 && file_mulfac > 0 && filenr > u64::MAX / file_mulfac)
    {
        return Err(ForestError::IdentifierOverflow(format!(
            "multiplication overflows: forestnr = {forestnr} forest multiplier = {forest_mulfac} \
             filenr = {filenr} file multiplier = {file_mulfac}"
        )));
    }

    let id_from_forestnr = forest_mulfac * forestnr;
    let id_from_filenr = file_mulfac * filenr;

    if id_from_forestnr > u64::MAX - id_from_filenr {
        return Err(ForestError::IdentifierOverflow(format!(
            "addition overflows: id from forestnr = {id_from_forestnr} id from filenr = {id_from_filenr}"
        )));
    }

    let id_from_forest_and_file = id_from_forestnr + id_from_filenr;
    let headroom = u64::MAX - id_from_forest_and_file;
    if u64::from(galaxy_nr) > headroom || u64::from(central_galaxy_nr) > headroom {
        return Err(ForestError::IdentifierOverflow(format!(
            "addition overflows: id from forest and file = {id_from_forest_and_file} \
             galaxy nr = {galaxy_nr} central nr = {central_galaxy_nr}"
        )));
    }

    Ok(GalaxyIndices {
        galaxy_index: u64::from(galaxy_nr) + id_from_forest_and_file,
        central_galaxy_index: u64::from(central_galaxy_nr) + id_from_forest_and_file,
    })
}

/// Galaxy number of the first galaxy of the FOF group hosting `galaxy`.
fn central_galaxy_nr(
    galaxy: &Galaxy,
    halos: &[HaloRecord],
    haloaux: &[HaloAux],
    galaxies: &[Galaxy],
) -> ForestResult<u32> {
    let halo = halos.get(galaxy.halo_nr).ok_or_else(|| {
        ForestError::Linkage(format!("{galaxy} refers to a halo outside the forest"))
    })?;

    let fof = halo.first_halo_in_fof_group;
    let first_galaxy = usize::try_from(fof)
        .ok()
        .and_then(|fof| haloaux.get(fof))
        .and_then(|aux| aux.first_galaxy)
        .ok_or_else(|| {
            ForestError::Linkage(format!("{galaxy}: FOF head halo {fof} hosts no galaxy"))
        })?;

    galaxies
        .get(first_galaxy)
        .map(|central| central.galaxy_nr)
        .ok_or_else(|| {
            ForestError::Linkage(format!(
                "{galaxy}: central galaxy {first_galaxy} outside the forest"
            ))
        })
}

/// Assign `galaxy_index` and `central_galaxy_index` to every galaxy of one forest.
///
/// All checks run before any galaxy is modified.
pub fn generate_galaxy_indices(
    halos: &[HaloRecord],
    haloaux: &[HaloAux],
    galaxies: &mut [Galaxy],
    forestnr: i64,
    filenr: i32,
    multipliers: IdMultipliers,
) -> ForestResult<()> {
    let mut indices = Vec::with_capacity(galaxies.len());
    for galaxy in galaxies.iter() {
        let central_nr = central_galaxy_nr(galaxy, halos, haloaux, galaxies)?;
        indices.push(generate_galaxy_index(
            galaxy.galaxy_nr,
            central_nr,
            forestnr,
            filenr,
            multipliers,
        )?);
    }

    for (galaxy, idx) in galaxies.iter_mut().zip(indices) {
        galaxy.galaxy_index = idx.galaxy_index;
        galaxy.central_galaxy_index = idx.central_galaxy_index;
    }
    Ok(())
}
