//! Binary galaxy catalogues, one file per output snapshot.
//!
//! Layout, little-endian:
//! - `i32` forests of this task
//! - `i32` galaxies in the file
//! - `i32[nforests]` galaxies per forest
//! - packed galaxy records, forest after forest
//!
//! The header is reserved when the file is opened and filled in by
//! `finalize`, once every count is known.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info};

use super::{per_forest_counts, ForestOutput, GalaxySink};
use crate::config::{RunParams, TaskContext};
use crate::error::{ForestError, ForestResult};
use crate::tree::ForestInfo;
use crate::types::{Galaxy, GalaxyProperties};

/// Bytes per galaxy record.
pub const GALAXY_RECORD_SIZE: usize = 4 + 4 + 8 + 8 + 4 + 4 + 8 + 4 + 4 + 4 + 4 * GalaxyProperties::FLOAT_COUNT;

#[derive(Debug)]
struct SnapshotFile {
    snap_num: i32,
    path: PathBuf,
    writer: BufWriter<File>,
    galaxies_per_forest: Vec<i32>,
    total_galaxies: i64,
}

#[derive(Debug)]
pub struct BinaryGalaxyWriter {
    files: Vec<SnapshotFile>,
}

impl BinaryGalaxyWriter {
    pub fn initialize(
        params: &RunParams,
        task: TaskContext,
        info: &ForestInfo,
    ) -> ForestResult<Self> {
        fs::create_dir_all(&params.output_dir)
            .map_err(|e| ForestError::io(&params.output_dir, e))?;

        let nforests = info.nforests_this_task as usize;
        let header_len = (2 + nforests) * 4;

        let mut files = Vec::with_capacity(params.nout());
        for &snap_num in &params.list_output_snaps {
            let path = params.galaxy_filename(snap_num, task.this_task, "bin");

            let file = File::create(&path).map_err(|e| ForestError::io(&path, e))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(&vec![0u8; header_len])
                .map_err(|e| ForestError::io(&path, e))?;

            files.push(SnapshotFile {
                snap_num,
                path,
                writer,
                galaxies_per_forest: per_forest_counts(nforests)?,
                total_galaxies: 0,
            });
        }

        debug!(files = files.len(), nforests, "binary galaxy files opened");
        Ok(Self { files })
    }

    pub fn finalize(self) -> ForestResult<()> {
        for mut snapshot in self.files {
            let path = snapshot.path.clone();
            snapshot
                .write_header()
                .map_err(|e| ForestError::io(&path, e))?;
            info!(
                ?path,
                snap_num = snapshot.snap_num,
                galaxies = snapshot.total_galaxies,
                "galaxy file finalized"
            );
        }
        Ok(())
    }
}

impl SnapshotFile {
    fn write_header(&mut self) -> io::Result<()> {
        let ntrees = i32::try_from(self.galaxies_per_forest.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "too many forests for header"))?;
        let totngals = i32::try_from(self.total_galaxies)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "too many galaxies for header"))?;

        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_i32::<LittleEndian>(ntrees)?;
        self.writer.write_i32::<LittleEndian>(totngals)?;
        for &n in &self.galaxies_per_forest {
            self.writer.write_i32::<LittleEndian>(n)?;
        }
        self.writer.flush()
    }
}

/// Record fields are 32-bit on disk.
fn narrow<T>(value: T, what: &str) -> io::Result<i32>
where
    T: TryInto<i32> + Copy + std::fmt::Display,
{
    value.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{what} {value} does not fit a 32-bit record field"),
        )
    })
}

fn write_galaxy<W: Write>(
    out: &mut W,
    galaxy: &Galaxy,
    forest: &ForestOutput<'_>,
) -> io::Result<()> {
    out.write_i32::<LittleEndian>(galaxy.snap_num)?;
    out.write_i32::<LittleEndian>(galaxy.galaxy_type)?;
    out.write_u64::<LittleEndian>(galaxy.galaxy_index)?;
    out.write_u64::<LittleEndian>(galaxy.central_galaxy_index)?;
    let merge_into = match galaxy.merge_into {
        Some(target) => narrow(target, "merge target")?,
        None => -1,
    };

    out.write_i32::<LittleEndian>(narrow(galaxy.halo_nr, "halo number")?)?;
    out.write_i32::<LittleEndian>(narrow(forest.forestnr, "forest number")?)?;
    out.write_i64::<LittleEndian>(forest.simulation_halo_index(galaxy))?;
    out.write_i32::<LittleEndian>(galaxy.merge_type)?;
    out.write_i32::<LittleEndian>(merge_into)?;
    out.write_i32::<LittleEndian>(galaxy.merge_into_snap)?;

    let p = &galaxy.properties;
    for v in p.pos.iter().chain(&p.vel) {
        out.write_f32::<LittleEndian>(*v)?;
    }
    for v in [
        p.mvir,
        p.cold_gas,
        p.stellar_mass,
        p.hot_gas,
        p.black_hole_mass,
        p.sfr,
    ] {
        out.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

impl GalaxySink for BinaryGalaxyWriter {
    fn write_forest(&mut self, counts: &[i32], forest: &ForestOutput<'_>) -> ForestResult<()> {
        let forest_idx = usize::try_from(forest.forestnr)
            .ok()
            .filter(|&idx| idx < self.files.first().map_or(0, |f| f.galaxies_per_forest.len()))
            .ok_or(ForestError::InvalidMemoryAccess {
                forestnr: forest.forestnr,
                nforests: self
                    .files
                    .first()
                    .map_or(0, |f| f.galaxies_per_forest.len() as i64),
            })?;

        for (slot, snapshot) in self.files.iter_mut().enumerate() {
            let mut written = 0i32;
            for galaxy in forest.galaxies_in_slot(slot) {
                write_galaxy(&mut snapshot.writer, galaxy, forest)
                    .map_err(|e| ForestError::io(&snapshot.path, e))?;
                written += 1;
            }

            let expected = counts.get(slot).copied().unwrap_or(0);
            if written != expected {
                return Err(ForestError::Linkage(format!(
                    "forest {} slot {slot}: {written} galaxies tagged but {expected} counted",
                    forest.forestnr
                )));
            }

            snapshot.galaxies_per_forest[forest_idx] = written;
            snapshot.total_galaxies += i64::from(written);
        }
        Ok(())
    }
}
