//! Structured galaxy catalogues: one JSON object per galaxy per line, one
//! file per output snapshot, and a manifest describing them all.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{per_forest_counts, ForestOutput, GalaxySink};
use crate::config::{OutputFormat, RunParams, TaskContext};
use crate::error::{ForestError, ForestResult};
use crate::tree::ForestInfo;
use crate::types::{Galaxy, GalaxyProperties};

/// Written next to the catalogues at finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub format: OutputFormat,
    pub task: usize,
    pub ntasks: usize,
    pub snapshots: Vec<SnapshotManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snap_num: i32,
    /// File name relative to the output directory.
    pub file: String,
    pub total_galaxies: i64,
    pub galaxies_per_forest: Vec<i32>,
}

impl OutputManifest {
    pub fn load(path: &Path) -> ForestResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ForestError::open(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Serialize)]
struct GalaxyLine<'a> {
    snap_num: i32,
    galaxy_type: i32,
    galaxy_index: u64,
    central_galaxy_index: u64,
    halo_nr: usize,
    forestnr: i64,
    original_filenr: i32,
    original_treenr: i64,
    simulation_halo_index: i64,
    merge_type: i32,
    merge_into: Option<usize>,
    merge_into_snap: i32,
    #[serde(flatten)]
    properties: &'a GalaxyProperties,
}

impl<'a> GalaxyLine<'a> {
    fn new(galaxy: &'a Galaxy, forest: &ForestOutput<'_>) -> Self {
        Self {
            snap_num: galaxy.snap_num,
            galaxy_type: galaxy.galaxy_type,
            galaxy_index: galaxy.galaxy_index,
            central_galaxy_index: galaxy.central_galaxy_index,
            halo_nr: galaxy.halo_nr,
            forestnr: forest.forestnr,
            original_filenr: forest.original_filenr,
            original_treenr: forest.original_treenr,
            simulation_halo_index: forest.simulation_halo_index(galaxy),
            merge_type: galaxy.merge_type,
            merge_into: galaxy.merge_into,
            merge_into_snap: galaxy.merge_into_snap,
            properties: &galaxy.properties,
        }
    }
}

#[derive(Debug)]
struct SnapshotFile {
    path: PathBuf,
    writer: BufWriter<File>,
    manifest: SnapshotManifest,
}

#[derive(Debug)]
pub struct JsonGalaxyWriter {
    task: TaskContext,
    manifest_path: PathBuf,
    files: Vec<SnapshotFile>,
}

impl JsonGalaxyWriter {
    pub fn initialize(
        params: &RunParams,
        task: TaskContext,
        info: &ForestInfo,
    ) -> ForestResult<Self> {
        fs::create_dir_all(&params.output_dir)
            .map_err(|e| ForestError::io(&params.output_dir, e))?;

        let nforests = info.nforests_this_task as usize;
        let mut files = Vec::with_capacity(params.nout());
        for &snap_num in &params.list_output_snaps {
            let path = params.galaxy_filename(snap_num, task.this_task, "jsonl");
            let file = File::create(&path).map_err(|e| ForestError::io(&path, e))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            files.push(SnapshotFile {
                writer: BufWriter::new(file),
                manifest: SnapshotManifest {
                    snap_num,
                    file: name,
                    total_galaxies: 0,
                    galaxies_per_forest: per_forest_counts(nforests)?,
                },
                path,
            });
        }

        let manifest_path = params.output_dir.join(format!(
            "{}_{}.manifest.json",
            params.file_name_galaxies, task.this_task
        ));

        debug!(files = files.len(), nforests, "json galaxy files opened");
        Ok(Self {
            task,
            manifest_path,
            files,
        })
    }

    pub fn finalize(self) -> ForestResult<()> {
        let mut snapshots = Vec::with_capacity(self.files.len());
        for mut snapshot in self.files {
            snapshot
                .writer
                .flush()
                .map_err(|e| ForestError::io(&snapshot.path, e))?;
            snapshots.push(snapshot.manifest);
        }

        let manifest = OutputManifest {
            format: OutputFormat::SageJson,
            task: self.task.this_task,
            ntasks: self.task.ntasks,
            snapshots,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&self.manifest_path, json)
            .map_err(|e| ForestError::io(&self.manifest_path, e))?;

        info!(path = ?self.manifest_path, "galaxy manifest written");
        Ok(())
    }
}

impl GalaxySink for JsonGalaxyWriter {
    fn write_forest(&mut self, counts: &[i32], forest: &ForestOutput<'_>) -> ForestResult<()> {
        let nforests = self
            .files
            .first()
            .map_or(0, |f| f.manifest.galaxies_per_forest.len());
        let forest_idx = usize::try_from(forest.forestnr)
            .ok()
            .filter(|&idx| idx < nforests)
            .ok_or(ForestError::InvalidMemoryAccess {
                forestnr: forest.forestnr,
                nforests: nforests as i64,
            })?;

        for (slot, snapshot) in self.files.iter_mut().enumerate() {
            let mut written = 0i32;
            for galaxy in forest.galaxies_in_slot(slot) {
                serde_json::to_writer(&mut snapshot.writer, &GalaxyLine::new(galaxy, forest))
                    .map_err(|e| ForestError::io(&snapshot.path, e.into()))?;
                snapshot
                    .writer
                    .write_all(b"\n")
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

            snapshot.manifest.galaxies_per_forest[forest_idx] = written;
            snapshot.manifest.total_galaxies += i64::from(written);
        }
        Ok(())
    }
}
