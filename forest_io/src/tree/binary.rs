//! LHaloTree binary backend.
//!
//! File layout, little-endian:
//! - `i32` forests in file, offset 0
//! - `i32` halos in file, offset 4
//! - `i32[nforests]` halos per forest, offset 8
//! - packed `HaloRecord`s of every forest, in file order
//!
//! Each task keeps one handle per file it reads and answers every `load`
//! with a single positioned read.

use std::fs::File;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

use super::partition::{locate_files, task_forest_range, FileSlice};
use super::{ForestBackend, ForestInfo};
use crate::config::{RunParams, TaskContext};
use crate::error::{try_vec, ForestError, ForestResult};
use crate::ids::IdMultipliers;
use crate::types::{HaloRecord, HALO_RECORD_SIZE, TREE_FILE_PREAMBLE};

/// Galaxy index multipliers for LHaloTree inputs.
pub const LHALO_FOREST_MULFAC: i64 = 1_000_000_000;
pub const LHALO_FILE_MULFAC: i64 = 1_000_000_000_000_000;

#[derive(Debug)]
struct OpenTreeFile {
    path: PathBuf,
    file: File,
}

/// Per-task state of the binary backend, indexed by task-local forest number.
#[derive(Debug, Default)]
pub struct LhaloBinaryForests {
    nhalos_per_forest: Vec<i32>,
    bytes_offset_for_forest: Vec<u64>,
    /// Index into `open_files`.
    handle_for_forest: Vec<usize>,
    /// One entry per distinct file, closed by taking it.
    open_files: Vec<Option<OpenTreeFile>>,
}

impl LhaloBinaryForests {
    /// Forests declared in one tree file's header. The per-forest halo
    /// table that follows must fit in the file.
    pub fn read_nforests(path: &Path) -> ForestResult<i32> {
        let file = File::open(path).map_err(|e| ForestError::open(path, e))?;
        let mut buf = [0u8; 4];
        read_exact_at(&file, &mut buf, 0).map_err(|e| ForestError::read(path, e))?;
        let nforests = LittleEndian::read_i32(&buf);

        if nforests > 0 {
            let file_len = file
                .metadata()
                .map_err(|e| ForestError::read(path, e))?
                .len();
            let table_end = TREE_FILE_PREAMBLE + 4 * nforests as u64;
            if table_end > file_len {
                return Err(ForestError::partition(format!(
                    "{path:?} declares {nforests} forests but holds {file_len} bytes, \
                     the halo table alone needs {table_end}"
                )));
            }
        }
        Ok(nforests)
    }

    /// Distinct files currently held open.
    pub fn open_file_count(&self) -> usize {
        self.open_files.iter().filter(|f| f.is_some()).count()
    }

    /// Byte offset of a task-local forest within its file.
    pub fn byte_offset(&self, forestnr: i64) -> Option<u64> {
        usize::try_from(forestnr)
            .ok()
            .and_then(|idx| self.bytes_offset_for_forest.get(idx).copied())
    }

    fn read_nhalos_table(file: &File, path: &Path, nforests: i32) -> ForestResult<Vec<i32>> {
        let len = nforests as usize;
        let mut buf = try_vec::<u8>("halo count table bytes", len * 4)?;
        buf.resize(len * 4, 0);
        read_exact_at(file, &mut buf, TREE_FILE_PREAMBLE).map_err(|e| ForestError::read(path, e))?;

        let mut table = try_vec::<i32>("halo count table", len)?;
        table.resize(len, 0);
        LittleEndian::read_i32_into(&buf, &mut table);

        if let Some(forest) = table.iter().position(|&n| n < 0) {
            return Err(ForestError::partition(format!(
                "{path:?}: forest {forest} declares {} halos",
                table[forest]
            )));
        }
        Ok(table)
    }
}

/// Byte offset of every forest of a file, counted positionally from the
/// end of the header regardless of which task owns each forest.
pub fn forest_byte_offsets(nhalos_per_forest: &[i32]) -> Vec<u64> {
    let header = TREE_FILE_PREAMBLE + 4 * nhalos_per_forest.len() as u64;
    nhalos_per_forest
        .iter()
        .scan(header, |offset, &nhalos| {
            let this = *offset;
            *offset += nhalos as u64 * HALO_RECORD_SIZE as u64;
            Some(this)
        })
        .collect()
}

impl ForestBackend for LhaloBinaryForests {
    fn setup(
        &mut self,
        files: RangeInclusive<i32>,
        task: TaskContext,
        params: &RunParams,
    ) -> ForestResult<ForestInfo> {
        let first_file = *files.start();
        if files.is_empty() || first_file < 0 {
            return Err(ForestError::invalid_config(format!(
                "no input files in range {files:?}"
            )));
        }

        // Forest count of every file, from the headers alone
        let nfiles = (*files.end() - first_file + 1) as usize;
        let mut totnforests_per_file = try_vec::<i32>("per-file forest counts", nfiles)?;
        let mut totnforests = 0i64;
        for filenr in files.clone() {
            let path = params.tree_filename(filenr);
            let nforests = Self::read_nforests(&path)?;
            if nforests < 0 {
                return Err(ForestError::partition(format!(
                    "{path:?} declares {nforests} forests"
                )));
            }
            if nforests == 0 {
                warn!(?path, "tree file holds no forests");
            }
            totnforests_per_file.push(nforests);
            totnforests += i64::from(nforests);
        }

        if totnforests == 0 {
            return Err(ForestError::partition(format!(
                "files {files:?} hold no forests"
            )));
        }

        let range = task_forest_range(task, totnforests);
        let slices = locate_files(&totnforests_per_file, first_file, range.clone())?;
        let nforests_this_task = range.end - range.start;
        let n = nforests_this_task as usize;

        self.nhalos_per_forest = try_vec("halos per forest", n)?;
        self.bytes_offset_for_forest = try_vec("forest byte offsets", n)?;
        self.handle_for_forest = try_vec("forest file handles", n)?;
        self.open_files = try_vec("open tree files", slices.len())?;
        let mut original_filenr = try_vec("original file numbers", n)?;
        let mut original_treenr = try_vec("original tree numbers", n)?;

        for slice in &slices {
            let path = params.tree_filename(slice.filenr);
            let file = File::open(&path).map_err(|e| ForestError::open(&path, e))?;

            let nhalos = Self::read_nhalos_table(&file, &path, slice.nforests_in_file)?;
            let offsets = forest_byte_offsets(&nhalos);

            let handle = self.open_files.len();
            for treenr in slice.forests() {
                let t = treenr as usize;
                self.nhalos_per_forest.push(nhalos[t]);
                self.bytes_offset_for_forest.push(offsets[t]);
                self.handle_for_forest.push(handle);
                original_filenr.push(slice.filenr);
                original_treenr.push(treenr);
            }

            debug!(
                ?path,
                first_forest = slice.first_forest,
                nforests = slice.nforests,
                nforests_in_file = slice.nforests_in_file,
                "indexed tree file"
            );
            // Held until cleanup
            self.open_files.push(Some(OpenTreeFile { path, file }));
        }

        let frac_volume_processed: f64 = slices.iter().map(FileSlice::fraction).sum();

        info!(
            task = task.this_task,
            start_forest = range.start,
            end_forest = range.end,
            files = slices.len(),
            "lhalo binary forests assigned"
        );

        Ok(ForestInfo {
            totnforests,
            nforests_this_task,
            frac_volume_processed,
            multipliers: IdMultipliers {
                forest: LHALO_FOREST_MULFAC,
                file: LHALO_FILE_MULFAC,
            },
            original_filenr,
            original_treenr,
            files: slices,
        })
    }

    fn load(&self, forestnr: i64, info: &ForestInfo) -> ForestResult<Vec<HaloRecord>> {
        let idx = info.checked_index(forestnr)?;
        let (Some(&nhalos), Some(&offset), Some(&handle)) = (
            self.nhalos_per_forest.get(idx),
            self.bytes_offset_for_forest.get(idx),
            self.handle_for_forest.get(idx),
        ) else {
            return Err(ForestError::InvalidMemoryAccess {
                forestnr,
                nforests: self.nhalos_per_forest.len() as i64,
            });
        };

        let Some(Some(open)) = self.open_files.get(handle) else {
            return Err(ForestError::InvalidFilePointer(forestnr));
        };

        let nhalos = nhalos as usize;
        let nbytes = nhalos * HALO_RECORD_SIZE;
        let mut buf = try_vec::<u8>("halo bytes", nbytes)?;
        buf.resize(nbytes, 0);
        read_exact_at(&open.file, &mut buf, offset).map_err(|e| ForestError::read(&open.path, e))?;

        let mut halos = try_vec::<HaloRecord>("halos", nhalos)?;
        for chunk in buf.chunks_exact(HALO_RECORD_SIZE) {
            let halo = HaloRecord::from_bytes(chunk).ok_or_else(|| {
                ForestError::read(
                    &open.path,
                    io::Error::new(io::ErrorKind::InvalidData, "short halo record"),
                )
            })?;
            halos.push(halo);
        }
        if halos.len() != nhalos {
            return Err(ForestError::read(
                &open.path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("forest {forestnr}: decoded {} of {nhalos} halos", halos.len()),
                ),
            ));
        }

        debug!(forestnr, nhalos, offset, "loaded forest");
        Ok(halos)
    }

    fn cleanup(&mut self, _info: &ForestInfo) {
        self.nhalos_per_forest = Vec::new();
        self.bytes_offset_for_forest = Vec::new();
        self.handle_for_forest = Vec::new();

        // Several forests share a handle; each file is closed once here.
        let mut closed = 0usize;
        for slot in &mut self.open_files {
            if let Some(open) = slot.take() {
                drop(open.file);
                closed += 1;
            }
        }
        self.open_files = Vec::new();
        debug!(closed, "closed tree files");
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
