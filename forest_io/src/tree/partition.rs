//! Forest partitioning across tasks.
//!
//! Pure functions of (task, task count, per-file forest counts): every task
//! reaches the same answer from the file headers alone.

use std::ops::Range;

use serde::Serialize;

use crate::config::TaskContext;
use crate::error::{ForestError, ForestResult};

/// Global forest numbers `[start, end)` owned by one task.
pub fn task_forest_range(task: TaskContext, totnforests: i64) -> Range<i64> {
    let ntasks = task.ntasks as i64;
    let this_task = task.this_task as i64;

    let nforests_per_task = totnforests / ntasks;
    let rem_nforests = totnforests % ntasks;

    let mut nforests_this_task = nforests_per_task;
    if this_task < rem_nforests {
        nforests_this_task += 1;
    }

    // The first `rem_nforests` tasks each took one extra forest.
    let start = nforests_per_task * this_task + this_task.min(rem_nforests);
    start..start + nforests_this_task
}

/// Slice of one input file read by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileSlice {
    pub filenr: i32,
    /// Forests declared in this file's header.
    pub nforests_in_file: i32,
    /// First forest of the file (file-local numbering) this task reads.
    pub first_forest: i64,
    /// Number of consecutive forests read from this file.
    pub nforests: i64,
}

impl FileSlice {
    pub fn forests(&self) -> Range<i64> {
        self.first_forest..self.first_forest + self.nforests
    }

    /// Share of this file's forests read by the task.
    pub fn fraction(&self) -> f64 {
        self.nforests as f64 / self.nforests_in_file as f64
    }
}

/// Map a global forest range onto the files that hold it.
///
/// `counts[i]` is the forest count of file `first_file + i`. Files that
/// declare no forests never hold part of a range and are skipped.
pub fn locate_files(
    counts: &[i32],
    first_file: i32,
    range: Range<i64>,
) -> ForestResult<Vec<FileSlice>> {
    let mut start_idx = None;
    let mut end_idx = None;
    let mut nforests_so_far = 0i64;
    let mut cumulative = Vec::with_capacity(counts.len());

    for (idx, &nforests_this_file) in counts.iter().enumerate() {
        let end_this_file = nforests_so_far + i64::from(nforests_this_file);
        cumulative.push(nforests_so_far);

        if start_idx.is_none() && range.start >= nforests_so_far && range.start < end_this_file {
            start_idx = Some(idx);
        }
        if start_idx.is_some()
            && end_idx.is_none()
            && range.end >= nforests_so_far
            && range.end <= end_this_file
        {
            end_idx = Some(idx);
        }

        nforests_so_far = end_this_file;
    }

    let (Some(start_idx), Some(end_idx)) = (start_idx, end_idx) else {
        return Err(ForestError::partition(format!(
            "could not locate start/end file for forests [{}, {}) across {} forests in files {}..={} (per-file counts {:?})",
            range.start,
            range.end,
            nforests_so_far,
            first_file,
            first_file + counts.len() as i32 - 1,
            counts
        )));
    };

    let mut slices = Vec::with_capacity(end_idx - start_idx + 1);
    for idx in start_idx..=end_idx {
        let nforests_in_file = counts[idx];
        if nforests_in_file == 0 {
            continue;
        }
        let file_start = cumulative[idx];
        let file_end = file_start + i64::from(nforests_in_file);

        let lo = range.start.max(file_start);
        let hi = range.end.min(file_end);
        slices.push(FileSlice {
            filenr: first_file + idx as i32,
            nforests_in_file,
            first_forest: lo - file_start,
            nforests: hi - lo,
        });
    }

    Ok(slices)
}
