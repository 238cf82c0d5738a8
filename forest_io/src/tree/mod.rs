//! Merger-tree input: the backend contract every tree format satisfies and
//! the router that selects one by configuration.

pub mod binary;
pub mod partition;

use std::ops::RangeInclusive;

use tracing::{debug, info};

use crate::config::{RunParams, TaskContext, TreeType};
use crate::error::{ForestError, ForestResult};
use crate::ids::IdMultipliers;
use crate::types::HaloRecord;

pub use binary::LhaloBinaryForests;
pub use partition::{locate_files, task_forest_range, FileSlice};

/// Forests owned by one task, as described by the backend that set them up.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestInfo {
    /// Forests across every configured file.
    pub totnforests: i64,
    pub nforests_this_task: i64,
    /// Sum over files touched of (forests read / forests in file).
    pub frac_volume_processed: f64,
    pub multipliers: IdMultipliers,
    /// Original file number of each task-local forest.
    pub original_filenr: Vec<i32>,
    /// Original file-local tree number of each task-local forest.
    pub original_treenr: Vec<i64>,
    /// Files this task reads from.
    pub files: Vec<FileSlice>,
}

impl ForestInfo {
    /// Original (file, tree) coordinates of a task-local forest.
    pub fn original_coordinates(&self, forestnr: i64) -> ForestResult<(i32, i64)> {
        let idx = self.checked_index(forestnr)?;
        match (self.original_filenr.get(idx), self.original_treenr.get(idx)) {
            (Some(&filenr), Some(&treenr)) => Ok((filenr, treenr)),
            _ => Err(ForestError::InvalidMemoryAccess {
                forestnr,
                nforests: self.original_filenr.len() as i64,
            }),
        }
    }

    pub(crate) fn checked_index(&self, forestnr: i64) -> ForestResult<usize> {
        if forestnr < 0 || forestnr >= self.nforests_this_task {
            return Err(ForestError::InvalidMemoryAccess {
                forestnr,
                nforests: self.nforests_this_task,
            });
        }
        Ok(forestnr as usize)
    }
}

/// Contract shared by every tree format.
pub trait ForestBackend {
    /// Partition the forests of `files` across tasks and index this task's share.
    fn setup(
        &mut self,
        files: RangeInclusive<i32>,
        task: TaskContext,
        params: &RunParams,
    ) -> ForestResult<ForestInfo>;

    /// Halos of one task-local forest. Any order, any number of times.
    fn load(&self, forestnr: i64, info: &ForestInfo) -> ForestResult<Vec<HaloRecord>>;

    /// Release everything the backend holds. Called once, after the last load.
    fn cleanup(&mut self, info: &ForestInfo);
}

/// Closed set of tree backends available in this build.
#[derive(Debug)]
pub enum TreeBackend {
    LhaloBinary(LhaloBinaryForests),
}

impl TreeBackend {
    pub fn for_tree_type(tree_type: TreeType) -> ForestResult<Self> {
        match tree_type {
            TreeType::LhaloBinary => Ok(TreeBackend::LhaloBinary(LhaloBinaryForests::default())),
            TreeType::LhaloHdf5 | TreeType::ConsistentTreesAscii | TreeType::GenesisHdf5 => {
                Err(ForestError::invalid_config(format!(
                    "tree type {tree_type:?} has no backend in this build"
                )))
            }
        }
    }
}

impl ForestBackend for TreeBackend {
    fn setup(
        &mut self,
        files: RangeInclusive<i32>,
        task: TaskContext,
        params: &RunParams,
    ) -> ForestResult<ForestInfo> {
        match self {
            TreeBackend::LhaloBinary(backend) => backend.setup(files, task, params),
        }
    }

    fn load(&self, forestnr: i64, info: &ForestInfo) -> ForestResult<Vec<HaloRecord>> {
        match self {
            TreeBackend::LhaloBinary(backend) => backend.load(forestnr, info),
        }
    }

    fn cleanup(&mut self, info: &ForestInfo) {
        match self {
            TreeBackend::LhaloBinary(backend) => backend.cleanup(info),
        }
    }
}

/// Checks every backend must pass after setup. A failure here means the
/// backend broke its contract, not that the input was bad.
pub fn check_post_setup(info: &ForestInfo) -> ForestResult<()> {
    let IdMultipliers { forest, file } = info.multipliers;
    if forest < 0 || file < 0 {
        return Err(ForestError::ContractViolation(format!(
            "multipliers to generate unique galaxy indices were not set up: \
             file multiplier = {file}, forest multiplier = {forest}, both should be >= 0"
        )));
    }

    if !(info.frac_volume_processed > 0.0) {
        return Err(ForestError::ContractViolation(format!(
            "fraction of the simulation volume processed should be > 0, found {}",
            info.frac_volume_processed
        )));
    }

    let n = info.nforests_this_task;
    if info.original_filenr.len() as i64 != n || info.original_treenr.len() as i64 != n {
        return Err(ForestError::ContractViolation(format!(
            "original file/tree numbers cover {}/{} forests, expected {n}",
            info.original_filenr.len(),
            info.original_treenr.len()
        )));
    }

    Ok(())
}

/// Router over the configured tree backend. Owns the backend and this
/// task's `ForestInfo` from setup until cleanup.
#[derive(Debug)]
pub struct ForestIo {
    tree_type: TreeType,
    backend: TreeBackend,
    info: ForestInfo,
}

impl ForestIo {
    pub fn setup(params: &RunParams, task: TaskContext) -> ForestResult<Self> {
        let mut backend = TreeBackend::for_tree_type(params.tree_type)?;
        let info = backend.setup(params.file_range(), task, params)?;

        if let Err(err) = check_post_setup(&info) {
            backend.cleanup(&info);
            return Err(err);
        }

        info!(
            task = task.this_task,
            ntasks = task.ntasks,
            tree_type = ?params.tree_type,
            nforests = info.nforests_this_task,
            totnforests = info.totnforests,
            frac_volume = info.frac_volume_processed,
            "forest io ready"
        );

        Ok(Self {
            tree_type: params.tree_type,
            backend,
            info,
        })
    }

    pub fn tree_type(&self) -> TreeType {
        self.tree_type
    }

    pub fn info(&self) -> &ForestInfo {
        &self.info
    }

    pub fn nforests(&self) -> i64 {
        self.info.nforests_this_task
    }

    pub fn load(&self, forestnr: i64) -> ForestResult<Vec<HaloRecord>> {
        self.backend.load(forestnr, &self.info)
    }

    /// Release the backend, then the router's own bookkeeping.
    pub fn cleanup(mut self) {
        self.backend.cleanup(&self.info);
        self.info.original_filenr = Vec::new();
        self.info.original_treenr = Vec::new();
        debug!(tree_type = ?self.tree_type, "forest io cleaned up");
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn valid_info() -> ForestInfo {
        ForestInfo {
            totnforests: 8,
            nforests_this_task: 2,
            frac_volume_processed: 0.25,
            multipliers: IdMultipliers {
                forest: 1_000_000,
                file: 1_000_000_000_000,
            },
            original_filenr: vec![0, 0],
            original_treenr: vec![3, 4],
            files: Vec::new(),
        }
    }

    #[test]
    fn test_router__unsupported_tree_type__then_invalid_config() {
        for tree_type in [
            TreeType::LhaloHdf5,
            TreeType::ConsistentTreesAscii,
            TreeType::GenesisHdf5,
        ] {
            let err = TreeBackend::for_tree_type(tree_type).unwrap_err();
            assert!(matches!(err, ForestError::InvalidConfig(_)));
        }
        assert!(TreeBackend::for_tree_type(TreeType::LhaloBinary).is_ok());
    }

    #[test]
    fn test_post_setup__valid_info__then_ok() {
        assert!(check_post_setup(&valid_info()).is_ok());
    }

    #[test]
    fn test_post_setup__negative_multiplier__then_contract_violation() {
        let mut info = valid_info();
        info.multipliers.file = -1;
        assert!(matches!(
            check_post_setup(&info),
            Err(ForestError::ContractViolation(_))
        ));

        let mut info = valid_info();
        info.multipliers.forest = -1;
        assert!(matches!(
            check_post_setup(&info),
            Err(ForestError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_post_setup__zero_volume_fraction__then_contract_violation() {
        let mut info = valid_info();
        info.frac_volume_processed = 0.0;
        assert!(matches!(
            check_post_setup(&info),
            Err(ForestError::ContractViolation(_))
        ));

        info.frac_volume_processed = f64::NAN;
        assert!(matches!(
            check_post_setup(&info),
            Err(ForestError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_post_setup__bookkeeping_short__then_contract_violation() {
        let mut info = valid_info();
        info.original_treenr.pop();
        assert!(matches!(
            check_post_setup(&info),
            Err(ForestError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_forest_info__original_coordinates__then_looked_up_by_task_local_id() {
        let info = valid_info();
        assert_eq!(info.original_coordinates(1).unwrap(), (0, 4));
        assert!(matches!(
            info.original_coordinates(2),
            Err(ForestError::InvalidMemoryAccess { .. })
        ));
        assert!(matches!(
            info.original_coordinates(-1),
            Err(ForestError::InvalidMemoryAccess { .. })
        ));
    }
}
