//! Run parameters consumed by the forest layer.
//!
//! The parameter file is JSON. Task identity is supplied separately since
//! every task of a run shares one parameter file.

use std::collections::HashSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForestError, ForestResult};

/// Upper bound on the number of output snapshots.
pub const ABSOLUTE_MAX_SNAPS: usize = 1000;

/// Input merger-tree formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeType {
    LhaloBinary,
    LhaloHdf5,
    ConsistentTreesAscii,
    GenesisHdf5,
}

/// Galaxy output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    SageBinary,
    SageJson,
}

impl std::str::FromStr for OutputFormat {
    type Err = ForestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sage_binary" | "binary" => Ok(OutputFormat::SageBinary),
            "sage_json" | "json" => Ok(OutputFormat::SageJson),
            _ => Err(ForestError::invalid_config(format!(
                "unknown output format '{s}', use 'sage_binary' or 'sage_json'"
            ))),
        }
    }
}

impl std::str::FromStr for TreeType {
    type Err = ForestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
            .map_err(|_| ForestError::invalid_config(format!("unknown tree type '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub simulation_dir: PathBuf,
    pub tree_name: String,
    #[serde(default)]
    pub tree_extension: String,
    pub first_file: i32,
    pub last_file: i32,
    pub tree_type: TreeType,
    pub output_dir: PathBuf,
    #[serde(default = "default_file_name_galaxies")]
    pub file_name_galaxies: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    pub list_output_snaps: Vec<i32>,
}

fn default_file_name_galaxies() -> String {
    "model".to_string()
}

impl RunParams {
    /// Read and validate a JSON parameter file.
    pub fn from_file(path: &Path) -> ForestResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ForestError::open(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ForestResult<Self> {
        let params: RunParams = serde_json::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> ForestResult<()> {
        if self.first_file < 0 || self.first_file > self.last_file {
            return Err(ForestError::invalid_config(format!(
                "file range [{}, {}] is empty or negative",
                self.first_file, self.last_file
            )));
        }
        if self.list_output_snaps.is_empty() {
            return Err(ForestError::invalid_config("no output snapshots requested"));
        }
        if self.list_output_snaps.len() > ABSOLUTE_MAX_SNAPS {
            return Err(ForestError::invalid_config(format!(
                "{} output snapshots exceed the limit of {ABSOLUTE_MAX_SNAPS}",
                self.list_output_snaps.len()
            )));
        }
        // Each snapshot owns one output file per task
        let mut seen = HashSet::with_capacity(self.list_output_snaps.len());
        if let Some(snap) = self.list_output_snaps.iter().find(|&&snap| !seen.insert(snap)) {
            return Err(ForestError::invalid_config(format!(
                "output snapshot {snap} listed more than once"
            )));
        }
        Ok(())
    }

    pub fn file_range(&self) -> RangeInclusive<i32> {
        self.first_file..=self.last_file
    }

    /// Number of output snapshots.
    pub fn nout(&self) -> usize {
        self.list_output_snaps.len()
    }

    /// `{simulation_dir}/{tree_name}.{filenr}{tree_extension}`
    pub fn tree_filename(&self, filenr: i32) -> PathBuf {
        self.simulation_dir
            .join(format!("{}.{}{}", self.tree_name, filenr, self.tree_extension))
    }

    /// `{output_dir}/{file_name_galaxies}_snap{NNN}_{task}.{extension}`
    pub fn galaxy_filename(&self, snap: i32, task: usize, extension: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}_snap{:03}_{}.{}",
            self.file_name_galaxies, snap, task, extension
        ))
    }
}

/// Identity of this task within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub this_task: usize,
    pub ntasks: usize,
}

impl TaskContext {
    pub fn new(this_task: usize, ntasks: usize) -> ForestResult<Self> {
        if ntasks == 0 {
            return Err(ForestError::invalid_config("task count must be at least 1"));
        }
        if this_task >= ntasks {
            return Err(ForestError::invalid_config(format!(
                "task id {this_task} outside [0, {ntasks})"
            )));
        }
        Ok(Self { this_task, ntasks })
    }

    pub fn single() -> Self {
        Self {
            this_task: 0,
            ntasks: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    const PARAMS: &str = r#"{
        "simulation_dir": "/data/millennium/trees",
        "tree_name": "trees_063",
        "first_file": 0,
        "last_file": 7,
        "tree_type": "lhalo_binary",
        "output_dir": "/data/out",
        "list_output_snaps": [63, 37, 32]
    }"#;

    #[test]
    fn test_params__minimal_json__then_defaults_applied() {
        let params = RunParams::from_json(PARAMS).unwrap();

        assert_eq!(params.tree_type, TreeType::LhaloBinary);
        assert_eq!(params.output_format, OutputFormat::SageBinary);
        assert_eq!(params.file_name_galaxies, "model");
        assert_eq!(params.tree_extension, "");
        assert_eq!(params.nout(), 3);
        assert_eq!(params.file_range(), 0..=7);
    }

    #[test]
    fn test_params__tree_filename__then_follows_template() {
        let mut params = RunParams::from_json(PARAMS).unwrap();
        params.tree_extension = ".bin".to_string();

        assert_eq!(
            params.tree_filename(3),
            PathBuf::from("/data/millennium/trees/trees_063.3.bin")
        );
    }

    #[test]
    fn test_params__galaxy_filename__then_zero_padded_snapshot() {
        let params = RunParams::from_json(PARAMS).unwrap();
        assert_eq!(
            params.galaxy_filename(7, 2, "bin"),
            PathBuf::from("/data/out/model_snap007_2.bin")
        );
    }

    #[test]
    fn test_params__unknown_tree_type__then_invalid_config() {
        let json = PARAMS.replace("lhalo_binary", "gadget_snapshot");
        let err = RunParams::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::InvalidConfig(_)));
    }

    #[test]
    fn test_params__unknown_output_format__then_invalid_config() {
        let json = PARAMS.replace(
            "\"output_dir\"",
            "\"output_format\": \"fits\", \"output_dir\"",
        );
        let err = RunParams::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::InvalidConfig(_)));
    }

    #[test]
    fn test_params__reversed_file_range__then_invalid_config() {
        let json = PARAMS.replace("\"last_file\": 7", "\"last_file\": -1");
        let err = RunParams::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::InvalidConfig(_)));
    }

    #[test]
    fn test_params__no_output_snaps__then_invalid_config() {
        let json = PARAMS.replace("[63, 37, 32]", "[]");
        let err = RunParams::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::InvalidConfig(_)));
    }

    #[test]
    fn test_params__too_many_output_snaps__then_invalid_config() {
        let mut params = RunParams::from_json(PARAMS).unwrap();
        params.list_output_snaps = vec![0; ABSOLUTE_MAX_SNAPS + 1];
        assert!(matches!(
            params.validate(),
            Err(ForestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_params__duplicate_output_snaps__then_invalid_config() {
        let json = PARAMS.replace("[63, 37, 32]", "[63, 37, 63]");
        let err = RunParams::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::InvalidConfig(msg) if msg.contains("63")));
    }

    #[test]
    fn test_params__missing_file__then_file_not_found() {
        let err = RunParams::from_file(Path::new("/nonexistent/params.json")).unwrap_err();
        assert!(matches!(err, ForestError::FileNotFound { .. }));
    }

    #[test]
    fn test_output_format__from_str__then_parsed() {
        assert_eq!(
            "json".parse::<OutputFormat>().unwrap(),
            OutputFormat::SageJson
        );
        assert_eq!(
            "SAGE_BINARY".parse::<OutputFormat>().unwrap(),
            OutputFormat::SageBinary
        );
        assert!("hdf5".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_tree_type__from_str__then_parsed() {
        assert_eq!(
            "lhalo_binary".parse::<TreeType>().unwrap(),
            TreeType::LhaloBinary
        );
        assert!("lhalo".parse::<TreeType>().is_err());
    }

    #[test]
    fn test_task_context__out_of_range__then_invalid_config() {
        assert!(TaskContext::new(0, 1).is_ok());
        assert!(matches!(
            TaskContext::new(2, 2),
            Err(ForestError::InvalidConfig(_))
        ));
        assert!(matches!(
            TaskContext::new(0, 0),
            Err(ForestError::InvalidConfig(_))
        ));
    }
}
