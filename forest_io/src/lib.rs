//! Forest ingestion and galaxy persistence for a semi-analytic model.
//!
//! A task reads its share of the merger-tree forests through a tree backend,
//! hands each forest to a [`ForestModel`], then writes the galaxies with
//! run-wide unique indices through the configured output format.

pub mod config;
pub mod driver;
pub mod error;
pub mod ids;
pub mod output;
pub mod tree;
pub mod types;

pub use config::{OutputFormat, RunParams, TaskContext, TreeType, ABSOLUTE_MAX_SNAPS};
pub use driver::{run_task, ForestGalaxies, ForestModel, HaloTracer, RunSummary};
pub use error::{ForestError, ForestResult};
pub use ids::{generate_galaxy_index, generate_galaxy_indices, GalaxyIndices, IdMultipliers};
pub use output::{save_galaxies, GalaxySink, GalaxyWriter};
pub use tree::{ForestInfo, ForestIo};
pub use types::{Galaxy, GalaxyProperties, HaloAux, HaloRecord};
