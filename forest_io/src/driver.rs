//! One task's pass over its forests: load, build galaxies, save.

use tracing::{debug, info, warn};

use crate::config::{RunParams, TaskContext};
use crate::error::ForestResult;
use crate::output::{save_galaxies, GalaxyWriter};
use crate::tree::ForestIo;
use crate::types::{Galaxy, GalaxyProperties, HaloAux, HaloRecord};

/// Galaxies built for one forest, with the per-halo bookkeeping that
/// links halos to them.
#[derive(Debug, Clone, Default)]
pub struct ForestGalaxies {
    pub aux: Vec<HaloAux>,
    pub galaxies: Vec<Galaxy>,
}

/// The astrophysical model run on each forest.
pub trait ForestModel {
    fn build_galaxies(
        &mut self,
        forestnr: i64,
        halos: &[HaloRecord],
        params: &RunParams,
    ) -> ForestResult<ForestGalaxies>;
}

/// One galaxy per halo, placed at the halo and carrying its virial mass.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaloTracer;

impl ForestModel for HaloTracer {
    fn build_galaxies(
        &mut self,
        _forestnr: i64,
        halos: &[HaloRecord],
        _params: &RunParams,
    ) -> ForestResult<ForestGalaxies> {
        let mut aux = Vec::with_capacity(halos.len());
        let mut galaxies = Vec::with_capacity(halos.len());

        for (halo_nr, halo) in halos.iter().enumerate() {
            let is_central = usize::try_from(halo.first_halo_in_fof_group) == Ok(halo_nr);
            aux.push(HaloAux {
                first_galaxy: Some(halo_nr),
                n_galaxies: 1,
            });
            galaxies.push(Galaxy {
                snap_num: halo.snap_num,
                galaxy_type: if is_central { 0 } else { 1 },
                galaxy_nr: halo_nr as u32,
                halo_nr,
                merge_into_snap: -1,
                properties: GalaxyProperties {
                    pos: halo.pos,
                    vel: halo.vel,
                    mvir: halo.mvir,
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        Ok(ForestGalaxies { aux, galaxies })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub forests_processed: i64,
    pub galaxies_written: i64,
    pub frac_volume_processed: f64,
}

/// Process every forest this task owns and write its galaxies.
///
/// `params` is validated here, since it may have been built in code
/// rather than parsed.
///
/// Output files are finalized only when every forest succeeded. The tree
/// backend is cleaned up either way.
pub fn run_task<M: ForestModel + ?Sized>(
    params: &RunParams,
    task: TaskContext,
    model: &mut M,
) -> ForestResult<RunSummary> {
    params.validate()?;

    let forest_io = ForestIo::setup(params, task)?;
    let result = process_forests(&forest_io, params, task, model);
    forest_io.cleanup();

    match &result {
        Ok(summary) => info!(
            task = task.this_task,
            forests = summary.forests_processed,
            galaxies = summary.galaxies_written,
            frac_volume = summary.frac_volume_processed,
            "task complete"
        ),
        Err(err) => warn!(task = task.this_task, error = %err, "task aborted"),
    }
    result
}

fn process_forests<M: ForestModel + ?Sized>(
    forest_io: &ForestIo,
    params: &RunParams,
    task: TaskContext,
    model: &mut M,
) -> ForestResult<RunSummary> {
    let info = forest_io.info();
    let mut writer = GalaxyWriter::initialize(params, task, info)?;
    let mut summary = RunSummary {
        frac_volume_processed: info.frac_volume_processed,
        ..Default::default()
    };

    for forestnr in 0..forest_io.nforests() {
        let halos = forest_io.load(forestnr)?;
        let ForestGalaxies { aux, mut galaxies } =
            model.build_galaxies(forestnr, &halos, params)?;

        let counts = save_galaxies(
            forestnr,
            &halos,
            &aux,
            &mut galaxies,
            info,
            params,
            &mut writer,
        )?;

        summary.forests_processed += 1;
        summary.galaxies_written += counts.iter().map(|&n| i64::from(n)).sum::<i64>();
        debug!(forestnr, nhalos = halos.len(), "forest processed");
    }

    writer.finalize()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::config::{OutputFormat, TreeType};
    use crate::error::ForestError;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn halo(forest: usize, h: usize, fof_head: i32) -> HaloRecord {
        HaloRecord {
            descendant: -1,
            first_progenitor: -1,
            next_progenitor: -1,
            first_halo_in_fof_group: fof_head,
            next_halo_in_fof_group: -1,
            mvir: 10.0 + h as f32,
            pos: [forest as f32, h as f32, 0.0],
            most_bound_id: (forest * 100 + h) as i64,
            snap_num: if h % 2 == 0 { 63 } else { 40 },
            ..Default::default()
        }
    }

    fn write_tree_file(path: &Path, nhalos_per_forest: &[i32]) {
        let mut file = fs::File::create(path).unwrap();
        let totnhalos: i32 = nhalos_per_forest.iter().sum();
        file.write_all(&(nhalos_per_forest.len() as i32).to_le_bytes())
            .unwrap();
        file.write_all(&totnhalos.to_le_bytes()).unwrap();
        for n in nhalos_per_forest {
            file.write_all(&n.to_le_bytes()).unwrap();
        }
        for (forest, &n) in nhalos_per_forest.iter().enumerate() {
            for h in 0..n as usize {
                file.write_all(halo(forest, h, 0).as_bytes()).unwrap();
            }
        }
    }

    fn params(dir: &TempDir, format: OutputFormat) -> RunParams {
        RunParams {
            simulation_dir: dir.path().to_path_buf(),
            tree_name: "trees_063".to_string(),
            tree_extension: String::new(),
            first_file: 0,
            last_file: 0,
            tree_type: TreeType::LhaloBinary,
            output_dir: dir.path().join("out"),
            file_name_galaxies: "model".to_string(),
            output_format: format,
            list_output_snaps: vec![63, 40],
        }
    }

    struct FailingModel {
        fail_at: i64,
    }

    impl ForestModel for FailingModel {
        fn build_galaxies(
            &mut self,
            forestnr: i64,
            halos: &[HaloRecord],
            params: &RunParams,
        ) -> ForestResult<ForestGalaxies> {
            if forestnr == self.fail_at {
                return Err(ForestError::Linkage(format!("model gave up on forest {forestnr}")));
            }
            HaloTracer.build_galaxies(forestnr, halos, params)
        }
    }

    #[test]
    fn test_halo_tracer__fof_heads__then_centrals_and_satellites() {
        let halos = vec![halo(0, 0, 0), halo(0, 1, 0), halo(0, 2, 2)];
        let dir = TempDir::new().unwrap();
        let params = params(&dir, OutputFormat::SageBinary);
        let built = HaloTracer.build_galaxies(0, &halos, &params).unwrap();

        let types: Vec<i32> = built.galaxies.iter().map(|g| g.galaxy_type).collect();
        assert_eq!(types, vec![0, 1, 0]);
        assert_eq!(built.aux[1].first_galaxy, Some(1));
        assert_eq!(built.galaxies[2].properties.mvir, 12.0);
        assert_eq!(built.galaxies[1].snap_num, 40);
    }

    #[test]
    fn test_run_task__single_task__then_every_halo_written() {
        let dir = TempDir::new().unwrap();
        write_tree_file(&dir.path().join("trees_063.0"), &[3, 2, 4]);
        let params = params(&dir, OutputFormat::SageBinary);

        let summary = run_task(&params, TaskContext::single(), &mut HaloTracer).unwrap();

        assert_eq!(summary.forests_processed, 3);
        assert_eq!(summary.galaxies_written, 9);
        assert_eq!(summary.frac_volume_processed, 1.0);

        // Halos 0, 2 (and 4) of each forest sit at snapshot 63
        let data = fs::read(dir.path().join("out/model_snap063_0.bin")).unwrap();
        assert_eq!(i32::from_le_bytes(data[0..4].try_into().unwrap()), 3);
        assert_eq!(i32::from_le_bytes(data[4..8].try_into().unwrap()), 5);
        assert_eq!(i32::from_le_bytes(data[8..12].try_into().unwrap()), 2);
        assert_eq!(i32::from_le_bytes(data[12..16].try_into().unwrap()), 1);
        assert_eq!(i32::from_le_bytes(data[16..20].try_into().unwrap()), 2);
    }

    #[test]
    fn test_run_task__json_format__then_manifest_written() {
        let dir = TempDir::new().unwrap();
        write_tree_file(&dir.path().join("trees_063.0"), &[2, 2]);
        let params = params(&dir, OutputFormat::SageJson);

        run_task(&params, TaskContext::new(1, 2).unwrap(), &mut HaloTracer).unwrap();

        let manifest = crate::output::OutputManifest::load(
            &dir.path().join("out/model_1.manifest.json"),
        )
        .unwrap();
        assert_eq!(manifest.snapshots[0].galaxies_per_forest, vec![1]);
        assert_eq!(manifest.snapshots[1].galaxies_per_forest, vec![1]);
    }

    #[test]
    fn test_run_task__model_error__then_no_finalize() {
        let dir = TempDir::new().unwrap();
        write_tree_file(&dir.path().join("trees_063.0"), &[2, 2]);
        let params = params(&dir, OutputFormat::SageJson);

        let err = run_task(&params, TaskContext::single(), &mut FailingModel { fail_at: 1 })
            .unwrap_err();

        assert!(matches!(err, ForestError::Linkage(_)));
        assert!(!dir.path().join("out/model_0.manifest.json").exists());
    }

    #[test]
    fn test_run_task__duplicate_output_snap__then_invalid_config_before_output() {
        let dir = TempDir::new().unwrap();
        write_tree_file(&dir.path().join("trees_063.0"), &[2]);
        let mut params = params(&dir, OutputFormat::SageBinary);
        params.list_output_snaps = vec![63, 63];

        let err = run_task(&params, TaskContext::single(), &mut HaloTracer).unwrap_err();

        assert!(matches!(err, ForestError::InvalidConfig(_)));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_run_task__missing_tree_file__then_nothing_opened_for_output() {
        let dir = TempDir::new().unwrap();
        let params = params(&dir, OutputFormat::SageBinary);

        let err = run_task(&params, TaskContext::single(), &mut HaloTracer).unwrap_err();

        assert!(matches!(err, ForestError::FileNotFound { .. }));
        assert!(!dir.path().join("out").exists());
    }
}
