use crate::core::forcefield::interaction_const::{
    CoulombInteraction, InteractionConst, InteractionModifier, VdwInteraction,
};
use crate::core::forcefield::params::{NonbondedParameters, ParamLoadError};
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::{RVec, Real};
use crate::core::models::pairlist_set::Locality;
use crate::core::models::shift::calc_shift_vectors;
use crate::core::models::system::ParticleSystem;
use crate::core::search::ReferencePairSearch;
use crate::core::systems::{WaterBox, WaterBoxError, WaterBoxOptions, water_box};
use crate::engine::config::{ConfigError, FepParameters, InteractionConstBuilder, StepWorkload};
use crate::engine::counters::PairCounts;
use crate::engine::energy::{EnergyData, FepCoupling};
use crate::engine::error::EngineError;
use crate::engine::forces::{ForceWithShiftForces, calc_virial};
use crate::engine::kernels::selection::{KernelSetup, KernelVariant};
use crate::engine::nbv::NonbondedVerlet;
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Cut-offs and electrostatics/LJ treatment of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct InteractionSettings {
    pub coulomb_type: CoulombInteraction,
    pub rcoulomb: Real,
    pub vdw_type: VdwInteraction,
    pub vdw_modifier: InteractionModifier,
    pub rvdw: Real,
    pub rvdw_switch: Real,
    pub rlist: Option<Real>,
    pub epsilon_r: Real,
    pub epsilon_rf: Real,
    pub ewald_rtol: Real,
    pub ewald_rtol_lj: Real,
    pub table_energy_tolerance_factor: Real,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            coulomb_type: CoulombInteraction::Ewald,
            rcoulomb: 0.9,
            vdw_type: VdwInteraction::Cutoff,
            vdw_modifier: InteractionModifier::PotShift,
            rvdw: 0.9,
            rvdw_switch: 0.0,
            rlist: None,
            epsilon_r: InteractionConstBuilder::DEFAULT_EPSILON_R,
            epsilon_rf: InteractionConstBuilder::DEFAULT_EPSILON_RF,
            ewald_rtol: InteractionConstBuilder::DEFAULT_EWALD_RTOL,
            ewald_rtol_lj: InteractionConstBuilder::DEFAULT_EWALD_RTOL_LJ,
            table_energy_tolerance_factor:
                InteractionConstBuilder::DEFAULT_TABLE_ENERGY_TOLERANCE_FACTOR,
        }
    }
}

impl InteractionSettings {
    pub fn build(&self) -> Result<InteractionConst, ConfigError> {
        let mut builder = InteractionConstBuilder::new()
            .coulomb_type(self.coulomb_type)
            .rcoulomb(self.rcoulomb)
            .vdw_type(self.vdw_type)
            .vdw_modifier(self.vdw_modifier)
            .rvdw(self.rvdw)
            .rvdw_switch(self.rvdw_switch)
            .epsilon_r(self.epsilon_r)
            .epsilon_rf(self.epsilon_rf)
            .ewald_rtol(self.ewald_rtol)
            .ewald_rtol_lj(self.ewald_rtol_lj)
            .table_energy_tolerance_factor(self.table_energy_tolerance_factor);
        if let Some(rlist) = self.rlist {
            builder = builder.rlist(rlist);
        }
        builder.build()
    }
}

/// LJ parameter files replacing the built-in water types. The first three
/// types of the file are used for O, H with LJ and H without LJ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParameterFiles {
    pub types: PathBuf,
    pub overrides: Option<PathBuf>,
}

/// Everything one `evaluate` run needs besides the particles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RunConfig {
    pub system: WaterBoxOptions,
    pub parameters: Option<ParameterFiles>,
    pub interactions: InteractionSettings,
    pub kernel: KernelSetup,
    /// Worker threads; 0 uses every thread of the global pool.
    pub threads: usize,
    pub steps: u64,
    /// First i-cluster assigned to the non-local pairlists.
    pub non_local_split: Option<usize>,
    pub compute_virial: bool,
    pub compute_energy: bool,
    /// λ per coupling component; one value applies to all, empty means 0.
    pub lambda: Vec<Real>,
    pub fep: FepParameters,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            system: WaterBoxOptions::default(),
            parameters: None,
            interactions: InteractionSettings::default(),
            kernel: KernelSetup::default(),
            threads: 0,
            steps: 1,
            non_local_split: None,
            compute_virial: true,
            compute_energy: true,
            lambda: Vec::new(),
            fep: FepParameters::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Builds the water box, swapping in the configured parameter files.
    pub fn build_system(&self) -> Result<WaterBox, WaterBoxError> {
        let mut water = water_box(&self.system)?;
        if let Some(files) = &self.parameters {
            water.params = NonbondedParameters::load(&files.types, files.overrides.as_deref())?;
        }
        Ok(water)
    }

    pub fn num_threads(&self) -> usize {
        match self.threads {
            0 => default_num_threads(),
            n => n,
        }
    }

    pub fn step_workload(&self) -> StepWorkload {
        StepWorkload {
            compute_forces: true,
            compute_virial: self.compute_virial,
            compute_energy: self.compute_energy,
            compute_dhdl: self.compute_energy,
        }
    }

    /// The full λ vector.
    pub fn lambda_vector(&self) -> Result<[Real; FepCoupling::COUNT], ConfigError> {
        match self.lambda.as_slice() {
            [] => Ok([0.0; FepCoupling::COUNT]),
            [all] => Ok([*all; FepCoupling::COUNT]),
            values => values.try_into().map_err(|_| ConfigError::InvalidParameter {
                name: "lambda",
                reason: format!(
                    "needs 1 or {} values, got {}",
                    FepCoupling::COUNT,
                    values.len()
                ),
            }),
        }
    }
}

#[cfg(feature = "parallel")]
fn default_num_threads() -> usize {
    rayon::current_num_threads().min(crate::engine::threaded_force_buffer::MAX_THREADS)
}

#[cfg(not(feature = "parallel"))]
fn default_num_threads() -> usize {
    1
}

#[derive(Debug, Serialize)]
struct ForceRecord {
    atom: usize,
    fx: Real,
    fy: Real,
    fz: Real,
}

/// Result of the last evaluation step.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceReport {
    pub kernel: KernelVariant,
    pub num_threads: usize,
    pub forces: Vec<RVec>,
    /// Folded group-pair energies of cluster and perturbed pairs.
    pub energies: GroupPairEnergies,
    pub virial: Option<Matrix3<Real>>,
    /// dV/dλ per coupling component.
    pub dvdl: [Real; FepCoupling::COUNT],
    /// Energies at the current λ followed by each foreign λ.
    pub foreign_lambda_energies: Vec<Real>,
    pub num_cluster_pairs: usize,
    pub fep_pair_counts: PairCounts,
}

impl ForceReport {
    pub fn total_vdw(&self) -> Real {
        self.energies.total().vdw
    }

    pub fn total_coulomb(&self) -> Real {
        self.energies.total().coulomb
    }

    pub fn potential(&self) -> Real {
        self.energies.total().total()
    }

    pub fn max_force(&self) -> Real {
        self.forces.iter().map(|f| f.norm()).fold(0.0, Real::max)
    }

    pub fn write_forces_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for (atom, f) in self.forces.iter().enumerate() {
            writer.serialize(ForceRecord {
                atom,
                fx: f.x,
                fy: f.y,
                fz: f.z,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Evaluates the nonbonded forces of `system` `config.steps` times and
/// reports the last evaluation.
#[instrument(skip_all, name = "evaluate_workflow")]
pub fn run(
    system: &ParticleSystem,
    params: &NonbondedParameters,
    config: &RunConfig,
    reporter: &ProgressReporter,
) -> Result<ForceReport, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Setup" });
    let ic = config.interactions.build()?;
    let lambda = config.lambda_vector()?;
    config.fep.validate()?;
    let num_threads = config.num_threads();

    let mut nbv = NonbondedVerlet::new(system, params.clone(), config.kernel, num_threads)?;
    let kernel = nbv.kernel_variant(&ic)?;
    let mut search = ReferencePairSearch::new(ic.rlist, num_threads);
    if let Some(first_cluster) = config.non_local_split {
        search = search.with_non_local_split(first_cluster);
    }
    nbv.search_pairs(&search, system)?;
    let num_cluster_pairs = nbv
        .pairlist_sets()
        .map_or(0, |sets| sets.iter().map(|set| set.num_cluster_pairs()).sum());
    info!(
        kernel = %kernel,
        rlist = ic.rlist,
        num_cluster_pairs,
        "Evaluation setup complete."
    );
    reporter.report(Progress::PhaseFinish);

    let steps = config.steps.max(1);
    reporter.report(Progress::StepsStart { total_steps: steps });
    let mut last = None;
    for step in 0..steps {
        let output = evaluate_step(&mut nbv, system, &ic, config, &lambda)?;
        debug!(step, potential = output.potential(), "Step evaluated.");
        reporter.report(Progress::StepFinish {
            step,
            potential: output.potential(),
        });
        last = Some(output);
    }
    reporter.report(Progress::StepsFinish);

    let last = last.ok_or_else(|| EngineError::precondition("no evaluation step ran"))?;
    let report = ForceReport {
        kernel,
        num_threads,
        dvdl: FepCoupling::ALL.map(|c| last.enerd.dvdl(c)),
        foreign_lambda_energies: last.enerd.foreign_lambda_terms.energies().to_vec(),
        forces: last.forces,
        energies: last.energies,
        virial: last.virial,
        num_cluster_pairs,
        fep_pair_counts: last.fep_pair_counts,
    };
    info!(
        vdw = report.total_vdw(),
        coulomb = report.total_coulomb(),
        max_force = report.max_force(),
        "Evaluation complete."
    );
    Ok(report)
}

struct StepOutput {
    forces: Vec<RVec>,
    energies: GroupPairEnergies,
    virial: Option<Matrix3<Real>>,
    enerd: EnergyData,
    fep_pair_counts: PairCounts,
}

impl StepOutput {
    fn potential(&self) -> Real {
        self.energies.total().total()
    }
}

fn evaluate_step(
    nbv: &mut NonbondedVerlet,
    system: &ParticleSystem,
    ic: &InteractionConst,
    config: &RunConfig,
    lambda: &[Real],
) -> Result<StepOutput, EngineError> {
    let step_work = config.step_workload();
    let shift_vecs = calc_shift_vectors(&system.periodic_box);
    let num_groups = system.num_energy_groups;
    let mut energies = GroupPairEnergies::new(num_groups);
    let mut force = ForceWithShiftForces::new(system.num_atoms(), step_work.compute_virial);

    let has_non_local = nbv
        .pairlist_sets()
        .is_some_and(|sets| sets.non_local().is_some());
    let localities: &[Locality] = if has_non_local {
        &[Locality::Local, Locality::NonLocal]
    } else {
        &[Locality::Local]
    };
    for &locality in localities {
        nbv.dispatch_nonbonded_kernel(
            locality,
            ic,
            &step_work,
            true,
            &shift_vecs,
            &mut energies.vdw,
            &mut energies.coulomb,
        )?;
        nbv.add_forces_to(locality, force.force_mut())?;
    }
    if step_work.compute_virial {
        nbv.add_shift_forces_to(force.shift_forces_mut())?;
    }

    let mut enerd = EnergyData::new(num_groups, config.fep.num_foreign_lambdas());
    let fep_pair_counts = nbv.dispatch_free_energy_kernels(
        ic,
        &shift_vecs,
        &config.fep,
        lambda,
        &mut force,
        &mut enerd,
        &step_work,
    )?;
    energies.add_assign_from(&enerd.grpp);

    let virial = step_work.compute_virial.then(|| {
        calc_virial(
            &system.coordinates,
            force.force(),
            &shift_vecs,
            force.shift_forces(),
        )
    });
    Ok(StepOutput {
        forces: force.into_forces(),
        energies,
        virial,
        enerd,
        fep_pair_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reference::evaluate_reference;
    use std::sync::Mutex;

    fn small_config() -> RunConfig {
        RunConfig {
            threads: 2,
            ..RunConfig::default()
        }
    }

    fn run_config(config: &RunConfig) -> ForceReport {
        let water = config.build_system().unwrap();
        run(&water.system, &water.params, config, &ProgressReporter::new()).unwrap()
    }

    fn tolerance(max_force: Real) -> Real {
        1e4 * Real::EPSILON * max_force.max(1.0)
    }

    #[test]
    fn config_parses_from_kebab_case_toml() {
        let config: RunConfig = toml::from_str(
            r#"
            threads = 3
            steps = 2
            lambda = [0.5]

            [system]
            num-waters = 8
            num-energy-groups = 2

            [interactions]
            coulomb-type = "reaction-field"
            rcoulomb = 0.8
            rvdw = 0.8

            [kernel]
            kernel-type = "simd-2xmm"
            "#,
        )
        .unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.system.num_waters, 8);
        assert_eq!(config.system.num_energy_groups, 2);
        assert_eq!(config.interactions.coulomb_type, CoulombInteraction::ReactionField);
        assert_eq!(config.kernel.kernel_type.name(), "simd-2xmm");
        assert_eq!(config.lambda_vector().unwrap(), [0.5; FepCoupling::COUNT]);
        assert!(config.compute_virial);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let result: Result<RunConfig, _> = toml::from_str("[interactions]\nrcutoff = 1.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn lambda_vector_needs_one_or_every_component() {
        let config = RunConfig {
            lambda: vec![0.1, 0.2],
            ..RunConfig::default()
        };
        assert!(matches!(
            config.lambda_vector(),
            Err(ConfigError::InvalidParameter { name: "lambda", .. })
        ));
    }

    #[test]
    fn load_reads_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "steps = 4\n[kernel]\newald-exclusion = \"analytical\"\n").unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.steps, 4);
        assert_eq!(config.kernel.kernel_type, KernelSetup::default().kernel_type);

        let missing = RunConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ParamLoadError::Io { .. })));
    }

    #[test]
    fn evaluation_matches_the_reference() {
        let config = RunConfig {
            system: WaterBoxOptions {
                num_energy_groups: 2,
                ..WaterBoxOptions::default()
            },
            interactions: InteractionSettings {
                coulomb_type: CoulombInteraction::ReactionField,
                ..InteractionSettings::default()
            },
            ..small_config()
        };
        let water = config.build_system().unwrap();
        let report = run(&water.system, &water.params, &config, &ProgressReporter::new()).unwrap();
        let ic = config.interactions.build().unwrap();
        let reference = evaluate_reference(&water.system, &water.params, &ic);

        let tol = tolerance(report.max_force());
        for (f, f_ref) in report.forces.iter().zip(&reference.forces) {
            assert!((f.map(f64::from) - f_ref).norm() <= f64::from(tol));
        }
        let energy_tol = f64::from(10.0 * tol);
        assert!((f64::from(report.total_vdw()) - reference.total_vdw()).abs() <= energy_tol);
        assert!((f64::from(report.total_coulomb()) - reference.total_coulomb()).abs() <= energy_tol);

        let virial = report.virial.unwrap().map(f64::from);
        let virial_tol = 1e5 * f64::from(Real::EPSILON) * reference.virial.norm().max(1.0);
        assert!((virial - reference.virial).norm() <= virial_tol);
        assert!(report.num_cluster_pairs > 0);
        assert_eq!(report.fep_pair_counts, PairCounts::default());
    }

    #[test]
    fn every_step_reports_the_same_potential() {
        let config = RunConfig {
            steps: 3,
            ..small_config()
        };
        let water = config.build_system().unwrap();
        let potentials = Mutex::new(Vec::new());
        let phases = Mutex::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| match event {
            Progress::StepFinish { potential, .. } => potentials.lock().unwrap().push(potential),
            Progress::PhaseStart { .. } => *phases.lock().unwrap() += 1,
            _ => {}
        }));
        let report = run(&water.system, &water.params, &config, &reporter).unwrap();
        drop(reporter);

        let potentials = potentials.into_inner().unwrap();
        assert_eq!(potentials.len(), 3);
        assert!(potentials.iter().all(|&p| p == report.potential()));
        assert_eq!(phases.into_inner().unwrap(), 1);
    }

    #[test]
    fn non_local_split_does_not_change_the_result() {
        let full = run_config(&small_config());
        let split = run_config(&RunConfig {
            non_local_split: Some(7),
            ..small_config()
        });
        let tol = tolerance(full.max_force());
        for (a, b) in full.forces.iter().zip(&split.forces) {
            assert!((a - b).norm() <= tol);
        }
        assert!((full.potential() - split.potential()).abs() <= 10.0 * tol);
    }

    #[test]
    fn perturbed_run_reports_dvdl_and_foreign_energies() {
        let foreign = vec![vec![0.0, 1.0]; FepCoupling::COUNT];
        let config = RunConfig {
            system: WaterBoxOptions {
                num_perturbed_waters: 2,
                ..WaterBoxOptions::default()
            },
            interactions: InteractionSettings {
                coulomb_type: CoulombInteraction::ReactionField,
                ..InteractionSettings::default()
            },
            fep: FepParameters {
                all_lambda: foreign,
                ..FepParameters::default()
            },
            ..small_config()
        };
        let report = run_config(&config);
        assert!(report.fep_pair_counts.num_pairs_within_cutoff > 0);
        assert_eq!(report.foreign_lambda_energies.len(), 3);
        assert_ne!(report.dvdl[FepCoupling::Coul.index()], 0.0);

        // Without soft-core the energy is linear in λ.
        let [current, at_zero, at_one] = report.foreign_lambda_energies[..] else {
            panic!("expected three lambda points");
        };
        let dvdl = report.dvdl[FepCoupling::Coul.index()] + report.dvdl[FepCoupling::Vdw.index()];
        let scale = at_zero.abs().max(1.0);
        assert!((current - at_zero).abs() <= 1e3 * Real::EPSILON * scale);
        assert!((at_one - at_zero - dvdl).abs() <= 1e3 * Real::EPSILON * scale);
    }

    #[test]
    fn forces_are_written_as_csv() {
        let report = run_config(&RunConfig {
            system: WaterBoxOptions {
                num_waters: 4,
                ..WaterBoxOptions::default()
            },
            interactions: InteractionSettings {
                coulomb_type: CoulombInteraction::ReactionField,
                rcoulomb: 0.5,
                rvdw: 0.5,
                ..InteractionSettings::default()
            },
            ..small_config()
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forces.csv");
        report.write_forces_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, ["atom", "fx", "fy", "fz"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 12);
        assert_eq!(&rows[11][0], "11");
    }

    #[test]
    fn invalid_interactions_fail_before_any_work() {
        let config = RunConfig {
            interactions: InteractionSettings {
                coulomb_type: CoulombInteraction::ReactionField,
                rvdw: 0.8,
                ..InteractionSettings::default()
            },
            ..small_config()
        };
        let water = config.build_system().unwrap();
        let started = Mutex::new(false);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::StepsStart { .. } = event {
                *started.lock().unwrap() = true;
            }
        }));
        let result = run(&water.system, &water.params, &config, &reporter);
        drop(reporter);
        assert!(matches!(result, Err(EngineError::Config { .. })));
        assert!(!started.into_inner().unwrap());
    }
}
