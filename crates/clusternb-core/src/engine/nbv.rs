//! The nonbonded Verlet-buffer object.
//!
//! [`NonbondedVerlet`] owns everything that lives from one pair search to the
//! next: the cluster-tiled atom data, the pairlists of both localities, one
//! threaded force buffer per locality and, for perturbed systems, the
//! free-energy dispatch. A force evaluation is then
//!
//! 1. [`NonbondedVerlet::dispatch_nonbonded_kernel`] per locality,
//! 2. [`NonbondedVerlet::add_forces_to`] and
//!    [`NonbondedVerlet::add_shift_forces_to`] into the caller's arrays,
//! 3. [`NonbondedVerlet::dispatch_free_energy_kernels`] for the perturbed
//!    pairs.

use super::config::{FepParameters, StepWorkload};
use super::counters::PairCounts;
use super::energy::EnergyData;
use super::error::{EngineError, check_length};
use super::forces::ForceWithShiftForces;
use super::free_energy::{FreeEnergyDispatch, FreeEnergyInputs};
use super::kernels::interactions::KernelContext;
use super::kernels::run_cluster_kernel;
use super::kernels::selection::{CoulombKernelType, KernelSetup, KernelVariant, select_kernel};
use super::threaded_force_buffer::ThreadedForceBuffer;
use crate::core::forcefield::interaction_const::InteractionConst;
use crate::core::forcefield::params::NonbondedParameters;
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::{RVec, Real};
use crate::core::models::atom_data::{AtomData, I_CLUSTER_SIZE};
use crate::core::models::pairlist_set::{Locality, PairlistSet, PairlistSets};
use crate::core::models::shift::NUM_SHIFTS;
use crate::core::models::system::{FepAtomArrays, ParticleSystem};
use crate::core::search::PairlistProvider;
use itertools::izip;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct NonbondedVerlet {
    kernel_setup: KernelSetup,
    params: NonbondedParameters,
    atoms: AtomData,
    fep_atoms: Option<FepAtomArrays>,
    num_threads: usize,
    pairlist_sets: Option<PairlistSets>,
    local_buffer: ThreadedForceBuffer,
    non_local_buffer: ThreadedForceBuffer,
    free_energy: Option<FreeEnergyDispatch>,
}

impl NonbondedVerlet {
    pub fn new(
        system: &ParticleSystem,
        params: NonbondedParameters,
        kernel_setup: KernelSetup,
        num_threads: usize,
    ) -> Result<Self, EngineError> {
        let atoms = AtomData::new(system, &params, kernel_setup.kernel_type.j_cluster_size())?;
        let groups = system.num_energy_groups;
        let free_energy = match system.perturbation {
            Some(_) => Some(FreeEnergyDispatch::new(num_threads, groups)?),
            None => None,
        };

        info!(
            layout = %kernel_setup.kernel_type,
            num_atoms = atoms.num_atoms(),
            num_atoms_padded = atoms.num_atoms_padded(),
            num_perturbed = system.num_perturbed(),
            num_energy_groups = groups,
            num_threads,
            "Nonbonded setup complete."
        );

        Ok(Self {
            kernel_setup,
            fep_atoms: free_energy.as_ref().map(|_| system.fep_atom_arrays()),
            params,
            atoms,
            num_threads,
            pairlist_sets: None,
            local_buffer: ThreadedForceBuffer::new(num_threads, true, groups)?,
            non_local_buffer: ThreadedForceBuffer::new(num_threads, true, groups)?,
            free_energy,
        })
    }

    pub fn kernel_setup(&self) -> &KernelSetup {
        &self.kernel_setup
    }

    pub fn params(&self) -> &NonbondedParameters {
        &self.params
    }

    pub fn atoms(&self) -> &AtomData {
        &self.atoms
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn pairlist_sets(&self) -> Option<&PairlistSets> {
        self.pairlist_sets.as_ref()
    }

    pub fn has_free_energy(&self) -> bool {
        self.free_energy.is_some()
    }

    /// The kernel that runs with `ic`.
    pub fn kernel_variant(&self, ic: &InteractionConst) -> Result<KernelVariant, EngineError> {
        select_kernel(&self.kernel_setup, ic, self.params.combination_rule())
    }

    /// Copies new coordinates of the real atoms into the kernel atom data.
    pub fn update_coordinates(&mut self, coordinates: &[RVec]) -> Result<(), EngineError> {
        Ok(self.atoms.update_coordinates(coordinates)?)
    }

    /// Builds new pairlists with `provider` and installs them.
    pub fn search_pairs<P: PairlistProvider>(
        &mut self,
        provider: &P,
        system: &ParticleSystem,
    ) -> Result<(), EngineError> {
        let sets = provider.search(system, &self.atoms)?;
        self.set_pairlists(sets)
    }

    /// Installs the lists of a pair search and rebuilds the reduction
    /// tables of every buffer.
    #[instrument(skip_all, name = "nbv_set_pairlists")]
    pub fn set_pairlists(&mut self, sets: PairlistSets) -> Result<(), EngineError> {
        let num_padded = self.atoms.num_atoms_padded();
        for set in sets.iter() {
            self.check_pairlist_set(set)?;
        }

        let local = sets.local();
        self.local_buffer.setup(num_padded, |t| {
            local.cluster_lists[t].touched_atoms(I_CLUSTER_SIZE)
        })?;
        match sets.non_local() {
            Some(non_local) => self.non_local_buffer.setup(num_padded, |t| {
                non_local.cluster_lists[t].touched_atoms(I_CLUSTER_SIZE)
            })?,
            None => self.non_local_buffer.setup(num_padded, |_| std::iter::empty())?,
        }
        if let Some(free_energy) = self.free_energy.as_mut() {
            free_energy.setup_fep_threaded_force_buffer(self.atoms.num_atoms(), &sets)?;
        }

        let cluster_pairs: usize = sets.iter().map(PairlistSet::num_cluster_pairs).sum();
        if cluster_pairs == 0 {
            warn!("Pair search found no cluster pairs; the nonbonded kernels will do nothing.");
        }
        debug!(
            cluster_pairs,
            fep_pairs = sets.iter().map(PairlistSet::num_fep_pairs).sum::<usize>(),
            "Pairlists installed."
        );
        self.pairlist_sets = Some(sets);
        Ok(())
    }

    fn check_pairlist_set(&self, set: &PairlistSet) -> Result<(), EngineError> {
        check_length("cluster pairlists", self.num_threads, set.cluster_lists.len())?;
        check_length("free-energy pairlists", self.num_threads, set.fep_lists.len())?;
        let j_size = self.atoms.j_cluster_size();
        let num_i = self.atoms.num_i_clusters();
        let num_j = self.atoms.num_j_clusters();
        for list in &set.cluster_lists {
            check_length("j-cluster size", j_size, list.j_cluster_size())?;
            if list.ci.iter().any(|e| e.ci >= num_i || e.shift >= NUM_SHIFTS)
                || list.cj.iter().any(|cj| cj.cj >= num_j)
            {
                return Err(EngineError::precondition(
                    "cluster pairlist refers to a cluster outside the atom data",
                ));
            }
        }
        for list in &set.fep_lists {
            list.validate(self.atoms.num_atoms())
                .map_err(|e| EngineError::precondition(format!("free-energy pairlist: {e}")))?;
        }
        Ok(())
    }

    fn buffer(&self, locality: Locality) -> &ThreadedForceBuffer {
        match locality {
            Locality::Local => &self.local_buffer,
            Locality::NonLocal => &self.non_local_buffer,
        }
    }

    /// Runs the cluster kernels of `locality` on every thread.
    ///
    /// Forces stay in the per-thread buffers until [`Self::add_forces_to`];
    /// with `clear_forces` unset they accumulate on top of the previous
    /// call. With `step_work.compute_energy`, the folded group-pair
    /// energies are added to `v_vdw` and `v_coulomb`, which must hold
    /// `n × n` entries for `n` energy groups.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, name = "nonbonded_dispatch", fields(locality = ?locality))]
    pub fn dispatch_nonbonded_kernel(
        &mut self,
        locality: Locality,
        ic: &InteractionConst,
        step_work: &StepWorkload,
        clear_forces: bool,
        shift_vecs: &[RVec],
        v_vdw: &mut [Real],
        v_coulomb: &mut [Real],
    ) -> Result<(), EngineError> {
        let sets = self.pairlist_sets.as_ref().ok_or(EngineError::SetupMissing)?;
        let set = sets.get(locality).ok_or_else(|| {
            EngineError::precondition(format!("no pairlists for locality {locality:?}"))
        })?;
        check_length("shift vectors", NUM_SHIFTS, shift_vecs.len())?;
        let num_groups = self.atoms.num_energy_groups();
        if step_work.compute_energy {
            check_length("LJ energy matrix", num_groups * num_groups, v_vdw.len())?;
            check_length("Coulomb energy matrix", num_groups * num_groups, v_coulomb.len())?;
        }
        let variant = select_kernel(&self.kernel_setup, ic, self.params.combination_rule())?;
        if matches!(
            variant.coulomb,
            CoulombKernelType::Table | CoulombKernelType::TableTwin
        ) && ic.coulomb.table.is_none()
        {
            return Err(EngineError::precondition(
                "tabulated Ewald kernel without a correction table",
            ));
        }

        let ctx = KernelContext::new(&self.atoms, shift_vecs, ic, step_work.compute_virial);
        let params = &self.params;
        let calc_energies = step_work.compute_energy;
        let buffer = match locality {
            Locality::Local => &mut self.local_buffer,
            Locality::NonLocal => &mut self.non_local_buffer,
        };

        #[cfg(not(feature = "parallel"))]
        let mut iterator = buffer.thread_buffers_mut().iter_mut().zip(&set.cluster_lists);
        #[cfg(feature = "parallel")]
        let iterator = buffer.thread_buffers_mut().par_iter_mut().zip(&set.cluster_lists);

        iterator.try_for_each(|(thread, list)| {
            if clear_forces {
                thread.clear_forces_and_energies();
            } else {
                thread.clear_energies();
            }
            run_cluster_kernel(&variant, &ctx, params, ic, list, thread.outputs_mut(), calc_energies)
        })?;

        if calc_energies {
            let mut grpp = GroupPairEnergies::new(num_groups);
            buffer.reduce_energies(&mut grpp, 0);
            grpp.fold();
            for (v, c, &gv, &gc) in izip!(
                v_vdw.iter_mut(),
                v_coulomb.iter_mut(),
                &grpp.vdw,
                &grpp.coulomb
            ) {
                *v += gv;
                *c += gc;
            }
        }

        debug!(
            kernel = %variant,
            cluster_pairs = set.num_cluster_pairs(),
            "Nonbonded kernels done."
        );
        Ok(())
    }

    /// Adds the forces of `locality` to `forces`, which holds the real
    /// atoms in their original order.
    pub fn add_forces_to(&self, locality: Locality, forces: &mut [RVec]) -> Result<(), EngineError> {
        if self.pairlist_sets.is_none() {
            return Err(EngineError::SetupMissing);
        }
        check_length("forces", self.atoms.num_atoms(), forces.len())?;
        self.buffer(locality).reduce_forces(forces, 0);
        Ok(())
    }

    /// Adds the shift forces of both localities to `shift_forces`.
    pub fn add_shift_forces_to(&self, shift_forces: &mut [RVec]) -> Result<(), EngineError> {
        check_length("shift forces", NUM_SHIFTS, shift_forces.len())?;
        self.local_buffer.reduce_shift_forces(shift_forces, 0);
        self.non_local_buffer.reduce_shift_forces(shift_forces, 0);
        Ok(())
    }

    /// Evaluates the perturbed pairs at `lambda` into `force` and `enerd`.
    /// Unperturbed systems have nothing to do.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch_free_energy_kernels(
        &mut self,
        ic: &InteractionConst,
        shift_vecs: &[RVec],
        fep: &FepParameters,
        lambda: &[Real],
        force: &mut ForceWithShiftForces,
        enerd: &mut EnergyData,
        step_work: &StepWorkload,
    ) -> Result<PairCounts, EngineError> {
        let sets = self.pairlist_sets.as_ref().ok_or(EngineError::SetupMissing)?;
        let (Some(free_energy), Some(fep_atoms)) =
            (self.free_energy.as_mut(), self.fep_atoms.as_ref())
        else {
            return Ok(PairCounts::default());
        };
        let inputs = FreeEnergyInputs {
            x: &self.atoms.x[..self.atoms.num_atoms()],
            shift_vecs,
            params: &self.params,
            ic,
            atoms: fep_atoms,
            fep,
        };
        free_energy.dispatch_free_energy_kernels(sets, &inputs, lambda, force, enerd, step_work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::interaction_const::{
        CoulombInteraction, InteractionModifier, VdwInteraction,
    };
    use crate::core::models::shift::{PeriodicBox, calc_shift_vectors};
    use crate::core::reference::evaluate_reference;
    use crate::core::search::ReferencePairSearch;
    use crate::core::systems::{CHARGE_OXYGEN, TYPE_OXYGEN, WaterBox, WaterBoxOptions, water_box};
    use crate::engine::config::InteractionConstBuilder;
    use crate::engine::energy::FepCoupling;
    use crate::engine::kernels::selection::{EwaldExclusionType, KernelType, VdwKernelType};
    use nalgebra::Vector3;

    const RC: Real = 0.9;

    struct Physics {
        coulomb: CoulombInteraction,
        vdw: VdwInteraction,
        modifier: InteractionModifier,
        rvdw: Real,
    }

    impl Physics {
        const fn new(coulomb: CoulombInteraction, modifier: InteractionModifier) -> Self {
            Self {
                coulomb,
                vdw: VdwInteraction::Cutoff,
                modifier,
                rvdw: RC,
            }
        }

        fn build(&self) -> InteractionConst {
            InteractionConstBuilder::new()
                .coulomb_type(self.coulomb)
                .rcoulomb(RC)
                .vdw_type(self.vdw)
                .vdw_modifier(self.modifier)
                .rvdw(self.rvdw)
                .rvdw_switch(0.7)
                .build()
                .unwrap()
        }
    }

    fn all_physics() -> Vec<Physics> {
        use CoulombInteraction::{Ewald, ReactionField};
        use InteractionModifier::{ForceSwitch, None, PotShift, PotSwitch};
        vec![
            Physics::new(ReactionField, PotShift),
            Physics::new(ReactionField, None),
            Physics::new(ReactionField, ForceSwitch),
            Physics::new(ReactionField, PotSwitch),
            Physics::new(Ewald, PotShift),
            Physics {
                rvdw: 0.8,
                ..Physics::new(Ewald, PotShift)
            },
            Physics {
                vdw: VdwInteraction::LjEwald,
                ..Physics::new(Ewald, PotShift)
            },
        ]
    }

    fn setup(layout: KernelType, ewald_exclusion: EwaldExclusionType) -> KernelSetup {
        KernelSetup {
            kernel_type: layout,
            ewald_exclusion,
        }
    }

    struct Output {
        forces: Vec<RVec>,
        shift_forces: Vec<RVec>,
        vdw: Vec<Real>,
        coulomb: Vec<Real>,
    }

    impl Output {
        fn max_force(&self) -> Real {
            self.forces.iter().map(|f| f.norm()).fold(0.0, Real::max)
        }
    }

    fn new_nbv(
        system: &ParticleSystem,
        params: &NonbondedParameters,
        ic: &InteractionConst,
        kernel_setup: KernelSetup,
        threads: usize,
    ) -> NonbondedVerlet {
        let mut nbv = NonbondedVerlet::new(system, params.clone(), kernel_setup, threads).unwrap();
        nbv.search_pairs(&ReferencePairSearch::new(ic.rlist, threads), system)
            .unwrap();
        nbv
    }

    fn dispatch(nbv: &mut NonbondedVerlet, system: &ParticleSystem, ic: &InteractionConst) -> Output {
        let n = system.num_energy_groups;
        let shift_vecs = calc_shift_vectors(&system.periodic_box);
        let mut out = Output {
            forces: vec![RVec::zeros(); system.num_atoms()],
            shift_forces: vec![RVec::zeros(); NUM_SHIFTS],
            vdw: vec![0.0; n * n],
            coulomb: vec![0.0; n * n],
        };
        nbv.dispatch_nonbonded_kernel(
            Locality::Local,
            ic,
            &StepWorkload::everything(),
            true,
            &shift_vecs,
            &mut out.vdw,
            &mut out.coulomb,
        )
        .unwrap();
        nbv.add_forces_to(Locality::Local, &mut out.forces).unwrap();
        nbv.add_shift_forces_to(&mut out.shift_forces).unwrap();
        out
    }

    fn evaluate(
        system: &ParticleSystem,
        params: &NonbondedParameters,
        ic: &InteractionConst,
        kernel_setup: KernelSetup,
        threads: usize,
    ) -> Output {
        let mut nbv = new_nbv(system, params, ic, kernel_setup, threads);
        dispatch(&mut nbv, system, ic)
    }

    /// Rounding tolerance for forces of magnitude up to `max_force`.
    fn rounding_tolerance(max_force: f64) -> f64 {
        5e3 * f64::from(Real::EPSILON) * max_force.max(1.0)
    }

    /// Tolerance against the double-precision reference, widened by the
    /// approximation error of the Ewald correction.
    fn reference_tolerance(ic: &InteractionConst, variant: &KernelVariant, max_force: f64) -> f64 {
        let relative_error = match variant.coulomb {
            CoulombKernelType::ReactionField => 0.0,
            CoulombKernelType::Table | CoulombKernelType::TableTwin => {
                f64::from(ic.coulomb.ewald_rtol)
            }
            CoulombKernelType::Ewald | CoulombKernelType::EwaldTwin => {
                if cfg!(feature = "single-precision") { 1e-6 } else { 1e-11 }
            }
        };
        let q_over_rc = f64::from(CHARGE_OXYGEN / RC);
        rounding_tolerance(max_force)
            + 50.0 * f64::from(ic.coulomb.epsfac) * relative_error * q_over_rc * q_over_rc
    }

    fn water(options: WaterBoxOptions) -> WaterBox {
        water_box(&options).unwrap()
    }

    fn to_f64(v: &RVec) -> Vector3<f64> {
        v.map(f64::from)
    }

    #[test]
    fn every_kernel_variant_matches_the_reference() {
        let water = water(WaterBoxOptions {
            num_energy_groups: 3,
            ..WaterBoxOptions::default()
        });
        let system = &water.system;
        for physics in all_physics() {
            let ic = physics.build();
            let reference = evaluate_reference(system, &water.params, &ic);
            for layout in KernelType::ALL {
                for exclusion in [EwaldExclusionType::Table, EwaldExclusionType::Analytical] {
                    let kernel_setup = setup(layout, exclusion);
                    let Ok(variant) =
                        select_kernel(&kernel_setup, &ic, water.params.combination_rule())
                    else {
                        continue;
                    };
                    let out = evaluate(system, &water.params, &ic, kernel_setup, 2);
                    let tolerance = reference_tolerance(&ic, &variant, reference.max_force());

                    for (a, (f, f_ref)) in out.forces.iter().zip(&reference.forces).enumerate() {
                        let error = (to_f64(f) - f_ref).norm();
                        assert!(
                            error <= tolerance,
                            "{variant}: force error {error} on atom {a} exceeds {tolerance}"
                        );
                    }
                    for c in 0..out.vdw.len() {
                        let vdw_error = (f64::from(out.vdw[c]) - reference.vdw[c]).abs();
                        let coulomb_error =
                            (f64::from(out.coulomb[c]) - reference.coulomb[c]).abs();
                        assert!(vdw_error <= 10.0 * tolerance, "{variant}: LJ energy cell {c}");
                        assert!(
                            coulomb_error <= 10.0 * tolerance,
                            "{variant}: Coulomb energy cell {c}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn layouts_agree_with_the_plain_kernel() {
        let water = water(WaterBoxOptions::default());
        let system = &water.system;
        for physics in all_physics() {
            let ic = physics.build();
            let plain = evaluate(
                system,
                &water.params,
                &ic,
                setup(KernelType::Plain4x4, EwaldExclusionType::Table),
                1,
            );
            let tolerance = rounding_tolerance(f64::from(plain.max_force()));
            for layout in [KernelType::Simd4xM, KernelType::Simd2xMM] {
                let out = evaluate(
                    system,
                    &water.params,
                    &ic,
                    setup(layout, EwaldExclusionType::Table),
                    1,
                );
                for (f, f_plain) in out.forces.iter().zip(&plain.forces) {
                    assert!(f64::from((f - f_plain).norm()) <= tolerance, "{layout}");
                }
                let de = f64::from((out.coulomb[0] - plain.coulomb[0]).abs());
                assert!(de <= 10.0 * tolerance, "{layout}");
            }
        }
    }

    #[test]
    fn analytical_and_tabulated_ewald_agree_within_the_table_tolerance() {
        let water = water(WaterBoxOptions::default());
        let ic = Physics::new(CoulombInteraction::Ewald, InteractionModifier::PotShift).build();
        let layout = KernelType::Simd4xM;
        let table = evaluate(
            &water.system,
            &water.params,
            &ic,
            setup(layout, EwaldExclusionType::Table),
            1,
        );
        let analytical = evaluate(
            &water.system,
            &water.params,
            &ic,
            setup(layout, EwaldExclusionType::Analytical),
            1,
        );
        let variant = KernelVariant {
            layout,
            coulomb: CoulombKernelType::Table,
            vdw: VdwKernelType::CutCombGeom,
        };
        let tolerance = reference_tolerance(&ic, &variant, f64::from(table.max_force()));
        for (a, b) in table.forces.iter().zip(&analytical.forces) {
            assert!(f64::from((a - b).norm()) <= tolerance);
        }
    }

    #[test]
    fn forces_obey_newtons_third_law() {
        let water = water(WaterBoxOptions::default());
        for physics in all_physics() {
            let ic = physics.build();
            let out = evaluate(
                &water.system,
                &water.params,
                &ic,
                setup(KernelType::Simd2xMM, EwaldExclusionType::Table),
                3,
            );
            let net: RVec = out.forces.iter().sum();
            let tolerance = 10.0 * rounding_tolerance(f64::from(out.max_force()));
            assert!(f64::from(net.norm()) <= tolerance);
        }
    }

    #[test]
    fn results_do_not_depend_on_the_thread_count() {
        let water = water(WaterBoxOptions {
            num_energy_groups: 2,
            ..WaterBoxOptions::default()
        });
        let ic = Physics::new(CoulombInteraction::Ewald, InteractionModifier::PotShift).build();
        let kernel_setup = setup(KernelType::Simd4xM, EwaldExclusionType::Table);
        let one = evaluate(&water.system, &water.params, &ic, kernel_setup, 1);
        let tolerance = rounding_tolerance(f64::from(one.max_force()));
        for threads in [2, 3, 5] {
            let many = evaluate(&water.system, &water.params, &ic, kernel_setup, threads);
            for (a, b) in one.forces.iter().zip(&many.forces) {
                assert!(f64::from((a - b).norm()) <= tolerance, "{threads} threads");
            }
            for (a, b) in one.coulomb.iter().zip(&many.coulomb) {
                assert!(f64::from((a - b).abs()) <= 10.0 * tolerance, "{threads} threads");
            }
        }
    }

    #[test]
    fn repeated_dispatch_is_bit_identical() {
        let water = water(WaterBoxOptions {
            num_energy_groups: 3,
            ..WaterBoxOptions::default()
        });
        let ic = Physics::new(CoulombInteraction::Ewald, InteractionModifier::PotShift).build();
        let mut nbv = new_nbv(
            &water.system,
            &water.params,
            &ic,
            setup(KernelType::Simd2xMM, EwaldExclusionType::Analytical),
            4,
        );
        let first = dispatch(&mut nbv, &water.system, &ic);
        let second = dispatch(&mut nbv, &water.system, &ic);
        assert_eq!(first.forces, second.forces);
        assert_eq!(first.shift_forces, second.shift_forces);
        assert_eq!(first.vdw, second.vdw);
        assert_eq!(first.coulomb, second.coulomb);
    }

    #[test]
    fn forces_accumulate_without_clearing_but_energies_do_not() {
        let water = water(WaterBoxOptions::default());
        let ic = Physics::new(CoulombInteraction::ReactionField, InteractionModifier::PotShift).build();
        let mut nbv = new_nbv(
            &water.system,
            &water.params,
            &ic,
            setup(KernelType::Simd4xM, EwaldExclusionType::Table),
            2,
        );
        let once = dispatch(&mut nbv, &water.system, &ic);

        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let (mut vdw, mut coulomb) = (vec![0.0], vec![0.0]);
        nbv.dispatch_nonbonded_kernel(
            Locality::Local,
            &ic,
            &StepWorkload::everything(),
            false,
            &shift_vecs,
            &mut vdw,
            &mut coulomb,
        )
        .unwrap();
        let mut twice = vec![RVec::zeros(); water.system.num_atoms()];
        nbv.add_forces_to(Locality::Local, &mut twice).unwrap();

        let tolerance = rounding_tolerance(f64::from(once.max_force()));
        for (a, b) in once.forces.iter().zip(&twice) {
            assert!(f64::from((a * 2.0 - b).norm()) <= tolerance);
        }
        assert_eq!(vdw, once.vdw);
        assert_eq!(coulomb, once.coulomb);
    }

    #[test]
    fn energy_groups_sum_to_the_single_group_total() {
        let ic = Physics::new(CoulombInteraction::ReactionField, InteractionModifier::PotShift).build();
        let kernel_setup = setup(KernelType::Simd4xM, EwaldExclusionType::Table);
        let one = water(WaterBoxOptions::default());
        let three = water(WaterBoxOptions {
            num_energy_groups: 3,
            ..WaterBoxOptions::default()
        });
        let single = evaluate(&one.system, &one.params, &ic, kernel_setup, 2);
        let grouped = evaluate(&three.system, &three.params, &ic, kernel_setup, 2);

        let tolerance = 10.0 * rounding_tolerance(f64::from(single.max_force()));
        let vdw: Real = grouped.vdw.iter().sum();
        let coulomb: Real = grouped.coulomb.iter().sum();
        assert!(f64::from((vdw - single.vdw[0]).abs()) <= tolerance);
        assert!(f64::from((coulomb - single.coulomb[0]).abs()) <= tolerance);
        for gi in 0..3 {
            for gj in 0..gi {
                assert_eq!(grouped.vdw[gi * 3 + gj], 0.0);
                assert_eq!(grouped.coulomb[gi * 3 + gj], 0.0);
            }
        }
    }

    #[test]
    fn virial_matches_the_reference() {
        let water = water(WaterBoxOptions::default());
        let ic = Physics::new(CoulombInteraction::ReactionField, InteractionModifier::PotShift).build();
        let out = evaluate(
            &water.system,
            &water.params,
            &ic,
            setup(KernelType::Simd4xM, EwaldExclusionType::Table),
            3,
        );
        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let virial = crate::engine::forces::calc_virial(
            &water.system.coordinates,
            &out.forces,
            &shift_vecs,
            &out.shift_forces,
        );
        let reference = evaluate_reference(&water.system, &water.params, &ic).virial;
        let error = (virial.map(f64::from) - reference).norm();
        assert!(error <= 1e5 * f64::from(Real::EPSILON) * reference.norm().max(1.0));
    }

    /// Two oxygens `r` apart along x in a large box.
    fn oxygen_pair(r: Real, excluded: bool, charged: bool) -> (ParticleSystem, NonbondedParameters) {
        let water = water(WaterBoxOptions::default());
        let q = if charged { CHARGE_OXYGEN } else { 0.0 };
        let system = ParticleSystem {
            coordinates: vec![RVec::new(1.0, 1.0, 1.0), RVec::new(1.0 + r, 1.0, 1.0)],
            types: vec![TYPE_OXYGEN; 2],
            charges: vec![q; 2],
            energy_groups: vec![0; 2],
            num_energy_groups: 1,
            exclusions: if excluded { vec![vec![1], vec![0]] } else { vec![vec![], vec![]] },
            periodic_box: PeriodicBox::cubic(4.0),
            perturbation: None,
        };
        (system, water.params)
    }

    fn rf_with_rlist(rlist: Real) -> InteractionConst {
        InteractionConstBuilder::new()
            .coulomb_type(CoulombInteraction::ReactionField)
            .rcoulomb(0.5)
            .vdw_type(VdwInteraction::Cutoff)
            .rvdw(0.5)
            .rlist(rlist)
            .build()
            .unwrap()
    }

    #[test]
    fn pairs_at_the_cutoff_do_not_interact() {
        let ic = rf_with_rlist(0.6);
        for layout in KernelType::ALL {
            let kernel_setup = setup(layout, EwaldExclusionType::Table);
            let (system, params) = oxygen_pair(0.5, false, true);
            let out = evaluate(&system, &params, &ic, kernel_setup, 1);
            assert!(out.forces.iter().all(|f| *f == RVec::zeros()), "{layout}");
            assert_eq!(out.vdw[0], 0.0);

            let (system, params) = oxygen_pair(0.49, false, true);
            let out = evaluate(&system, &params, &ic, kernel_setup, 1);
            assert!(out.forces[0].x < 0.0, "{layout}: like charges and LJ repel");
        }
    }

    #[test]
    fn excluded_pairs_contribute_only_their_corrections() {
        let ic = rf_with_rlist(1.0);
        for layout in KernelType::ALL {
            let kernel_setup = setup(layout, EwaldExclusionType::Table);
            let (system, params) = oxygen_pair(0.7, true, true);
            let out = evaluate(&system, &params, &ic, kernel_setup, 1);
            assert!(out.forces.iter().all(|f| *f == RVec::zeros()), "{layout}");
            assert_eq!(out.vdw[0], 0.0);

            let (system, params) = oxygen_pair(0.3, true, false);
            let out = evaluate(&system, &params, &ic, kernel_setup, 1);
            assert!(out.forces.iter().all(|f| *f == RVec::zeros()), "{layout}");
            assert_eq!(out.vdw[0], 0.0);
            assert_eq!(out.coulomb[0], 0.0);
        }
    }

    #[test]
    fn padding_atoms_receive_no_force() {
        let water = water(WaterBoxOptions {
            num_waters: 5,
            ..WaterBoxOptions::default()
        });
        let ic = rf_with_rlist(0.5);
        for layout in KernelType::ALL {
            let mut nbv = new_nbv(
                &water.system,
                &water.params,
                &ic,
                setup(layout, EwaldExclusionType::Table),
                2,
            );
            dispatch(&mut nbv, &water.system, &ic);
            let atoms = nbv.atoms();
            assert!(atoms.num_atoms_padded() > atoms.num_atoms());
            for t in 0..nbv.num_threads() {
                let force = nbv.local_buffer.thread_buffer(t).force();
                let padding = atoms.num_atoms()..atoms.num_atoms_padded().min(force.len());
                assert!(force[padding].iter().all(|f| *f == RVec::zeros()), "{layout}");
            }
        }
    }

    #[test]
    fn local_and_non_local_forces_add_up_to_the_full_evaluation() {
        let water = water(WaterBoxOptions::default());
        let ic = Physics::new(CoulombInteraction::ReactionField, InteractionModifier::PotShift).build();
        let kernel_setup = setup(KernelType::Simd4xM, EwaldExclusionType::Table);
        let full = evaluate(&water.system, &water.params, &ic, kernel_setup, 2);

        let mut nbv = NonbondedVerlet::new(&water.system, water.params.clone(), kernel_setup, 2)
            .unwrap();
        let search = ReferencePairSearch::new(ic.rlist, 2).with_non_local_split(10);
        nbv.search_pairs(&search, &water.system).unwrap();
        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let (mut vdw, mut coulomb) = (vec![0.0], vec![0.0]);
        let mut forces = vec![RVec::zeros(); water.system.num_atoms()];
        for locality in [Locality::Local, Locality::NonLocal] {
            nbv.dispatch_nonbonded_kernel(
                locality,
                &ic,
                &StepWorkload::everything(),
                true,
                &shift_vecs,
                &mut vdw,
                &mut coulomb,
            )
            .unwrap();
            nbv.add_forces_to(locality, &mut forces).unwrap();
        }

        let tolerance = rounding_tolerance(f64::from(full.max_force()));
        for (a, b) in forces.iter().zip(&full.forces) {
            assert!(f64::from((a - b).norm()) <= tolerance);
        }
        assert!(f64::from((vdw[0] - full.vdw[0]).abs()) <= 10.0 * tolerance);
        assert!(f64::from((coulomb[0] - full.coulomb[0]).abs()) <= 10.0 * tolerance);
    }

    /// Cluster plus free-energy forces and total energy of a perturbed
    /// system at `lambda`.
    fn evaluate_perturbed(
        water: &WaterBox,
        ic: &InteractionConst,
        lambda: Real,
    ) -> (Vec<RVec>, Real) {
        let system = &water.system;
        let kernel_setup = setup(KernelType::Simd4xM, EwaldExclusionType::Table);
        let mut nbv = new_nbv(system, &water.params, ic, kernel_setup, 3);
        assert!(nbv.has_free_energy());
        let out = dispatch(&mut nbv, system, ic);

        let shift_vecs = calc_shift_vectors(&system.periodic_box);
        let mut force = ForceWithShiftForces::new(system.num_atoms(), true);
        let mut enerd = EnergyData::new(1, 0);
        let counts = nbv
            .dispatch_free_energy_kernels(
                ic,
                &shift_vecs,
                &FepParameters::default(),
                &[lambda; FepCoupling::COUNT],
                &mut force,
                &mut enerd,
                &StepWorkload::everything(),
            )
            .unwrap();
        assert!(counts.num_pairs_within_cutoff > 0);

        let forces = out
            .forces
            .iter()
            .zip(force.force())
            .map(|(a, b)| a + b)
            .collect();
        let energy = out.vdw[0] + out.coulomb[0] + enerd.grpp.total().total();
        (forces, energy)
    }

    #[test]
    fn free_energy_end_states_match_unperturbed_evaluations() {
        let water = water(WaterBoxOptions {
            num_perturbed_waters: 3,
            ..WaterBoxOptions::default()
        });
        for coulomb in [CoulombInteraction::ReactionField, CoulombInteraction::Ewald] {
            let ic = Physics::new(coulomb, InteractionModifier::PotShift).build();
            let kernel_setup = setup(KernelType::Simd4xM, EwaldExclusionType::Table);
            for (lambda, end_state) in [
                (0.0, water.system.without_perturbation()),
                (1.0, water.system.to_state_b()),
            ] {
                let (forces, energy) = evaluate_perturbed(&water, &ic, lambda);
                let plain = evaluate(&end_state, &water.params, &ic, kernel_setup, 3);
                let variant =
                    select_kernel(&kernel_setup, &ic, water.params.combination_rule()).unwrap();
                let tolerance = reference_tolerance(&ic, &variant, f64::from(plain.max_force()));
                for (a, b) in forces.iter().zip(&plain.forces) {
                    assert!(f64::from((a - b).norm()) <= tolerance, "{coulomb:?} λ={lambda}");
                }
                let plain_energy = plain.vdw[0] + plain.coulomb[0];
                assert!(
                    f64::from((energy - plain_energy).abs()) <= 10.0 * tolerance,
                    "{coulomb:?} λ={lambda}"
                );
            }
        }
    }

    #[test]
    fn dispatch_before_the_pair_search_is_rejected() {
        let water = water(WaterBoxOptions::default());
        let ic = rf_with_rlist(0.6);
        let mut nbv = NonbondedVerlet::new(
            &water.system,
            water.params.clone(),
            KernelSetup::default(),
            1,
        )
        .unwrap();
        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let result = nbv.dispatch_nonbonded_kernel(
            Locality::Local,
            &ic,
            &StepWorkload::forces_only(),
            true,
            &shift_vecs,
            &mut [],
            &mut [],
        );
        assert!(matches!(result, Err(EngineError::SetupMissing)));
        let mut forces = vec![RVec::zeros(); water.system.num_atoms()];
        assert!(matches!(
            nbv.add_forces_to(Locality::Local, &mut forces),
            Err(EngineError::SetupMissing)
        ));
    }

    #[test]
    fn malformed_inputs_are_rejected_before_any_work() {
        let water = water(WaterBoxOptions::default());
        let ic = rf_with_rlist(0.6);
        let mut nbv = new_nbv(&water.system, &water.params, &ic, KernelSetup::default(), 2);
        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let step = StepWorkload::everything();
        let (mut vdw, mut coulomb) = (vec![0.0], vec![0.0]);

        let short_shifts = nbv.dispatch_nonbonded_kernel(
            Locality::Local,
            &ic,
            &step,
            true,
            &shift_vecs[..5],
            &mut vdw,
            &mut coulomb,
        );
        assert!(matches!(short_shifts, Err(EngineError::Precondition(_))));

        let wrong_groups = nbv.dispatch_nonbonded_kernel(
            Locality::Local,
            &ic,
            &step,
            true,
            &shift_vecs,
            &mut [0.0; 4],
            &mut coulomb,
        );
        assert!(matches!(wrong_groups, Err(EngineError::Precondition(_))));

        let missing_locality = nbv.dispatch_nonbonded_kernel(
            Locality::NonLocal,
            &ic,
            &step,
            true,
            &shift_vecs,
            &mut vdw,
            &mut coulomb,
        );
        assert!(matches!(missing_locality, Err(EngineError::Precondition(_))));
        assert_eq!(vdw, vec![0.0]);

        let mut short_forces = vec![RVec::zeros(); 3];
        assert!(nbv.add_forces_to(Locality::Local, &mut short_forces).is_err());
    }

    #[test]
    fn pairlists_for_another_thread_count_are_rejected() {
        let water = water(WaterBoxOptions::default());
        let ic = rf_with_rlist(0.6);
        let mut nbv =
            NonbondedVerlet::new(&water.system, water.params.clone(), KernelSetup::default(), 2)
                .unwrap();
        let result = nbv.search_pairs(&ReferencePairSearch::new(ic.rlist, 3), &water.system);
        assert!(matches!(result, Err(EngineError::Precondition(_))));
        assert!(nbv.pairlist_sets().is_none());
    }

    #[test]
    fn free_energy_lists_with_bad_indices_are_rejected() {
        let water = water(WaterBoxOptions {
            num_perturbed_waters: 1,
            ..WaterBoxOptions::default()
        });
        let ic = rf_with_rlist(0.6);
        let mut nbv = new_nbv(&water.system, &water.params, &ic, KernelSetup::default(), 2);
        let installed = nbv.pairlist_sets().unwrap().generation();

        let mut bad_shift = nbv.pairlist_sets().unwrap().local().clone();
        bad_shift.fep_lists[0].push_entry(0, 99, [(1, true)]);
        let result = nbv.set_pairlists(PairlistSets::new(bad_shift, None));
        assert!(matches!(result, Err(EngineError::Precondition(_))));

        let mut bad_atom = nbv.pairlist_sets().unwrap().local().clone();
        bad_atom.fep_lists[1].push_entry(0, 13, [(water.system.num_atoms(), true)]);
        let result = nbv.set_pairlists(PairlistSets::new(bad_atom, None));
        assert!(matches!(result, Err(EngineError::Precondition(_))));

        let mut short_flags = nbv.pairlist_sets().unwrap().local().clone();
        short_flags.fep_lists[0].push_entry(0, 13, [(1, true)]);
        short_flags.fep_lists[0].interacts.pop();
        let result = nbv.set_pairlists(PairlistSets::new(short_flags, None));
        assert!(matches!(result, Err(EngineError::Precondition(_))));

        assert_eq!(nbv.pairlist_sets().unwrap().generation(), installed);
    }

    #[test]
    fn unperturbed_systems_skip_the_free_energy_kernel() {
        let water = water(WaterBoxOptions::default());
        let ic = rf_with_rlist(0.6);
        let mut nbv = new_nbv(&water.system, &water.params, &ic, KernelSetup::default(), 1);
        assert!(!nbv.has_free_energy());
        let shift_vecs = calc_shift_vectors(&water.system.periodic_box);
        let mut force = ForceWithShiftForces::new(water.system.num_atoms(), false);
        let mut enerd = EnergyData::new(1, 0);
        let counts = nbv
            .dispatch_free_energy_kernels(
                &ic,
                &shift_vecs,
                &FepParameters::default(),
                &[0.0; FepCoupling::COUNT],
                &mut force,
                &mut enerd,
                &StepWorkload::everything(),
            )
            .unwrap();
        assert_eq!(counts, PairCounts::default());
    }
}
