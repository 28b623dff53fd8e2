//! Threaded dispatch of the free-energy kernel.
//!
//! The perturbed pairs of all localities are evaluated by the same set of
//! threads: thread `t` runs list `t` of every locality into its own buffer,
//! after which the buffers are reduced in thread order. When foreign lambda
//! points are configured, a second pass per point computes only energies and
//! dV/dλ into a force-less buffer.

use super::kernel::{FepKernelFlags, FreeEnergyInputs, free_energy_kernel};
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::Real;
use crate::core::models::pairlist_set::{PairlistSet, PairlistSets};
use crate::core::models::shift::NUM_SHIFTS;
use crate::engine::config::StepWorkload;
use crate::engine::counters::PairCounts;
use crate::engine::energy::{EnergyData, FepCoupling};
use crate::engine::error::{EngineError, check_length};
use crate::engine::forces::ForceWithShiftForces;
use crate::engine::threaded_force_buffer::ThreadedForceBuffer;
use tracing::{debug, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct FreeEnergyDispatch {
    force_buffer: ThreadedForceBuffer,
    foreign_buffer: ThreadedForceBuffer,
    foreign_grpp: GroupPairEnergies,
    /// Generation of the pairlists the buffers were set up for.
    setup_generation: Option<u64>,
}

impl FreeEnergyDispatch {
    pub fn new(num_threads: usize, num_energy_groups: usize) -> Result<Self, EngineError> {
        Ok(Self {
            force_buffer: ThreadedForceBuffer::new(num_threads, true, num_energy_groups)?,
            foreign_buffer: ThreadedForceBuffer::new(num_threads, true, num_energy_groups)?,
            foreign_grpp: GroupPairEnergies::new(num_energy_groups),
            setup_generation: None,
        })
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.force_buffer.num_threads()
    }

    pub fn force_buffer(&self) -> &ThreadedForceBuffer {
        &self.force_buffer
    }

    /// Marks the atoms every thread touches through its free-energy lists
    /// in all localities. Must be called after each pair search.
    #[instrument(skip_all, name = "fep_buffer_setup")]
    pub fn setup_fep_threaded_force_buffer(
        &mut self,
        num_atoms_force: usize,
        pairlist_sets: &PairlistSets,
    ) -> Result<(), EngineError> {
        let num_threads = self.num_threads();
        for set in pairlist_sets.iter() {
            check_length("free-energy pairlists", num_threads, set.fep_lists.len())?;
            check_fep_lists(set, num_atoms_force)?;
        }

        self.force_buffer.setup(num_atoms_force, |t| {
            pairlist_sets
                .iter()
                .flat_map(move |set| set.fep_lists[t].touched_atoms())
        })?;
        self.foreign_buffer.setup(0, |_| std::iter::empty())?;
        self.setup_generation = Some(pairlist_sets.generation());

        debug!(
            num_atoms_force,
            num_threads,
            used_blocks = self.force_buffer.used_blocks().len(),
            "Free-energy buffers set up."
        );
        Ok(())
    }

    fn validate(
        &self,
        pairlist_sets: &PairlistSets,
        inputs: &FreeEnergyInputs<'_>,
        lambda: &[Real],
        force: &ForceWithShiftForces,
        enerd: &EnergyData,
        step_work: &StepWorkload,
    ) -> Result<(), EngineError> {
        check_length("lambda", FepCoupling::COUNT, lambda.len())?;
        if self.setup_generation != Some(pairlist_sets.generation()) {
            return Err(EngineError::SetupMissing);
        }
        for set in pairlist_sets.iter() {
            check_length("free-energy pairlists", self.num_threads(), set.fep_lists.len())?;
        }

        let atoms = inputs.atoms;
        let n = self.force_buffer.num_atoms_force();
        for set in pairlist_sets.iter() {
            check_fep_lists(set, n)?;
        }
        check_length("coordinates", n, inputs.x.len())?;
        check_length("A-state charges", n, atoms.charge_a.len())?;
        check_length("B-state charges", n, atoms.charge_b.len())?;
        check_length("A-state types", n, atoms.type_a.len())?;
        check_length("B-state types", n, atoms.type_b.len())?;
        check_length("energy groups", n, atoms.energy_groups.len())?;
        check_length("shift vectors", NUM_SHIFTS, inputs.shift_vecs.len())?;
        if step_work.compute_forces && force.force().len() < n {
            return Err(EngineError::precondition(format!(
                "force output holds {} atoms, the free-energy buffer {n}",
                force.force().len()
            )));
        }

        let num_types = inputs.params.num_types();
        if let Some(&t) = atoms
            .type_a
            .iter()
            .chain(&atoms.type_b)
            .find(|&&t| t >= num_types)
        {
            return Err(EngineError::precondition(format!(
                "atom type {t} outside the {num_types} parameter types"
            )));
        }
        let num_groups = self.foreign_grpp.num_groups();
        check_length("energy group matrix", num_groups, enerd.grpp.num_groups())?;
        if let Some(&g) = atoms.energy_groups.iter().find(|&&g| g >= num_groups) {
            return Err(EngineError::precondition(format!(
                "energy group {g} outside the {num_groups} groups"
            )));
        }

        inputs.fep.validate()?;
        let num_foreign = inputs.fep.num_foreign_lambdas();
        if num_foreign > 0 && step_work.compute_dhdl {
            check_length(
                "foreign lambda terms",
                num_foreign + 1,
                enerd.foreign_lambda_terms.num_lambdas(),
            )?;
        }
        Ok(())
    }

    /// Evaluates every perturbed pair at `lambda` and adds forces, shift
    /// forces, group-pair energies and dV/dλ to the outputs. With foreign
    /// lambdas and `compute_dhdl`, also fills `enerd.foreign_lambda_terms`,
    /// slot 0 holding the current λ.
    ///
    /// All inputs are checked before any thread starts; on error the
    /// outputs are untouched.
    #[instrument(skip_all, name = "free_energy_dispatch")]
    pub fn dispatch_free_energy_kernels(
        &mut self,
        pairlist_sets: &PairlistSets,
        inputs: &FreeEnergyInputs<'_>,
        lambda: &[Real],
        force: &mut ForceWithShiftForces,
        enerd: &mut EnergyData,
        step_work: &StepWorkload,
    ) -> Result<PairCounts, EngineError> {
        self.validate(pairlist_sets, inputs, lambda, force, enerd, step_work)?;
        let lambda: [Real; FepCoupling::COUNT] = std::array::from_fn(|c| lambda[c]);

        if !pairlist_sets.iter().any(|set| set.has_fep_pairs()) {
            trace!("No perturbed pairs, skipping the free-energy kernel.");
            return Ok(PairCounts::default());
        }

        let flags = FepKernelFlags {
            compute_forces: step_work.compute_forces,
            compute_virial: step_work.compute_virial,
            compute_energy: step_work.compute_energy,
        };
        let counts = run_threads(&mut self.force_buffer, pairlist_sets, inputs, &lambda, flags);
        if counts.num_excluded_beyond_rlist > 0 {
            return Err(EngineError::PerturbedExclusionBeyondCutoff {
                count: counts.num_excluded_beyond_rlist,
            });
        }

        let mut dvdl = [0.0; FepCoupling::COUNT];
        self.force_buffer
            .reduce(Some(force), Some(&mut enerd.grpp), &mut dvdl, step_work, 0);
        if step_work.compute_energy {
            enerd.grpp.fold();
        }
        let dvdl_out = if inputs.fep.sc_alpha != 0.0 {
            &mut enerd.dvdl_nonlin
        } else {
            &mut enerd.dvdl_lin
        };
        for (out, d) in dvdl_out.iter_mut().zip(dvdl) {
            *out += d;
        }

        let num_foreign = inputs.fep.num_foreign_lambdas();
        if num_foreign > 0 && step_work.compute_dhdl {
            self.evaluate_foreign_lambdas(pairlist_sets, inputs, &lambda, enerd);
        }

        debug!(
            num_pairs = counts.num_pairs,
            within_cutoff = counts.num_pairs_within_cutoff,
            num_foreign,
            "Free-energy kernels done."
        );
        Ok(counts)
    }

    fn evaluate_foreign_lambdas(
        &mut self,
        pairlist_sets: &PairlistSets,
        inputs: &FreeEnergyInputs<'_>,
        lambda: &[Real; FepCoupling::COUNT],
        enerd: &mut EnergyData,
    ) {
        let flags = FepKernelFlags {
            compute_forces: false,
            compute_virial: false,
            compute_energy: true,
        };
        let step_work = StepWorkload {
            compute_forces: false,
            compute_virial: false,
            compute_energy: true,
            compute_dhdl: true,
        };
        let points = std::iter::once(*lambda)
            .chain((0..inputs.fep.num_foreign_lambdas()).map(|k| inputs.fep.foreign_lambda(k)));

        for (k, point) in points.enumerate() {
            run_threads(&mut self.foreign_buffer, pairlist_sets, inputs, &point, flags);
            self.foreign_grpp.clear();
            let mut dvdl = [0.0; FepCoupling::COUNT];
            self.foreign_buffer
                .reduce(None, Some(&mut self.foreign_grpp), &mut dvdl, &step_work, 0);
            let energy = self.foreign_grpp.total().total();
            let dvdl_sum = dvdl[FepCoupling::Coul.index()] + dvdl[FepCoupling::Vdw.index()];
            enerd.foreign_lambda_terms.accumulate(k, energy, dvdl_sum);
        }
    }
}

/// Clears every thread buffer and runs thread `t` over list `t` of each
/// locality.
fn run_threads(
    buffer: &mut ThreadedForceBuffer,
    pairlist_sets: &PairlistSets,
    inputs: &FreeEnergyInputs<'_>,
    lambda: &[Real; FepCoupling::COUNT],
    flags: FepKernelFlags,
) -> PairCounts {
    #[cfg(not(feature = "parallel"))]
    let iterator = buffer.thread_buffers_mut().iter_mut().enumerate();
    #[cfg(feature = "parallel")]
    let iterator = buffer.thread_buffers_mut().par_iter_mut().enumerate();

    iterator
        .map(|(t, thread)| {
            thread.clear_forces_and_energies();
            let mut out = thread.outputs_mut();
            pairlist_sets
                .iter()
                .map(|set| free_energy_kernel(&set.fep_lists[t], inputs, lambda, flags, &mut out))
                .sum::<PairCounts>()
        })
        .sum()
}

fn check_fep_lists(set: &PairlistSet, num_atoms: usize) -> Result<(), EngineError> {
    for list in &set.fep_lists {
        list.validate(num_atoms)
            .map_err(|e| EngineError::precondition(format!("free-energy pairlist: {e}")))?;
    }
    Ok(())
}
