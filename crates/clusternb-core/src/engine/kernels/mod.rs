//! Cluster-pair kernels.
//!
//! [`selection`] resolves a [`KernelVariant`] from the run setup; the
//! dispatch below turns the variant into one monomorphized loop by picking
//! the Coulomb strategy, the LJ strategy with its parameter source, the
//! energy output and finally the lane layout.

pub(crate) mod interactions;
mod plain;
pub mod selection;
mod simd;

use self::interactions::{
    AnalyticalEwaldCoulomb, CoulombKernel, CutVdw, EnergyAccumulator, EwaldVdw, ForceSwitchVdw,
    GeometricCombParams, KernelContext, LjParams, LorentzBerthelotCombParams,
    MatrixGridCombParams, MatrixParams, NoEnergies, PotSwitchVdw, ReactionFieldCoulomb,
    ScalarEnergies, TabulatedEwaldCoulomb, VdwKernel,
};
use self::selection::{CoulombKernelType, KernelType, KernelVariant, VdwKernelType};
use self::simd::{Layout2xMM, Layout4xM};
use super::error::EngineError;
use super::threaded_force_buffer::ThreadOutputs;
use crate::core::forcefield::interaction_const::InteractionConst;
use crate::core::forcefield::params::NonbondedParameters;
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::RVec;
use crate::core::models::pairlist::ClusterPairlist;

/// Runs `list` with the kernel `variant`, accumulating into one thread's
/// outputs. Energies are only computed when `calc_energies` is set.
pub(crate) fn run_cluster_kernel(
    variant: &KernelVariant,
    ctx: &KernelContext<'_>,
    params: &NonbondedParameters,
    ic: &InteractionConst,
    list: &ClusterPairlist,
    out: ThreadOutputs<'_>,
    calc_energies: bool,
) -> Result<(), EngineError> {
    let run = Dispatch {
        layout: variant.layout,
        ctx,
        list,
        out,
        calc_energies,
    };
    match variant.coulomb {
        CoulombKernelType::ReactionField => {
            with_coulomb(run, variant.vdw, params, ic, &ReactionFieldCoulomb::new(&ic.coulomb))
        }
        CoulombKernelType::Table | CoulombKernelType::TableTwin => {
            let table = ic.coulomb.table.as_deref().ok_or_else(|| {
                EngineError::precondition("tabulated Ewald kernel without a correction table")
            })?;
            let coulomb = TabulatedEwaldCoulomb::new(table, &ic.coulomb);
            with_coulomb(run, variant.vdw, params, ic, &coulomb)
        }
        CoulombKernelType::Ewald | CoulombKernelType::EwaldTwin => {
            with_coulomb(run, variant.vdw, params, ic, &AnalyticalEwaldCoulomb::new(&ic.coulomb))
        }
    }
}

struct Dispatch<'a, 'c> {
    layout: KernelType,
    ctx: &'a KernelContext<'c>,
    list: &'a ClusterPairlist,
    out: ThreadOutputs<'a>,
    calc_energies: bool,
}

fn with_coulomb<C: CoulombKernel>(
    run: Dispatch<'_, '_>,
    vdw: VdwKernelType,
    params: &NonbondedParameters,
    ic: &InteractionConst,
    coulomb: &C,
) -> Result<(), EngineError> {
    match vdw {
        VdwKernelType::CutCombNone => run.with_vdw(coulomb, &CutVdw::new(&ic.vdw), &MatrixParams(params)),
        VdwKernelType::CutCombGeom => {
            run.with_vdw(coulomb, &CutVdw::new(&ic.vdw), &GeometricCombParams(params))
        }
        VdwKernelType::CutCombLB => {
            run.with_vdw(coulomb, &CutVdw::new(&ic.vdw), &LorentzBerthelotCombParams(params))
        }
        VdwKernelType::ForceSwitch => {
            run.with_vdw(coulomb, &ForceSwitchVdw::new(&ic.vdw), &MatrixParams(params))
        }
        VdwKernelType::PotSwitch => {
            run.with_vdw(coulomb, &PotSwitchVdw::new(&ic.vdw), &MatrixParams(params))
        }
        VdwKernelType::EwaldCombGeom if run.layout.is_simd() => {
            run.with_vdw(coulomb, &EwaldVdw::new(&ic.vdw), &MatrixGridCombParams(params))
        }
        VdwKernelType::EwaldCombGeom => {
            run.with_vdw(coulomb, &EwaldVdw::new(&ic.vdw), &MatrixParams(params))
        }
        VdwKernelType::EwaldCombLB => Err(EngineError::UnsupportedKernel(format!(
            "{} has no kernel implementation",
            vdw.name()
        ))),
    }
}

impl Dispatch<'_, '_> {
    fn with_vdw<C: CoulombKernel, V: VdwKernel, P: LjParams>(
        self,
        coulomb: &C,
        vdw: &V,
        lj: &P,
    ) -> Result<(), EngineError> {
        let ThreadOutputs {
            force,
            shift_forces,
            energies,
            ..
        } = self.out;
        let outputs = LayoutRun {
            layout: self.layout,
            ctx: self.ctx,
            list: self.list,
            force,
            shift_forces,
        };

        if !self.calc_energies {
            outputs.run::<C, V, P, NoEnergies, false>(coulomb, vdw, lj, &mut NoEnergies);
        } else if energies.num_groups() > 1 {
            outputs.run::<C, V, P, GroupPairEnergies, true>(coulomb, vdw, lj, energies);
        } else {
            let mut totals = ScalarEnergies::default();
            outputs.run::<C, V, P, ScalarEnergies, true>(coulomb, vdw, lj, &mut totals);
            totals.flush_into(energies);
        }
        Ok(())
    }
}

struct LayoutRun<'a, 'c> {
    layout: KernelType,
    ctx: &'a KernelContext<'c>,
    list: &'a ClusterPairlist,
    force: &'a mut [RVec],
    shift_forces: &'a mut [RVec],
}

impl LayoutRun<'_, '_> {
    fn run<C, V, P, E, const CALC_ENERGIES: bool>(self, coulomb: &C, vdw: &V, lj: &P, energies: &mut E)
    where
        C: CoulombKernel,
        V: VdwKernel,
        P: LjParams,
        E: EnergyAccumulator,
    {
        let Self {
            layout,
            ctx,
            list,
            force,
            shift_forces,
        } = self;
        match layout {
            KernelType::Plain4x4 => plain::kernel::<C, V, P, E, CALC_ENERGIES>(
                ctx,
                coulomb,
                vdw,
                lj,
                list,
                force,
                shift_forces,
                energies,
            ),
            KernelType::Simd4xM => simd::kernel::<Layout4xM, C, V, P, E, CALC_ENERGIES>(
                ctx,
                coulomb,
                vdw,
                lj,
                list,
                force,
                shift_forces,
                energies,
            ),
            KernelType::Simd2xMM => simd::kernel::<Layout2xMM, C, V, P, E, CALC_ENERGIES>(
                ctx,
                coulomb,
                vdw,
                lj,
                list,
                force,
                shift_forces,
                energies,
            ),
        }
    }
}
