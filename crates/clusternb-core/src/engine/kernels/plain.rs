//! Scalar 4×4 cluster-pair kernel.
//!
//! Loops over every atom pair of a cluster pair with early exits for pairs
//! beyond the cut-off and excluded pairs that need no correction. This is
//! the kernel that runs everywhere; the layout kernels must reproduce it.

use super::interactions::{
    CoulombKernel, EnergyAccumulator, ICluster, KernelContext, LjParams, VdwKernel,
    add_self_energies,
};
use crate::core::math::{MIN_DISTANCE_SQUARED, RVec, Real, inv_sqrt};
use crate::core::models::atom_data::{I_CLUSTER_SIZE, unpack_energy_group};
use crate::core::models::pairlist::{CiFlags, CjEntry, ClusterPairlist};

const J_CLUSTER_SIZE: usize = 4;

#[allow(clippy::too_many_arguments)]
pub(super) fn kernel<C, V, P, E, const CALC_ENERGIES: bool>(
    ctx: &KernelContext<'_>,
    coulomb: &C,
    vdw: &V,
    lj: &P,
    list: &ClusterPairlist,
    force: &mut [RVec],
    shift_forces: &mut [RVec],
    energies: &mut E,
) where
    C: CoulombKernel,
    V: VdwKernel,
    P: LjParams,
    E: EnergyAccumulator,
{
    let full_mask = list.full_mask();

    for entry in &list.ci {
        let flags = entry.flags;
        let do_lj = flags.contains(CiFlags::DO_LJ);
        let do_coul = flags.contains(CiFlags::DO_COUL);
        let half_lj = (flags.contains(CiFlags::HALF_LJ) || !do_lj) && do_coul;

        let i = ICluster::load(ctx, entry.ci, entry.shift);
        let mut fi = [RVec::zeros(); I_CLUSTER_SIZE];

        if CALC_ENERGIES && flags.contains(CiFlags::DO_SELF) {
            add_self_energies(ctx, vdw, lj, &i, do_coul, energies);
        }

        for cj in list.cj_entries(entry) {
            let args = (ctx, coulomb, vdw, lj, &i, cj);
            match (cj.excl != full_mask, half_lj, do_coul) {
                (true, true, _) => pair_block::<C, V, P, E, true, true, true, CALC_ENERGIES>(
                    args, &mut fi, force, energies,
                ),
                (true, false, true) => pair_block::<C, V, P, E, true, false, true, CALC_ENERGIES>(
                    args, &mut fi, force, energies,
                ),
                (true, false, false) => {
                    pair_block::<C, V, P, E, true, false, false, CALC_ENERGIES>(
                        args, &mut fi, force, energies,
                    )
                }
                (false, true, _) => pair_block::<C, V, P, E, false, true, true, CALC_ENERGIES>(
                    args, &mut fi, force, energies,
                ),
                (false, false, true) => {
                    pair_block::<C, V, P, E, false, false, true, CALC_ENERGIES>(
                        args, &mut fi, force, energies,
                    )
                }
                (false, false, false) => {
                    pair_block::<C, V, P, E, false, false, false, CALC_ENERGIES>(
                        args, &mut fi, force, energies,
                    )
                }
            }
        }

        for (k, f) in fi.iter().enumerate() {
            force[i.first + k] += f;
        }
        if ctx.compute_virial {
            shift_forces[entry.shift] += fi.iter().sum::<RVec>();
        }
    }
}

type PairArgs<'a, 'c, C, V, P> = (
    &'a KernelContext<'c>,
    &'a C,
    &'a V,
    &'a P,
    &'a ICluster,
    &'a CjEntry,
);

#[inline(always)]
fn pair_block<
    C,
    V,
    P,
    E,
    const CHECK_EXCLS: bool,
    const HALF_LJ: bool,
    const CALC_COULOMB: bool,
    const CALC_ENERGIES: bool,
>(
    (ctx, coulomb, vdw, lj, i, cj): PairArgs<'_, '_, C, V, P>,
    fi: &mut [RVec; I_CLUSTER_SIZE],
    force: &mut [RVec],
    energies: &mut E,
) where
    C: CoulombKernel,
    V: VdwKernel,
    P: LjParams,
    E: EnergyAccumulator,
{
    let excl_forces = CHECK_EXCLS && (CALC_COULOMB || V::LJ_EWALD);
    let atoms = ctx.atoms;
    let first_j = cj.cj * J_CLUSTER_SIZE;
    let groups_j = if E::GROUPS { atoms.packed_groups_j(cj.cj) } else { 0 };

    for j in 0..J_CLUSTER_SIZE {
        let aj = first_j + j;
        let xj = atoms.x[aj];
        let tj = atoms.types[aj];
        let qj = atoms.q[aj];
        let gj = unpack_energy_group(groups_j, j);
        let mut fj = RVec::zeros();

        for ii in 0..I_CLUSTER_SIZE {
            let d = i.x[ii] - xj;
            let rsq = d.norm_squared();
            if rsq >= ctx.rcut2 {
                continue;
            }

            let interact: Real = if CHECK_EXCLS {
                ((cj.excl >> (ii * J_CLUSTER_SIZE + j)) & 1) as Real
            } else {
                1.0
            };
            if excl_forces {
                // Excluded pairs within the cut-off still get their
                // correction, each pair once and never an atom with itself.
                if (i.central && aj <= i.first + ii) || rsq < MIN_DISTANCE_SQUARED {
                    continue;
                }
            } else if CHECK_EXCLS && interact == 0.0 {
                continue;
            }

            let rinv = inv_sqrt(rsq);
            let rinvsq = rinv * rinv;
            let mut fscal = 0.0;
            let (mut v_vdw, mut v_coul) = (0.0, 0.0);

            if !HALF_LJ || ii < I_CLUSTER_SIZE / 2 {
                let [c6, c12] = lj.c6_c12(i.types[ii], tj);
                let c6_grid = if V::LJ_EWALD { lj.c6_grid(i.types[ii], tj) } else { 0.0 };
                let (fr, v) =
                    vdw.force_energy::<CALC_ENERGIES>(c6, c12, c6_grid, rsq, rinv, rinvsq, interact);
                if !ctx.twin || rsq < ctx.rvdw2 {
                    fscal += fr * rinvsq;
                    v_vdw = v;
                }
            }
            if CALC_COULOMB {
                let (fc, vc) =
                    coulomb.force_energy::<CALC_ENERGIES>(i.q[ii] * qj, rsq, rinv, rinvsq, interact);
                fscal += fc;
                v_coul = vc;
            }

            let f = d * fscal;
            fi[ii] += f;
            fj -= f;
            if CALC_ENERGIES {
                energies.add(i.groups[ii], gj, v_vdw, v_coul);
            }
        }
        force[aj] += fj;
    }
}
