//! Lane-layout kernels.
//!
//! A cluster pair is processed in rows of `SIMD_WIDTH` lanes. Within a row
//! every lane goes through the same arithmetic: masked lanes get a safe
//! distance and their results are dropped by selection rather than by
//! branching, so each row compiles to straight-line, vectorizable code.
//!
//! | layout | J | rows | lane `k` of row `r` |
//! |--------|---|------|---------------------|
//! | 4xM    | W | 4    | `(r, k)`            |
//! | 2xMM   | W/2 | 2  | `(2r + k / J, k % J)` |

use super::interactions::{
    CoulombKernel, EnergyAccumulator, ICluster, KernelContext, LjParams, VdwKernel,
    add_self_energies,
};
use crate::core::math::{MIN_DISTANCE_SQUARED, RVec, Real, SIMD_WIDTH, inv_sqrt};
use crate::core::models::atom_data::{I_CLUSTER_SIZE, unpack_energy_group};
use crate::core::models::pairlist::{CiFlags, CjEntry, ClusterPairlist};

/// Mapping of SIMD lanes onto the `4 × J` atom pairs of a cluster pair.
pub(crate) trait ClusterLayout {
    const J: usize;
    const ROWS: usize;

    /// `(i, j)` cluster-local atoms handled by `lane` of `row`.
    fn lane(row: usize, lane: usize) -> (usize, usize);
}

pub(crate) struct Layout4xM;

impl ClusterLayout for Layout4xM {
    const J: usize = SIMD_WIDTH;
    const ROWS: usize = I_CLUSTER_SIZE;

    #[inline(always)]
    fn lane(row: usize, lane: usize) -> (usize, usize) {
        (row, lane)
    }
}

pub(crate) struct Layout2xMM;

impl ClusterLayout for Layout2xMM {
    const J: usize = SIMD_WIDTH / 2;
    const ROWS: usize = I_CLUSTER_SIZE / 2;

    #[inline(always)]
    fn lane(row: usize, lane: usize) -> (usize, usize) {
        (2 * row + lane / Self::J, lane % Self::J)
    }
}

type Lanes<T> = [T; SIMD_WIDTH];

#[allow(clippy::too_many_arguments)]
pub(super) fn kernel<L, C, V, P, E, const CALC_ENERGIES: bool>(
    ctx: &KernelContext<'_>,
    coulomb: &C,
    vdw: &V,
    lj: &P,
    list: &ClusterPairlist,
    force: &mut [RVec],
    shift_forces: &mut [RVec],
    energies: &mut E,
) where
    L: ClusterLayout,
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
            let block = Block {
                ctx,
                coulomb,
                vdw,
                lj,
                i: &i,
                cj,
            };
            match (cj.excl != full_mask, half_lj, do_coul) {
                (true, true, _) => block
                    .run::<L, E, true, true, true, CALC_ENERGIES>(&mut fi, force, energies),
                (true, false, true) => block
                    .run::<L, E, true, false, true, CALC_ENERGIES>(&mut fi, force, energies),
                (true, false, false) => block
                    .run::<L, E, true, false, false, CALC_ENERGIES>(&mut fi, force, energies),
                (false, true, _) => block
                    .run::<L, E, false, true, true, CALC_ENERGIES>(&mut fi, force, energies),
                (false, false, true) => block
                    .run::<L, E, false, false, true, CALC_ENERGIES>(&mut fi, force, energies),
                (false, false, false) => block
                    .run::<L, E, false, false, false, CALC_ENERGIES>(&mut fi, force, energies),
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

/// One i-cluster against one j-cluster.
struct Block<'a, 'c, C, V, P> {
    ctx: &'a KernelContext<'c>,
    coulomb: &'a C,
    vdw: &'a V,
    lj: &'a P,
    i: &'a ICluster,
    cj: &'a CjEntry,
}

impl<C, V, P> Block<'_, '_, C, V, P>
where
    C: CoulombKernel,
    V: VdwKernel,
    P: LjParams,
{
    #[inline(always)]
    fn run<
        L: ClusterLayout,
        E: EnergyAccumulator,
        const CHECK_EXCLS: bool,
        const HALF_LJ: bool,
        const CALC_COULOMB: bool,
        const CALC_ENERGIES: bool,
    >(
        &self,
        fi: &mut [RVec; I_CLUSTER_SIZE],
        force: &mut [RVec],
        energies: &mut E,
    ) {
        let (ctx, i, cj) = (self.ctx, self.i, self.cj);
        let excl_forces = CHECK_EXCLS && (CALC_COULOMB || V::LJ_EWALD);
        let atoms = ctx.atoms;
        let first_j = cj.cj * L::J;
        let groups_j = if E::GROUPS { atoms.packed_groups_j(cj.cj) } else { 0 };
        let safe_rsq = 0.25 * ctx.rcut2;

        let mut fj = [RVec::zeros(); SIMD_WIDTH];

        for row in 0..L::ROWS {
            let row_lj = !HALF_LJ || L::lane(row, 0).0 < I_CLUSTER_SIZE / 2;

            let mut dx: Lanes<RVec> = [RVec::zeros(); SIMD_WIDTH];
            let mut rsq: Lanes<Real> = [0.0; SIMD_WIDTH];
            let mut interact: Lanes<Real> = [1.0; SIMD_WIDTH];
            let mut wco: Lanes<bool> = [false; SIMD_WIDTH];

            for k in 0..SIMD_WIDTH {
                let (ii, jj) = L::lane(row, k);
                let aj = first_j + jj;
                dx[k] = i.x[ii] - atoms.x[aj];
                rsq[k] = dx[k].norm_squared();
                if CHECK_EXCLS {
                    interact[k] = ((cj.excl >> (ii * L::J + jj)) & 1) as Real;
                }
                let mut within = rsq[k] < ctx.rcut2;
                if excl_forces {
                    within &= !(i.central && aj <= i.first + ii);
                    within &= rsq[k] >= MIN_DISTANCE_SQUARED;
                } else if CHECK_EXCLS {
                    within &= interact[k] != 0.0;
                }
                wco[k] = within;
            }

            let mut fscal: Lanes<Real> = [0.0; SIMD_WIDTH];
            let mut v_vdw: Lanes<Real> = [0.0; SIMD_WIDTH];
            let mut v_coul: Lanes<Real> = [0.0; SIMD_WIDTH];

            for k in 0..SIMD_WIDTH {
                let (ii, jj) = L::lane(row, k);
                let aj = first_j + jj;
                let r2 = if wco[k] { rsq[k] } else { safe_rsq };
                let rinv = inv_sqrt(r2);
                let rinvsq = rinv * rinv;

                let mut f = 0.0;
                if row_lj {
                    let [c6, c12] = self.lj.c6_c12(i.types[ii], atoms.types[aj]);
                    let c6_grid = if V::LJ_EWALD {
                        self.lj.c6_grid(i.types[ii], atoms.types[aj])
                    } else {
                        0.0
                    };
                    let (fr, v) = self.vdw.force_energy::<CALC_ENERGIES>(
                        c6,
                        c12,
                        c6_grid,
                        r2,
                        rinv,
                        rinvsq,
                        interact[k],
                    );
                    let lj_mask = wco[k] && (!ctx.twin || r2 < ctx.rvdw2);
                    f += if lj_mask { fr * rinvsq } else { 0.0 };
                    v_vdw[k] = if lj_mask { v } else { 0.0 };
                }
                if CALC_COULOMB {
                    let (fc, vc) = self.coulomb.force_energy::<CALC_ENERGIES>(
                        i.q[ii] * atoms.q[aj],
                        r2,
                        rinv,
                        rinvsq,
                        interact[k],
                    );
                    f += fc;
                    v_coul[k] = if wco[k] { vc } else { 0.0 };
                }
                fscal[k] = if wco[k] { f } else { 0.0 };
            }

            for k in 0..SIMD_WIDTH {
                let (ii, jj) = L::lane(row, k);
                let f = dx[k] * fscal[k];
                fi[ii] += f;
                fj[jj] -= f;
                if CALC_ENERGIES {
                    energies.add(
                        i.groups[ii],
                        unpack_energy_group(groups_j, jj),
                        v_vdw[k],
                        v_coul[k],
                    );
                }
            }
        }

        for (jj, f) in fj.iter().take(L::J).enumerate() {
            force[first_j + jj] += f;
        }
    }
}
