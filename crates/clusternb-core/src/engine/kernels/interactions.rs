//! Per-pair physics shared by the plain and SIMD-layout kernels.
//!
//! The Coulomb flavour, the LJ flavour, the source of the LJ parameters and
//! the energy output are separate strategy types, so every combination is
//! monomorphized into its own loop with no per-pair dispatch.

use crate::core::forcefield::ewald::{EwaldCorrectionTable, ewald_lr_force, ewald_lr_potential};
use crate::core::forcefield::interaction_const::{
    CoulombConst, InteractionConst, ShiftConsts, SwitchConsts, VdwConst,
};
use crate::core::forcefield::params::{NonbondedParameters, lorentz_berthelot_pair};
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::{RVec, Real};
use crate::core::models::atom_data::{AtomData, I_CLUSTER_SIZE, unpack_energy_group};
use crate::core::models::shift::CENTRAL_SHIFT;

/// Read-only inputs of one kernel call.
pub(crate) struct KernelContext<'a> {
    pub atoms: &'a AtomData,
    pub shift_vecs: &'a [RVec],
    pub epsfac: Real,
    pub rcut2: Real,
    pub rvdw2: Real,
    pub twin: bool,
    pub self_coulomb: Real,
    pub compute_virial: bool,
}

impl<'a> KernelContext<'a> {
    pub fn new(
        atoms: &'a AtomData,
        shift_vecs: &'a [RVec],
        ic: &InteractionConst,
        compute_virial: bool,
    ) -> Self {
        let rc = ic.max_cutoff();
        Self {
            atoms,
            shift_vecs,
            epsfac: ic.coulomb.epsfac,
            rcut2: rc * rc,
            rvdw2: ic.vdw.cutoff * ic.vdw.cutoff,
            twin: ic.is_twin_cutoff(),
            self_coulomb: ic.coulomb.self_energy_factor(),
            compute_virial,
        }
    }
}

/// The shifted i-cluster of a list entry.
pub(crate) struct ICluster {
    pub first: usize,
    pub central: bool,
    pub x: [RVec; I_CLUSTER_SIZE],
    /// Charges times the electrostatic prefactor.
    pub q: [Real; I_CLUSTER_SIZE],
    pub types: [usize; I_CLUSTER_SIZE],
    pub groups: [usize; I_CLUSTER_SIZE],
}

impl ICluster {
    #[inline(always)]
    pub fn load(ctx: &KernelContext<'_>, ci: usize, shift: usize) -> Self {
        let atoms = ctx.atoms;
        let first = ci * I_CLUSTER_SIZE;
        let shift_vec = ctx.shift_vecs[shift];
        let packed = atoms.packed_groups_i(ci);
        Self {
            first,
            central: shift == CENTRAL_SHIFT,
            x: std::array::from_fn(|k| atoms.x[first + k] + shift_vec),
            q: std::array::from_fn(|k| ctx.epsfac * atoms.q[first + k]),
            types: std::array::from_fn(|k| atoms.types[first + k]),
            groups: std::array::from_fn(|k| unpack_energy_group(packed, k)),
        }
    }
}

pub(crate) trait CoulombKernel: Sync {
    /// `(F/r, V)` for `qq = epsfac·q_i·q_j`. `interact` is 1 for
    /// interacting pairs and 0 for excluded ones, which keep only the
    /// reaction-field or Ewald correction.
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        qq: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real);
}

pub(crate) struct ReactionFieldCoulomb {
    k_rf: Real,
    c_rf: Real,
}

impl ReactionFieldCoulomb {
    pub fn new(coulomb: &CoulombConst) -> Self {
        Self {
            k_rf: coulomb.k_rf,
            c_rf: coulomb.c_rf,
        }
    }
}

impl CoulombKernel for ReactionFieldCoulomb {
    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        qq: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        let f = qq * (interact * rinv * rinvsq - 2.0 * self.k_rf);
        let v = if CALC_ENERGIES {
            qq * (interact * rinv + self.k_rf * rsq - self.c_rf)
        } else {
            0.0
        };
        (f, v)
    }
}

pub(crate) struct TabulatedEwaldCoulomb<'a> {
    table: &'a EwaldCorrectionTable,
    sh_ewald: Real,
}

impl<'a> TabulatedEwaldCoulomb<'a> {
    pub fn new(table: &'a EwaldCorrectionTable, coulomb: &CoulombConst) -> Self {
        Self {
            table,
            sh_ewald: coulomb.sh_ewald,
        }
    }
}

impl CoulombKernel for TabulatedEwaldCoulomb<'_> {
    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        qq: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        let (f_excl, v_excl) = self.table.lookup(rsq * rinv);
        let f = qq * rinv * (interact * rinvsq - f_excl);
        let v = if CALC_ENERGIES {
            qq * (interact * (rinv - self.sh_ewald) - v_excl)
        } else {
            0.0
        };
        (f, v)
    }
}

pub(crate) struct AnalyticalEwaldCoulomb {
    beta: f64,
    sh_ewald: Real,
}

impl AnalyticalEwaldCoulomb {
    pub fn new(coulomb: &CoulombConst) -> Self {
        Self {
            beta: f64::from(coulomb.ewald_coeff),
            sh_ewald: coulomb.sh_ewald,
        }
    }
}

impl CoulombKernel for AnalyticalEwaldCoulomb {
    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        qq: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        let r = f64::from(rsq * rinv);
        let f_excl = ewald_lr_force(self.beta, r) as Real;
        let f = qq * rinv * (interact * rinvsq - f_excl);
        let v = if CALC_ENERGIES {
            let v_excl = ewald_lr_potential(self.beta, r) as Real;
            qq * (interact * (rinv - self.sh_ewald) - v_excl)
        } else {
            0.0
        };
        (f, v)
    }
}

pub(crate) trait VdwKernel: Sync {
    /// Adds the LJ-PME grid correction, also to excluded pairs.
    const LJ_EWALD: bool;

    /// `(F·r, V)` for premultiplied `6·C6`, `12·C12` and grid `6·C6`.
    #[allow(clippy::too_many_arguments)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        c6: Real,
        c12: Real,
        c6_grid: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real);

    /// Self-interaction energy of an atom with grid parameter `c6_grid`.
    #[inline(always)]
    fn self_energy(&self, _c6_grid: Real) -> Real {
        0.0
    }
}

/// Plain or potential-shifted `r⁻¹²`/`r⁻⁶` terms.
#[inline(always)]
fn shifted_lj<const CALC_ENERGIES: bool>(
    c6: Real,
    c12: Real,
    rinvsq: Real,
    cpot6: Real,
    cpot12: Real,
) -> (Real, Real) {
    let rinvsix = rinvsq * rinvsq * rinvsq;
    let fr6 = c6 * rinvsix;
    let fr12 = c12 * rinvsix * rinvsix;
    let v = if CALC_ENERGIES {
        (fr12 + c12 * cpot12) / 12.0 - (fr6 + c6 * cpot6) / 6.0
    } else {
        0.0
    };
    (fr12 - fr6, v)
}

pub(crate) struct CutVdw {
    cpot6: Real,
    cpot12: Real,
}

impl CutVdw {
    pub fn new(vdw: &VdwConst) -> Self {
        Self {
            cpot6: vdw.dispersion_shift.cpot,
            cpot12: vdw.repulsion_shift.cpot,
        }
    }
}

impl VdwKernel for CutVdw {
    const LJ_EWALD: bool = false;

    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        c6: Real,
        c12: Real,
        _c6_grid: Real,
        _rsq: Real,
        _rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        shifted_lj::<CALC_ENERGIES>(interact * c6, interact * c12, rinvsq, self.cpot6, self.cpot12)
    }
}

pub(crate) struct ForceSwitchVdw {
    r_switch: Real,
    dispersion: ShiftConsts,
    repulsion: ShiftConsts,
}

impl ForceSwitchVdw {
    pub fn new(vdw: &VdwConst) -> Self {
        Self {
            r_switch: vdw.switch_radius,
            dispersion: vdw.dispersion_shift,
            repulsion: vdw.repulsion_shift,
        }
    }
}

impl VdwKernel for ForceSwitchVdw {
    const LJ_EWALD: bool = false;

    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        c6: Real,
        c12: Real,
        _c6_grid: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        let (c6, c12) = (interact * c6, interact * c12);
        let (disp, rep) = (&self.dispersion, &self.repulsion);
        let (mut fr, mut v) =
            shifted_lj::<CALC_ENERGIES>(c6, c12, rinvsq, disp.cpot, rep.cpot);

        let r = rsq * rinv;
        let t = (r - self.r_switch).max(0.0);
        let t2 = t * t;
        fr += -c6 * (disp.c2 + disp.c3 * t) * t2 * r + c12 * (rep.c2 + rep.c3 * t) * t2 * r;
        if CALC_ENERGIES {
            v += -c6 * (-disp.c2 / 3.0 - disp.c3 / 4.0 * t) * t2 * t
                + c12 * (-rep.c2 / 3.0 - rep.c3 / 4.0 * t) * t2 * t;
        }
        (fr, v)
    }
}

pub(crate) struct PotSwitchVdw {
    r_switch: Real,
    switch: SwitchConsts,
}

impl PotSwitchVdw {
    pub fn new(vdw: &VdwConst) -> Self {
        Self {
            r_switch: vdw.switch_radius,
            switch: vdw.pot_switch,
        }
    }
}

impl VdwKernel for PotSwitchVdw {
    const LJ_EWALD: bool = false;

    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        c6: Real,
        c12: Real,
        _c6_grid: Real,
        rsq: Real,
        rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        // The switched force needs the unswitched energy.
        let (fr, v) = shifted_lj::<true>(interact * c6, interact * c12, rinvsq, 0.0, 0.0);
        let r = rsq * rinv;
        let (sw, dsw) = self.switch.evaluate((r - self.r_switch).max(0.0));
        (fr * sw - r * v * dsw, v * sw)
    }
}

pub(crate) struct EwaldVdw {
    cpot6: Real,
    cpot12: Real,
    beta2: Real,
    beta6_6: Real,
    sh_lj_ewald: Real,
}

impl EwaldVdw {
    pub fn new(vdw: &VdwConst) -> Self {
        let beta2 = vdw.ewald_coeff * vdw.ewald_coeff;
        Self {
            cpot6: vdw.dispersion_shift.cpot,
            cpot12: vdw.repulsion_shift.cpot,
            beta2,
            beta6_6: beta2 * beta2 * beta2 / 6.0,
            sh_lj_ewald: vdw.sh_lj_ewald,
        }
    }
}

impl VdwKernel for EwaldVdw {
    const LJ_EWALD: bool = true;

    #[inline(always)]
    fn force_energy<const CALC_ENERGIES: bool>(
        &self,
        c6: Real,
        c12: Real,
        c6_grid: Real,
        rsq: Real,
        _rinv: Real,
        rinvsq: Real,
        interact: Real,
    ) -> (Real, Real) {
        let (mut fr, mut v) = shifted_lj::<CALC_ENERGIES>(
            interact * c6,
            interact * c12,
            rinvsq,
            self.cpot6,
            self.cpot12,
        );

        let rinvsix = rinvsq * rinvsq * rinvsq;
        let cr2 = self.beta2 * rsq;
        let expmcr2 = (-cr2).exp();
        let poly = 1.0 + cr2 + 0.5 * cr2 * cr2;
        fr += c6_grid * (rinvsix - expmcr2 * (rinvsix * poly + self.beta6_6));
        if CALC_ENERGIES {
            v += c6_grid / 6.0 * (rinvsix * (1.0 - expmcr2 * poly) + self.sh_lj_ewald * interact);
        }
        (fr, v)
    }

    #[inline(always)]
    fn self_energy(&self, c6_grid: Real) -> Real {
        0.5 * c6_grid / 6.0 * self.beta6_6
    }
}

/// Source of the premultiplied LJ parameters of a type pair.
pub(crate) trait LjParams: Sync {
    fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2];
    fn c6_grid(&self, ti: usize, tj: usize) -> Real;
}

/// Full type × type matrices.
pub(crate) struct MatrixParams<'a>(pub &'a NonbondedParameters);

impl LjParams for MatrixParams<'_> {
    #[inline(always)]
    fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2] {
        self.0.c6_c12(ti, tj)
    }
    #[inline(always)]
    fn c6_grid(&self, ti: usize, tj: usize) -> Real {
        self.0.c6_grid(ti, tj)
    }
}

/// LJ from the matrix, grid term from per-type geometric parameters.
pub(crate) struct MatrixGridCombParams<'a>(pub &'a NonbondedParameters);

impl LjParams for MatrixGridCombParams<'_> {
    #[inline(always)]
    fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2] {
        self.0.c6_c12(ti, tj)
    }
    #[inline(always)]
    fn c6_grid(&self, ti: usize, tj: usize) -> Real {
        self.0.grid_param(ti) * self.0.grid_param(tj)
    }
}

pub(crate) struct GeometricCombParams<'a>(pub &'a NonbondedParameters);

impl LjParams for GeometricCombParams<'_> {
    #[inline(always)]
    fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2] {
        let (a, b) = (self.0.comb_params(ti), self.0.comb_params(tj));
        [a[0] * b[0], a[1] * b[1]]
    }
    #[inline(always)]
    fn c6_grid(&self, ti: usize, tj: usize) -> Real {
        self.0.grid_param(ti) * self.0.grid_param(tj)
    }
}

pub(crate) struct LorentzBerthelotCombParams<'a>(pub &'a NonbondedParameters);

impl LjParams for LorentzBerthelotCombParams<'_> {
    #[inline(always)]
    fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2] {
        lorentz_berthelot_pair(&self.0.comb_params(ti), &self.0.comb_params(tj))
    }
    #[inline(always)]
    fn c6_grid(&self, ti: usize, tj: usize) -> Real {
        self.0.grid_param(ti) * self.0.grid_param(tj)
    }
}

pub(crate) trait EnergyAccumulator {
    /// Whether the pair's energy groups are needed.
    const GROUPS: bool;

    fn add(&mut self, gi: usize, gj: usize, vdw: Real, coulomb: Real);
}

pub(crate) struct NoEnergies;

impl EnergyAccumulator for NoEnergies {
    const GROUPS: bool = false;

    #[inline(always)]
    fn add(&mut self, _gi: usize, _gj: usize, _vdw: Real, _coulomb: Real) {}
}

/// Totals for runs with a single energy group.
#[derive(Default)]
pub(crate) struct ScalarEnergies {
    vdw: Real,
    coulomb: Real,
}

impl ScalarEnergies {
    pub fn flush_into(self, energies: &mut GroupPairEnergies) {
        if energies.num_groups() > 0 {
            energies.vdw[0] += self.vdw;
            energies.coulomb[0] += self.coulomb;
        }
    }
}

impl EnergyAccumulator for ScalarEnergies {
    const GROUPS: bool = false;

    #[inline(always)]
    fn add(&mut self, _gi: usize, _gj: usize, vdw: Real, coulomb: Real) {
        self.vdw += vdw;
        self.coulomb += coulomb;
    }
}

impl EnergyAccumulator for GroupPairEnergies {
    const GROUPS: bool = true;

    #[inline(always)]
    fn add(&mut self, gi: usize, gj: usize, vdw: Real, coulomb: Real) {
        let c = self.cell(gi, gj);
        self.vdw[c] += vdw;
        self.coulomb[c] += coulomb;
    }
}

/// Subtracts the Coulomb self energy of every i atom and, for LJ-Ewald,
/// adds the grid self term.
#[inline(always)]
pub(crate) fn add_self_energies<V: VdwKernel, P: LjParams, E: EnergyAccumulator>(
    ctx: &KernelContext<'_>,
    vdw: &V,
    lj: &P,
    i: &ICluster,
    do_coul: bool,
    energies: &mut E,
) {
    for k in 0..I_CLUSTER_SIZE {
        let v_coul = if do_coul {
            -i.q[k] * ctx.atoms.q[i.first + k] * ctx.self_coulomb
        } else {
            0.0
        };
        let v_vdw = if V::LJ_EWALD {
            vdw.self_energy(lj.c6_grid(i.types[k], i.types[k]))
        } else {
            0.0
        };
        energies.add(i.groups[k], i.groups[k], v_vdw, v_coul);
    }
}
