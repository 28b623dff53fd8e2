//! Atom-pair kernel for interactions involving perturbed atoms.
//!
//! Every pair is evaluated in both end states and mixed linearly in λ:
//! Coulomb with `[1 - λ_coul, λ_coul]`, LJ with `[1 - λ_vdw, λ_vdw]`. With a
//! non-zero soft-core α the end-state potentials are evaluated at the
//! Beutler soft-core radius `r_sc = (α σ⁶ λ' + r⁶)^(1/6)`, where `λ'` is the
//! weight of the other state, so a vanishing atom never produces a
//! singularity.
//!
//! The long-range Ewald and LJ-PME corrections are not softened: they are
//! subtracted at the real distance, for excluded pairs as well. The self
//! pair of a perturbed atom is listed as an excluded pair at distance zero
//! and counts half.

use crate::core::forcefield::interaction_const::{InteractionConst, InteractionModifier};
use crate::core::forcefield::params::NonbondedParameters;
use crate::core::math::{MIN_DISTANCE_SQUARED, RVec, Real, inv_sqrt};
use crate::core::models::fep_pairlist::FepPairlist;
use crate::core::models::system::FepAtomArrays;
use crate::engine::config::FepParameters;
use crate::engine::counters::PairCounts;
use crate::engine::energy::FepCoupling;
use crate::engine::threaded_force_buffer::ThreadOutputs;

const NUM_STATES: usize = 2;

/// Derivative of the state weights with respect to λ.
const DLF: [Real; NUM_STATES] = [-1.0, 1.0];

const SOFT_CORE_R_POWER: Real = 6.0;

/// Borrowed inputs shared by every thread of one free-energy pass.
pub struct FreeEnergyInputs<'a> {
    pub x: &'a [RVec],
    pub shift_vecs: &'a [RVec],
    pub params: &'a NonbondedParameters,
    pub ic: &'a InteractionConst,
    pub atoms: &'a FepAtomArrays,
    pub fep: &'a FepParameters,
}

/// What a pass must produce.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FepKernelFlags {
    pub compute_forces: bool,
    pub compute_virial: bool,
    pub compute_energy: bool,
}

/// λ-dependent weights of the two end states.
struct StateWeights {
    coulomb: [Real; NUM_STATES],
    vdw: [Real; NUM_STATES],
    /// Soft-core λ factor `(1 - w)^p` of each state.
    sc_coulomb: [Real; NUM_STATES],
    sc_vdw: [Real; NUM_STATES],
    /// Derivative of the soft-core λ factor, over the r-power.
    sc_dcoulomb: [Real; NUM_STATES],
    sc_dvdw: [Real; NUM_STATES],
}

impl StateWeights {
    fn new(lambda: &[Real; FepCoupling::COUNT], sc_power: i32) -> Self {
        let lam_coul = lambda[FepCoupling::Coul.index()];
        let lam_vdw = lambda[FepCoupling::Vdw.index()];
        let coulomb = [1.0 - lam_coul, lam_coul];
        let vdw = [1.0 - lam_vdw, lam_vdw];

        let factor = |w: Real| if sc_power == 2 { (1.0 - w) * (1.0 - w) } else { 1.0 - w };
        let dfactor = |s: usize, w: Real| {
            let p = sc_power as Real;
            DLF[s] * p / SOFT_CORE_R_POWER * if sc_power == 2 { 1.0 - w } else { 1.0 }
        };
        Self {
            coulomb,
            vdw,
            sc_coulomb: coulomb.map(factor),
            sc_vdw: vdw.map(factor),
            sc_dcoulomb: std::array::from_fn(|s| dfactor(s, coulomb[s])),
            sc_dvdw: std::array::from_fn(|s| dfactor(s, vdw[s])),
        }
    }
}

/// Distance quantities at the soft-core radius of one state.
struct SoftRadius {
    /// `1 / r_sc⁶`.
    rpinv: Real,
    r: Real,
    rinv: Real,
}

impl SoftRadius {
    #[inline]
    fn new(alpha_eff: Real, lambda_factor: Real, sigma6: Real, rp: Real, r: Real, rinv: Real) -> Self {
        if alpha_eff == 0.0 {
            let rinv3 = rinv * rinv * rinv;
            return Self {
                rpinv: rinv3 * rinv3,
                r,
                rinv,
            };
        }
        let rpinv = 1.0 / (alpha_eff * lambda_factor * sigma6 + rp);
        let rinv = rpinv.powf(1.0 / SOFT_CORE_R_POWER);
        Self {
            rpinv,
            r: 1.0 / rinv,
            rinv,
        }
    }
}

#[derive(Default)]
struct PairTerms {
    fscal: Real,
    v_coul: Real,
    v_vdw: Real,
    dvdl_coul: Real,
    dvdl_vdw: Real,
}

/// Runs one thread's list at `lambda`, accumulating into `out`.
pub(crate) fn free_energy_kernel(
    list: &FepPairlist,
    inputs: &FreeEnergyInputs<'_>,
    lambda: &[Real; FepCoupling::COUNT],
    flags: FepKernelFlags,
    out: &mut ThreadOutputs<'_>,
) -> PairCounts {
    let ic = inputs.ic;
    let fep = inputs.fep;
    let atoms = inputs.atoms;
    let weights = StateWeights::new(lambda, fep.sc_power);

    let rcut = ic.max_cutoff();
    let rcut2 = rcut * rcut;
    let rlist2 = ic.rlist * ic.rlist;
    let epsfac = ic.coulomb.epsfac;
    let do_energy = flags.compute_energy && out.energies.num_groups() > 0;

    let mut counts = PairCounts::default();

    for entry in &list.entries {
        let i = entry.i;
        let xi = inputs.x[i] + inputs.shift_vecs[entry.shift];
        let qi = [epsfac * atoms.charge_a[i], epsfac * atoms.charge_b[i]];
        let ti = [atoms.type_a[i], atoms.type_b[i]];
        let gi = atoms.energy_groups[i];
        let mut fi = RVec::zeros();

        let range = entry.j_range();
        for (&j, &interacts) in list.j[range.clone()].iter().zip(&list.interacts[range]) {
            counts.num_pairs += 1;

            let d = xi - inputs.x[j];
            let rsq = d.norm_squared();
            if !interacts && rsq >= rlist2 {
                counts.num_excluded_beyond_rlist += 1;
                continue;
            }
            if interacts && rsq >= rcut2 {
                continue;
            }
            counts.num_pairs_within_cutoff += 1;

            let qq = [qi[0] * atoms.charge_a[j], qi[1] * atoms.charge_b[j]];
            let tj = [atoms.type_a[j], atoms.type_b[j]];
            let pair = PairState {
                inputs,
                weights: &weights,
                rsq,
                qq,
                ti,
                tj,
                half: if j == i { 0.5 } else { 1.0 },
            };
            let terms = pair.evaluate(interacts);

            if flags.compute_forces {
                let f = d * terms.fscal;
                fi += f;
                out.force[j] -= f;
            }
            if do_energy {
                let cell = out.energies.cell(gi, atoms.energy_groups[j]);
                out.energies.vdw[cell] += terms.v_vdw;
                out.energies.coulomb[cell] += terms.v_coul;
            }
            out.dvdl[FepCoupling::Coul.index()] += terms.dvdl_coul;
            out.dvdl[FepCoupling::Vdw.index()] += terms.dvdl_vdw;
        }

        if flags.compute_forces {
            out.force[i] += fi;
            if flags.compute_virial {
                out.shift_forces[entry.shift] += fi;
            }
        }
    }
    counts
}

struct PairState<'a, 'b> {
    inputs: &'a FreeEnergyInputs<'b>,
    weights: &'a StateWeights,
    rsq: Real,
    qq: [Real; NUM_STATES],
    ti: [usize; NUM_STATES],
    tj: [usize; NUM_STATES],
    half: Real,
}

impl PairState<'_, '_> {
    fn evaluate(&self, interacts: bool) -> PairTerms {
        let ic = self.inputs.ic;
        let params = self.inputs.params;
        let w = self.weights;
        let rsq = self.rsq;
        let (r, rinv) = if rsq >= MIN_DISTANCE_SQUARED {
            let rinv = inv_sqrt(rsq);
            (rsq * rinv, rinv)
        } else {
            (0.0, 0.0)
        };

        let mut terms = PairTerms::default();
        if interacts && rsq >= MIN_DISTANCE_SQUARED {
            self.soft_core_terms(r, rinv, &mut terms);
        }

        let coulomb = &ic.coulomb;
        if coulomb.is_ewald() {
            if r < coulomb.cutoff || !interacts {
                if let Some(table) = coulomb.table.as_deref() {
                    let (f_lr, v_lr) = table.lookup(r);
                    let v_lr = v_lr * self.half;
                    for s in 0..NUM_STATES {
                        terms.v_coul -= w.coulomb[s] * self.qq[s] * v_lr;
                        terms.fscal -= w.coulomb[s] * self.qq[s] * f_lr * rinv;
                        terms.dvdl_coul -= DLF[s] * self.qq[s] * v_lr;
                    }
                }
            }
        } else if !interacts && r < coulomb.cutoff {
            // Ewald exclusions are corrected up to rlist since the mesh
            // part sees them at any distance; reaction-field ones end at
            // the cut-off as in the cluster kernels.
            let v = (coulomb.k_rf * rsq - coulomb.c_rf) * self.half;
            let f = -2.0 * coulomb.k_rf;
            for s in 0..NUM_STATES {
                terms.v_coul += w.coulomb[s] * self.qq[s] * v;
                terms.fscal += w.coulomb[s] * self.qq[s] * f;
                terms.dvdl_coul += DLF[s] * self.qq[s] * v;
            }
        }

        let vdw = &ic.vdw;
        if vdw.is_lj_ewald() && (r < vdw.cutoff || !interacts) {
            let beta2 = vdw.ewald_coeff * vdw.ewald_coeff;
            let beta6_6 = beta2 * beta2 * beta2 / 6.0;
            // Per unit 6·C6_grid: V/6 and F·r.
            let (v_grid, fr_grid) = if rsq >= MIN_DISTANCE_SQUARED {
                let rinvsq = rinv * rinv;
                let rinvsix = rinvsq * rinvsq * rinvsq;
                let cr2 = beta2 * rsq;
                let expmcr2 = (-cr2).exp();
                let poly = 1.0 + cr2 + 0.5 * cr2 * cr2;
                (
                    rinvsix * (1.0 - expmcr2 * poly) / 6.0,
                    (rinvsix - expmcr2 * (rinvsix * poly + beta6_6)) * rinvsq,
                )
            } else {
                (beta6_6 / 6.0, 0.0)
            };
            for s in 0..NUM_STATES {
                let c6_grid = params.c6_grid(self.ti[s], self.tj[s]);
                let v = c6_grid * v_grid * self.half;
                terms.v_vdw += w.vdw[s] * v;
                terms.fscal += w.vdw[s] * c6_grid * fr_grid;
                terms.dvdl_vdw += DLF[s] * v;
            }
        }
        terms
    }

    /// Soft-core Coulomb and LJ of an interacting pair within the cut-off.
    fn soft_core_terms(&self, r: Real, rinv: Real, terms: &mut PairTerms) {
        let ic = self.inputs.ic;
        let fep = self.inputs.fep;
        let w = self.weights;

        let c6_c12 = [
            self.inputs.params.c6_c12(self.ti[0], self.tj[0]),
            self.inputs.params.c6_c12(self.ti[1], self.tj[1]),
        ];
        let sigma6 = c6_c12.map(|[c6, c12]| {
            if c6 > 0.0 && c12 > 0.0 {
                (0.5 * c12 / c6).max(fep.sc_sigma6_min)
            } else {
                fep.sc_sigma6_def
            }
        });
        let both_repulsive = c6_c12[0][1] > 0.0 && c6_c12[1][1] > 0.0;
        let (alpha_vdw, alpha_coul) = if both_repulsive {
            (0.0, 0.0)
        } else {
            (fep.sc_alpha, if fep.sc_coul { fep.sc_alpha } else { 0.0 })
        };

        let rpm2 = self.rsq * self.rsq;
        let rp = rpm2 * self.rsq;
        let coulomb = &ic.coulomb;
        let vdw = &ic.vdw;

        for s in 0..NUM_STATES {
            let mut fscal_c = 0.0;
            let mut v_c = 0.0;
            if self.qq[s] != 0.0 {
                let rc = SoftRadius::new(alpha_coul, w.sc_coulomb[s], sigma6[s], rp, r, rinv);
                let within = if coulomb.is_ewald() { r } else { rc.r } < coulomb.cutoff;
                if within {
                    let qq = self.qq[s];
                    let fr = if coulomb.is_ewald() {
                        v_c = qq * (rc.rinv - coulomb.sh_ewald);
                        qq * rc.rinv
                    } else {
                        v_c = qq * (rc.rinv + coulomb.k_rf * rc.r * rc.r - coulomb.c_rf);
                        qq * (rc.rinv - 2.0 * coulomb.k_rf * rc.r * rc.r)
                    };
                    fscal_c = fr * rc.rpinv;
                }
            }

            let mut fscal_v = 0.0;
            let mut v_v = 0.0;
            let [c6, c12] = c6_c12[s];
            if c6 != 0.0 || c12 != 0.0 {
                let rv = SoftRadius::new(alpha_vdw, w.sc_vdw[s], sigma6[s], rp, r, rinv);
                let within = if vdw.is_lj_ewald() { r } else { rv.r } < vdw.cutoff;
                if within {
                    let (disp, rep) = (&vdw.dispersion_shift, &vdw.repulsion_shift);
                    let v6 = c6 * rv.rpinv;
                    let v12 = c12 * rv.rpinv * rv.rpinv;
                    let mut fr = v12 - v6;
                    v_v = (v12 + c12 * rep.cpot) / 12.0 - (v6 + c6 * disp.cpot) / 6.0;

                    match vdw.modifier {
                        InteractionModifier::ForceSwitch => {
                            let t = (rv.r - vdw.switch_radius).max(0.0);
                            let t2 = t * t;
                            fr += (-c6 * (disp.c2 + disp.c3 * t) + c12 * (rep.c2 + rep.c3 * t))
                                * t2
                                * rv.r;
                            v_v += -c6 * (-disp.c2 / 3.0 - disp.c3 / 4.0 * t) * t2 * t
                                + c12 * (-rep.c2 / 3.0 - rep.c3 / 4.0 * t) * t2 * t;
                        }
                        InteractionModifier::PotSwitch => {
                            let t = (rv.r - vdw.switch_radius).max(0.0);
                            let (sw, dsw) = vdw.pot_switch.evaluate(t);
                            fr = fr * sw - rv.r * v_v * dsw;
                            v_v *= sw;
                        }
                        InteractionModifier::None | InteractionModifier::PotShift => {}
                    }
                    if vdw.is_lj_ewald() {
                        let c6_grid = self.inputs.params.c6_grid(self.ti[s], self.tj[s]);
                        v_v += c6_grid / 6.0 * vdw.sh_lj_ewald;
                    }
                    fscal_v = fr * rv.rpinv;
                }
            }

            terms.v_coul += w.coulomb[s] * v_c;
            terms.v_vdw += w.vdw[s] * v_v;
            terms.fscal += (w.coulomb[s] * fscal_c + w.vdw[s] * fscal_v) * rpm2;
            terms.dvdl_coul +=
                v_c * DLF[s] + w.coulomb[s] * alpha_coul * w.sc_dcoulomb[s] * fscal_c * sigma6[s];
            terms.dvdl_vdw +=
                v_v * DLF[s] + w.vdw[s] * alpha_vdw * w.sc_dvdw[s] * fscal_v * sigma6[s];
        }
    }
}
