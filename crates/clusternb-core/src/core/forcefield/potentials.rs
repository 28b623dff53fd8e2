//! Scalar pair potentials in double precision.
//!
//! Every function returns `(V, F)` where `F = -dV/dr` is the force
//! magnitude along the pair vector.

use super::ewald::{ewald_lr_force, ewald_lr_potential};
use super::interaction_const::{
    CoulombConst, CoulombInteraction, InteractionModifier, ShiftConsts, SwitchConsts, VdwConst,
    VdwInteraction,
};
use statrs::function::erf::erfc;

#[inline]
pub fn lennard_jones(c6: f64, c12: f64, r: f64) -> (f64, f64) {
    let rinv6 = r.powi(-6);
    let v = c12 * rinv6 * rinv6 - c6 * rinv6;
    let f = (12.0 * c12 * rinv6 * rinv6 - 6.0 * c6 * rinv6) / r;
    (v, f)
}

/// `r^-p` with the force-switch (or potential-shift) polynomial of `consts`
/// applied beyond `r_switch`.
#[inline]
pub fn switched_power(power: i32, r: f64, r_switch: f64, consts: &ShiftConsts) -> (f64, f64) {
    let p = f64::from(power);
    let (c2, c3, cpot) = (
        f64::from(consts.c2),
        f64::from(consts.c3),
        f64::from(consts.cpot),
    );
    let t = (r - r_switch).max(0.0);
    let v = r.powi(-power) - p * c2 / 3.0 * t.powi(3) - p * c3 / 4.0 * t.powi(4) + cpot;
    let f = p * (r.powi(-(power + 1)) + c2 * t * t + c3 * t.powi(3));
    (v, f)
}

/// Switch function `S` and `dS/dr` at distance `r`.
#[inline]
pub fn potential_switch(r: f64, r_switch: f64, consts: &SwitchConsts) -> (f64, f64) {
    let (c3, c4, c5) = (
        f64::from(consts.c3),
        f64::from(consts.c4),
        f64::from(consts.c5),
    );
    let t = (r - r_switch).max(0.0);
    let s = 1.0 + c3 * t.powi(3) + c4 * t.powi(4) + c5 * t.powi(5);
    let ds = 3.0 * c3 * t * t + 4.0 * c4 * t.powi(3) + 5.0 * c5 * t.powi(4);
    (s, ds)
}

/// Real-space correction for the LJ-PME grid term with plain `C6_grid`,
/// `C6g·(1 - exp(-x²)(1 + x² + x⁴/2))/r⁶` with `x = βr`.
#[inline]
pub fn lj_ewald_grid(c6_grid: f64, beta: f64, r: f64) -> (f64, f64) {
    let x2 = beta * beta * r * r;
    let exp = (-x2).exp();
    let poly = 1.0 + x2 + 0.5 * x2 * x2;
    let rinv6 = r.powi(-6);
    let v = c6_grid * (1.0 - exp * poly) * rinv6;
    let f = c6_grid * (6.0 * (1.0 - exp * poly) * rinv6 - exp * beta.powi(6)) / r;
    (v, f)
}

#[inline]
pub fn reaction_field(qq: f64, r: f64, k_rf: f64, c_rf: f64) -> (f64, f64) {
    let v = qq * (1.0 / r + k_rf * r * r - c_rf);
    let f = qq * (1.0 / (r * r) - 2.0 * k_rf * r);
    (v, f)
}

#[inline]
pub fn ewald_real_space(qq: f64, beta: f64, r: f64, shift: f64) -> (f64, f64) {
    let erfc_br = erfc(beta * r);
    let v = qq * (erfc_br / r - shift);
    let f = qq
        * (erfc_br / (r * r)
            + std::f64::consts::FRAC_2_SQRT_PI * beta * (-beta * beta * r * r).exp() / r);
    (v, f)
}

/// LJ energy and force between two atoms with plain `C6`/`C12` under the
/// modifier of `vdw`, including the LJ-PME grid correction.
///
/// Excluded pairs only see the grid correction, without its shift.
pub fn vdw_pair(vdw: &VdwConst, c6: f64, c12: f64, c6_grid: f64, r: f64, excluded: bool) -> (f64, f64) {
    let (mut v, mut f) = (0.0, 0.0);

    if !excluded {
        let rsw = f64::from(vdw.switch_radius);
        match vdw.modifier {
            InteractionModifier::None => {
                (v, f) = lennard_jones(c6, c12, r);
            }
            InteractionModifier::PotShift | InteractionModifier::ForceSwitch => {
                let (v6, f6) = switched_power(6, r, rsw, &vdw.dispersion_shift);
                let (v12, f12) = switched_power(12, r, rsw, &vdw.repulsion_shift);
                v = c12 * v12 - c6 * v6;
                f = c12 * f12 - c6 * f6;
            }
            InteractionModifier::PotSwitch => {
                let (v_lj, f_lj) = lennard_jones(c6, c12, r);
                let (s, ds) = potential_switch(r, rsw, &vdw.pot_switch);
                v = v_lj * s;
                f = f_lj * s - v_lj * ds;
            }
        }
    }

    if vdw.interaction == VdwInteraction::LjEwald {
        let beta = f64::from(vdw.ewald_coeff);
        let (vg, fg) = lj_ewald_grid(c6_grid, beta, r);
        v += vg;
        f += fg;
        if !excluded {
            v += c6_grid * f64::from(vdw.sh_lj_ewald);
        }
    }
    (v, f)
}

/// Coulomb energy and force for `qq = epsfac·q_i·q_j` (excluded pairs keep
/// the reaction-field or Ewald correction only).
pub fn coulomb_pair(coulomb: &CoulombConst, qq: f64, r: f64, excluded: bool) -> (f64, f64) {
    match coulomb.interaction {
        CoulombInteraction::Cutoff | CoulombInteraction::ReactionField => {
            let (k_rf, c_rf) = (f64::from(coulomb.k_rf), f64::from(coulomb.c_rf));
            if excluded {
                (qq * (k_rf * r * r - c_rf), -qq * 2.0 * k_rf * r)
            } else {
                reaction_field(qq, r, k_rf, c_rf)
            }
        }
        CoulombInteraction::Ewald => {
            let beta = f64::from(coulomb.ewald_coeff);
            if excluded {
                (-qq * ewald_lr_potential(beta, r), -qq * ewald_lr_force(beta, r))
            } else {
                ewald_real_space(qq, beta, r, f64::from(coulomb.sh_ewald))
            }
        }
    }
}
