use super::ewald::{
    EwaldCorrectionTable, calc_ewald_coeff_lj, calc_ewald_coeff_q, ewald_table_scale,
};
use crate::core::math::{ONE_4PI_EPS0, Real, erfc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoulombInteraction {
    /// Plain cut-off, evaluated as reaction-field with `ε_rf = 1`.
    Cutoff,
    ReactionField,
    /// Real-space part of Ewald/PME.
    Ewald,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VdwInteraction {
    Cutoff,
    /// Real-space part of LJ-PME with the geometric grid rule.
    LjEwald,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionModifier {
    None,
    PotShift,
    ForceSwitch,
    PotSwitch,
}

/// Constants of a force-switched or shifted `r^-p` term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShiftConsts {
    pub c2: Real,
    pub c3: Real,
    pub cpot: Real,
}

/// Polynomial coefficients of the potential switch `1 + c3 t³ + c4 t⁴ + c5 t⁵`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SwitchConsts {
    pub c3: Real,
    pub c4: Real,
    pub c5: Real,
}

impl ShiftConsts {
    pub fn potential_shift(power: i32, rc: Real) -> Self {
        Self {
            c2: 0.0,
            c3: 0.0,
            cpot: -rc.powi(-power),
        }
    }

    /// Force switch between `rsw` and `rc`: the force and its derivative
    /// vanish at `rc`, `cpot` makes the potential vanish there too.
    pub fn force_switch(power: i32, rsw: Real, rc: Real) -> Self {
        let p = power as Real;
        let d = rc - rsw;
        let rc_pow = rc.powi(power + 2);
        let c2 = ((p + 1.0) * rsw - (p + 4.0) * rc) / (rc_pow * d * d);
        let c3 = -((p + 1.0) * rsw - (p + 3.0) * rc) / (rc_pow * d * d * d);
        let cpot = -rc.powi(-power) + p * c2 / 3.0 * d.powi(3) + p * c3 / 4.0 * d.powi(4);
        Self { c2, c3, cpot }
    }
}

impl SwitchConsts {
    pub fn potential_switch(rsw: Real, rc: Real) -> Self {
        let d = rc - rsw;
        Self {
            c3: -10.0 / d.powi(3),
            c4: 15.0 / d.powi(4),
            c5: -6.0 / d.powi(5),
        }
    }

    /// Switch value and its derivative at `t = max(r - rsw, 0)`.
    #[inline(always)]
    pub fn evaluate(&self, t: Real) -> (Real, Real) {
        let sw = 1.0 + (self.c3 + (self.c4 + self.c5 * t) * t) * t * t * t;
        let dsw = (3.0 * self.c3 + (4.0 * self.c4 + 5.0 * self.c5 * t) * t) * t * t;
        (sw, dsw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoulombConst {
    pub interaction: CoulombInteraction,
    pub cutoff: Real,
    pub epsilon_r: Real,
    pub epsilon_rf: Real,
    /// `1/(4πε₀ε_r)`.
    pub epsfac: Real,
    pub k_rf: Real,
    pub c_rf: Real,
    pub ewald_coeff: Real,
    pub ewald_rtol: Real,
    /// Potential shift `erfc(β rc)/rc` applied to Ewald pair energies.
    pub sh_ewald: Real,
    pub table: Option<Arc<EwaldCorrectionTable>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VdwConst {
    pub interaction: VdwInteraction,
    pub modifier: InteractionModifier,
    pub cutoff: Real,
    pub switch_radius: Real,
    pub dispersion_shift: ShiftConsts,
    pub repulsion_shift: ShiftConsts,
    pub pot_switch: SwitchConsts,
    pub ewald_coeff: Real,
    pub ewald_rtol: Real,
    /// Shift making the LJ-PME grid correction vanish at the cut-off.
    pub sh_lj_ewald: Real,
}

/// Physics constants shared read-only by every kernel invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionConst {
    pub rlist: Real,
    pub coulomb: CoulombConst,
    pub vdw: VdwConst,
}

impl CoulombConst {
    /// Derives reaction-field or Ewald constants. The correction table spans
    /// `table_range`, which must cover every pair the free-energy kernel may
    /// correct, so callers pass the pairlist radius.
    pub fn new(
        interaction: CoulombInteraction,
        cutoff: Real,
        epsilon_r: Real,
        epsilon_rf: Real,
        ewald_rtol: Real,
        table_energy_tolerance_factor: Real,
        table_range: Real,
    ) -> Self {
        let epsfac = ONE_4PI_EPS0 / epsilon_r;
        let mut c = Self {
            interaction,
            cutoff,
            epsilon_r,
            epsilon_rf,
            epsfac,
            k_rf: 0.0,
            c_rf: 0.0,
            ewald_coeff: 0.0,
            ewald_rtol,
            sh_ewald: 0.0,
            table: None,
        };

        match interaction {
            CoulombInteraction::Cutoff | CoulombInteraction::ReactionField => {
                let eps_rf = match interaction {
                    CoulombInteraction::Cutoff => 1.0,
                    _ => epsilon_rf,
                };
                c.epsilon_rf = eps_rf;
                c.k_rf = reaction_field_k(cutoff, epsilon_r, eps_rf);
                c.c_rf = 1.0 / cutoff + c.k_rf * cutoff * cutoff;
            }
            CoulombInteraction::Ewald => {
                let beta = calc_ewald_coeff_q(cutoff, ewald_rtol);
                let scale = ewald_table_scale(beta, cutoff, table_energy_tolerance_factor);
                c.ewald_coeff = beta;
                c.sh_ewald = erfc(beta * cutoff) / cutoff;
                c.table = Some(Arc::new(EwaldCorrectionTable::new(
                    beta,
                    scale,
                    table_range.max(cutoff),
                )));
            }
        }
        c
    }

    #[inline]
    pub fn is_ewald(&self) -> bool {
        self.interaction == CoulombInteraction::Ewald
    }

    /// Energy subtracted per unit `q²` for every atom's self-interaction,
    /// `c_rf/2` for reaction-field and `β/√π` for Ewald.
    pub fn self_energy_factor(&self) -> Real {
        match self.interaction {
            CoulombInteraction::Ewald => match &self.table {
                Some(table) => 0.5 * table.potential_at_zero(),
                None => self.ewald_coeff * crate::core::math::FRAC_1_SQRT_PI,
            },
            _ => 0.5 * self.c_rf,
        }
    }
}

/// `ε_rf = 0` denotes an infinite reaction-field dielectric.
fn reaction_field_k(rc: Real, epsilon_r: Real, epsilon_rf: Real) -> Real {
    if epsilon_rf == 0.0 {
        1.0 / (2.0 * rc.powi(3))
    } else {
        (epsilon_rf - epsilon_r) / (2.0 * epsilon_rf + epsilon_r) / rc.powi(3)
    }
}

impl VdwConst {
    pub fn new(
        interaction: VdwInteraction,
        modifier: InteractionModifier,
        cutoff: Real,
        switch_radius: Real,
        ewald_rtol: Real,
    ) -> Self {
        let (dispersion_shift, repulsion_shift) = match modifier {
            InteractionModifier::PotShift => (
                ShiftConsts::potential_shift(6, cutoff),
                ShiftConsts::potential_shift(12, cutoff),
            ),
            InteractionModifier::ForceSwitch => (
                ShiftConsts::force_switch(6, switch_radius, cutoff),
                ShiftConsts::force_switch(12, switch_radius, cutoff),
            ),
            InteractionModifier::None | InteractionModifier::PotSwitch => {
                (ShiftConsts::default(), ShiftConsts::default())
            }
        };
        let pot_switch = match modifier {
            InteractionModifier::PotSwitch => SwitchConsts::potential_switch(switch_radius, cutoff),
            _ => SwitchConsts::default(),
        };

        let (ewald_coeff, sh_lj_ewald) = match interaction {
            VdwInteraction::LjEwald => {
                let beta = calc_ewald_coeff_lj(cutoff, ewald_rtol);
                let x2 = beta * beta * cutoff * cutoff;
                let sh = ((-x2).exp() * (1.0 + x2 + 0.5 * x2 * x2) - 1.0) / cutoff.powi(6);
                (beta, sh)
            }
            VdwInteraction::Cutoff => (0.0, 0.0),
        };

        Self {
            interaction,
            modifier,
            cutoff,
            switch_radius,
            dispersion_shift,
            repulsion_shift,
            pot_switch,
            ewald_coeff,
            ewald_rtol,
            sh_lj_ewald,
        }
    }

    #[inline]
    pub fn is_lj_ewald(&self) -> bool {
        self.interaction == VdwInteraction::LjEwald
    }
}

impl InteractionConst {
    /// Radius of the kernel distance test.
    #[inline]
    pub fn max_cutoff(&self) -> Real {
        self.coulomb.cutoff.max(self.vdw.cutoff)
    }

    /// LJ uses a shorter cut-off than Coulomb and must be masked separately.
    #[inline]
    pub fn is_twin_cutoff(&self) -> bool {
        self.vdw.cutoff < self.coulomb.cutoff
    }
}
