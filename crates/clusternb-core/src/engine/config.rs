use crate::core::forcefield::interaction_const::{
    CoulombConst, CoulombInteraction, InteractionConst, InteractionModifier, VdwConst,
    VdwInteraction,
};
use crate::core::math::Real;
use crate::engine::energy::FepCoupling;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

/// What the current step needs from the nonbonded evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepWorkload {
    pub compute_forces: bool,
    pub compute_virial: bool,
    pub compute_energy: bool,
    pub compute_dhdl: bool,
}

impl StepWorkload {
    /// Forces only, as on most MD steps.
    pub fn forces_only() -> Self {
        Self {
            compute_forces: true,
            compute_virial: false,
            compute_energy: false,
            compute_dhdl: false,
        }
    }

    /// Forces, virial, energies and dV/dλ.
    pub fn everything() -> Self {
        Self {
            compute_forces: true,
            compute_virial: true,
            compute_energy: true,
            compute_dhdl: true,
        }
    }
}

impl Default for StepWorkload {
    fn default() -> Self {
        Self::forces_only()
    }
}

#[derive(Default)]
pub struct InteractionConstBuilder {
    rlist: Option<Real>,
    coulomb_type: Option<CoulombInteraction>,
    rcoulomb: Option<Real>,
    epsilon_r: Option<Real>,
    epsilon_rf: Option<Real>,
    ewald_rtol: Option<Real>,
    vdw_type: Option<VdwInteraction>,
    vdw_modifier: Option<InteractionModifier>,
    rvdw: Option<Real>,
    rvdw_switch: Option<Real>,
    ewald_rtol_lj: Option<Real>,
    table_energy_tolerance_factor: Option<Real>,
}

impl InteractionConstBuilder {
    pub const DEFAULT_EPSILON_R: Real = 1.0;
    pub const DEFAULT_EPSILON_RF: Real = 0.0;
    pub const DEFAULT_EWALD_RTOL: Real = 1e-5;
    pub const DEFAULT_EWALD_RTOL_LJ: Real = 1e-3;
    /// Allowed table energy error relative to the Ewald potential jump at
    /// the cut-off.
    pub const DEFAULT_TABLE_ENERGY_TOLERANCE_FACTOR: Real = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Pairlist radius; defaults to the largest cut-off.
    pub fn rlist(mut self, radius: Real) -> Self {
        self.rlist = Some(radius);
        self
    }
    pub fn coulomb_type(mut self, interaction: CoulombInteraction) -> Self {
        self.coulomb_type = Some(interaction);
        self
    }
    pub fn rcoulomb(mut self, cutoff: Real) -> Self {
        self.rcoulomb = Some(cutoff);
        self
    }
    pub fn epsilon_r(mut self, epsilon: Real) -> Self {
        self.epsilon_r = Some(epsilon);
        self
    }
    pub fn epsilon_rf(mut self, epsilon: Real) -> Self {
        self.epsilon_rf = Some(epsilon);
        self
    }
    pub fn ewald_rtol(mut self, rtol: Real) -> Self {
        self.ewald_rtol = Some(rtol);
        self
    }
    pub fn vdw_type(mut self, interaction: VdwInteraction) -> Self {
        self.vdw_type = Some(interaction);
        self
    }
    pub fn vdw_modifier(mut self, modifier: InteractionModifier) -> Self {
        self.vdw_modifier = Some(modifier);
        self
    }
    pub fn rvdw(mut self, cutoff: Real) -> Self {
        self.rvdw = Some(cutoff);
        self
    }
    pub fn rvdw_switch(mut self, radius: Real) -> Self {
        self.rvdw_switch = Some(radius);
        self
    }
    pub fn ewald_rtol_lj(mut self, rtol: Real) -> Self {
        self.ewald_rtol_lj = Some(rtol);
        self
    }
    pub fn table_energy_tolerance_factor(mut self, factor: Real) -> Self {
        self.table_energy_tolerance_factor = Some(factor);
        self
    }

    pub fn build(self) -> Result<InteractionConst, ConfigError> {
        let coulomb_type = self
            .coulomb_type
            .ok_or(ConfigError::MissingParameter("coulomb_type"))?;
        let rcoulomb = self
            .rcoulomb
            .ok_or(ConfigError::MissingParameter("rcoulomb"))?;
        let vdw_type = self
            .vdw_type
            .ok_or(ConfigError::MissingParameter("vdw_type"))?;
        let rvdw = self.rvdw.ok_or(ConfigError::MissingParameter("rvdw"))?;
        let vdw_modifier = self.vdw_modifier.unwrap_or(InteractionModifier::PotShift);
        let rvdw_switch = self.rvdw_switch.unwrap_or(0.0);
        let epsilon_r = self.epsilon_r.unwrap_or(Self::DEFAULT_EPSILON_R);
        let epsilon_rf = self.epsilon_rf.unwrap_or(Self::DEFAULT_EPSILON_RF);
        let ewald_rtol = self.ewald_rtol.unwrap_or(Self::DEFAULT_EWALD_RTOL);
        let ewald_rtol_lj = self.ewald_rtol_lj.unwrap_or(Self::DEFAULT_EWALD_RTOL_LJ);
        let tolerance_factor = self
            .table_energy_tolerance_factor
            .unwrap_or(Self::DEFAULT_TABLE_ENERGY_TOLERANCE_FACTOR);
        let rlist = self.rlist.unwrap_or(rcoulomb.max(rvdw));

        if !(rcoulomb > 0.0) {
            return Err(invalid("rcoulomb", "must be positive"));
        }
        if !(rvdw > 0.0) {
            return Err(invalid("rvdw", "must be positive"));
        }
        if rvdw > rcoulomb {
            return Err(invalid("rvdw", "must not exceed rcoulomb"));
        }
        if rvdw < rcoulomb && coulomb_type != CoulombInteraction::Ewald {
            return Err(invalid(
                "rvdw",
                "a shorter LJ cut-off requires Ewald electrostatics",
            ));
        }
        if rlist < rcoulomb {
            return Err(invalid("rlist", "must cover both cut-offs"));
        }
        if !(epsilon_r > 0.0) {
            return Err(invalid("epsilon_r", "must be positive"));
        }
        if epsilon_rf < 0.0 {
            return Err(invalid("epsilon_rf", "must be zero (infinity) or positive"));
        }
        if !(ewald_rtol > 0.0 && ewald_rtol < 1.0) {
            return Err(invalid("ewald_rtol", "must be in (0, 1)"));
        }
        if !(tolerance_factor > 0.0) {
            return Err(invalid("table_energy_tolerance_factor", "must be positive"));
        }
        if matches!(
            vdw_modifier,
            InteractionModifier::ForceSwitch | InteractionModifier::PotSwitch
        ) && !(rvdw_switch >= 0.0 && rvdw_switch < rvdw)
        {
            return Err(invalid("rvdw_switch", "must lie in [0, rvdw)"));
        }
        if vdw_type == VdwInteraction::LjEwald {
            if rvdw != rcoulomb {
                return Err(invalid("rvdw", "LJ-Ewald requires rvdw == rcoulomb"));
            }
            if !matches!(
                vdw_modifier,
                InteractionModifier::PotShift | InteractionModifier::None
            ) {
                return Err(invalid(
                    "vdw_modifier",
                    "LJ-Ewald supports only potential-shift or none",
                ));
            }
            if !(ewald_rtol_lj > 0.0 && ewald_rtol_lj < 1.0) {
                return Err(invalid("ewald_rtol_lj", "must be in (0, 1)"));
            }
        }

        Ok(InteractionConst {
            rlist,
            coulomb: CoulombConst::new(
                coulomb_type,
                rcoulomb,
                epsilon_r,
                epsilon_rf,
                ewald_rtol,
                tolerance_factor,
                rlist,
            ),
            vdw: VdwConst::new(vdw_type, vdw_modifier, rvdw, rvdw_switch, ewald_rtol_lj),
        })
    }
}

/// Soft-core and foreign-lambda settings of the free-energy kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct FepParameters {
    pub sc_alpha: Real,
    /// Power of λ in the soft-core term, 1 or 2.
    pub sc_power: i32,
    /// `σ⁶` used when `C6` or `C12` of a state is zero.
    pub sc_sigma6_def: Real,
    pub sc_sigma6_min: Real,
    /// Also soften Coulomb when only LJ would otherwise need it.
    pub sc_coul: bool,
    /// Foreign lambda points, `all_lambda[component][k]`; empty for none.
    pub all_lambda: Vec<Vec<Real>>,
}

impl Default for FepParameters {
    fn default() -> Self {
        let sigma6 = (0.3 as Real).powi(6);
        Self {
            sc_alpha: 0.0,
            sc_power: 1,
            sc_sigma6_def: sigma6,
            sc_sigma6_min: sigma6,
            sc_coul: false,
            all_lambda: Vec::new(),
        }
    }
}

impl FepParameters {
    /// Number of foreign lambda points.
    pub fn num_foreign_lambdas(&self) -> usize {
        self.all_lambda.first().map_or(0, Vec::len)
    }

    /// The λ vector of foreign point `k`.
    pub fn foreign_lambda(&self, k: usize) -> [Real; FepCoupling::COUNT] {
        std::array::from_fn(|c| self.all_lambda[c][k])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sc_alpha >= 0.0) {
            return Err(invalid("sc_alpha", "must not be negative"));
        }
        if !matches!(self.sc_power, 1 | 2) {
            return Err(invalid("sc_power", format!("must be 1 or 2, got {}", self.sc_power)));
        }
        if !(self.sc_sigma6_def > 0.0 && self.sc_sigma6_min >= 0.0) {
            return Err(invalid("sc_sigma6_def", "soft-core radii must be positive"));
        }
        if self.all_lambda.is_empty() {
            return Ok(());
        }
        if self.all_lambda.len() != FepCoupling::COUNT {
            return Err(invalid(
                "all_lambda",
                format!(
                    "needs {} components, got {}",
                    FepCoupling::COUNT,
                    self.all_lambda.len()
                ),
            ));
        }
        let n = self.num_foreign_lambdas();
        if let Some(row) = self.all_lambda.iter().find(|row| row.len() != n) {
            return Err(invalid(
                "all_lambda",
                format!("every component needs {n} points, found {}", row.len()),
            ));
        }
        Ok(())
    }
}
