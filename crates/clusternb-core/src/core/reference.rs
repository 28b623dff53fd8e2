//! Double-precision all-pairs evaluator used to validate the kernels.

use crate::core::forcefield::interaction_const::{InteractionConst, VdwInteraction};
use crate::core::forcefield::params::NonbondedParameters;
use crate::core::forcefield::potentials::{coulomb_pair, vdw_pair};
use crate::core::math::MIN_DISTANCE_SQUARED;
use crate::core::models::shift::calc_shift_vectors;
use crate::core::models::system::ParticleSystem;
use nalgebra::{Matrix3, Vector3};

/// Forces, folded group-pair energies and virial of a reference evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceResult {
    pub num_groups: usize,
    pub forces: Vec<Vector3<f64>>,
    pub vdw: Vec<f64>,
    pub coulomb: Vec<f64>,
    pub virial: Matrix3<f64>,
}

impl ReferenceResult {
    pub fn total_vdw(&self) -> f64 {
        self.vdw.iter().sum()
    }

    pub fn total_coulomb(&self) -> f64 {
        self.coulomb.iter().sum()
    }

    pub fn max_force(&self) -> f64 {
        self.forces.iter().map(|f| f.norm()).fold(0.0, f64::max)
    }
}

/// Evaluates every pair and periodic image within the cut-off, the
/// exclusion corrections and the self terms, ignoring any perturbation.
pub fn evaluate_reference(
    system: &ParticleSystem,
    params: &NonbondedParameters,
    ic: &InteractionConst,
) -> ReferenceResult {
    let n = system.num_atoms();
    let num_groups = system.num_energy_groups;
    let shifts: Vec<Vector3<f64>> = calc_shift_vectors(&system.periodic_box)
        .iter()
        .map(|s| s.map(f64::from))
        .collect();
    let x: Vec<Vector3<f64>> = system.coordinates.iter().map(|v| v.map(f64::from)).collect();

    let rc = f64::from(ic.max_cutoff());
    let r_coulomb = f64::from(ic.coulomb.cutoff);
    let r_vdw = f64::from(ic.vdw.cutoff);
    let epsfac = f64::from(ic.coulomb.epsfac);

    let mut result = ReferenceResult {
        num_groups,
        forces: vec![Vector3::zeros(); n],
        vdw: vec![0.0; num_groups * num_groups],
        coulomb: vec![0.0; num_groups * num_groups],
        virial: Matrix3::zeros(),
    };
    let cell = |a: usize, b: usize| {
        let (ga, gb) = (system.energy_groups[a], system.energy_groups[b]);
        ga.min(gb) * num_groups + ga.max(gb)
    };

    for a in 0..n {
        for b in (a + 1)..n {
            let excluded = system.is_excluded(a, b);
            let [c6, c12] = params.c6_c12(system.types[a], system.types[b]);
            let (c6, c12) = (f64::from(c6) / 6.0, f64::from(c12) / 12.0);
            let c6_grid = f64::from(params.c6_grid(system.types[a], system.types[b])) / 6.0;
            let qq = epsfac * f64::from(system.charges[a]) * f64::from(system.charges[b]);

            for shift in &shifts {
                let d = x[a] + shift - x[b];
                let r2 = d.norm_squared();
                if r2 >= rc * rc || r2 < f64::from(MIN_DISTANCE_SQUARED) {
                    continue;
                }
                let r = r2.sqrt();
                let (mut v_vdw, mut f_vdw, mut v_coul, mut f_coul) = (0.0, 0.0, 0.0, 0.0);
                if r < r_coulomb {
                    (v_coul, f_coul) = coulomb_pair(&ic.coulomb, qq, r, excluded);
                }
                if r < r_vdw {
                    (v_vdw, f_vdw) = vdw_pair(&ic.vdw, c6, c12, c6_grid, r, excluded);
                }

                let f = d * ((f_vdw + f_coul) / r);
                result.forces[a] += f;
                result.forces[b] -= f;
                result.virial -= 0.5 * d * f.transpose();
                let c = cell(a, b);
                result.vdw[c] += v_vdw;
                result.coulomb[c] += v_coul;
            }
        }
    }

    let self_coulomb = f64::from(ic.coulomb.self_energy_factor());
    let beta_lj = f64::from(ic.vdw.ewald_coeff);
    for a in 0..n {
        let c = cell(a, a);
        let q = f64::from(system.charges[a]);
        result.coulomb[c] -= epsfac * q * q * self_coulomb;
        if ic.vdw.interaction == VdwInteraction::LjEwald {
            let t = system.types[a];
            let c6_grid = f64::from(params.c6_grid(t, t)) / 6.0;
            result.vdw[c] += 0.5 * c6_grid * beta_lj.powi(6) / 6.0;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::interaction_const::{
        CoulombConst, CoulombInteraction, InteractionModifier, VdwConst,
    };
    use crate::core::systems::{WaterBoxOptions, water_box};

    fn reaction_field() -> InteractionConst {
        InteractionConst {
            rlist: 0.9,
            coulomb: CoulombConst::new(CoulombInteraction::ReactionField, 0.9, 1.0, 0.0, 0.0, 0.1, 0.9),
            vdw: VdwConst::new(VdwInteraction::Cutoff, InteractionModifier::PotShift, 0.9, 0.7, 0.0),
        }
    }

    #[test]
    fn forces_sum_to_zero() {
        let water = water_box(&WaterBoxOptions::default()).unwrap();
        let result = evaluate_reference(&water.system, &water.params, &reaction_field());
        let total: Vector3<f64> = result.forces.iter().sum();
        assert!(total.norm() < 1e-9 * result.max_force());
        assert!(result.max_force() > 0.0);
    }

    #[test]
    fn energy_groups_fold_into_the_upper_triangle() {
        let ic = reaction_field();
        let one = water_box(&WaterBoxOptions::default()).unwrap();
        let three = water_box(&WaterBoxOptions {
            num_energy_groups: 3,
            ..WaterBoxOptions::default()
        })
        .unwrap();
        let r1 = evaluate_reference(&one.system, &one.params, &ic);
        let r3 = evaluate_reference(&three.system, &three.params, &ic);
        assert!((r1.total_coulomb() - r3.total_coulomb()).abs() < 1e-9 * r1.total_coulomb().abs());
        assert!((r1.total_vdw() - r3.total_vdw()).abs() < 1e-9 * r1.total_vdw().abs());
        assert_eq!(r3.vdw[3], 0.0);
        assert_eq!(r3.coulomb[7], 0.0);
    }

    #[test]
    fn uncharged_system_has_no_coulomb_energy() {
        let mut water = water_box(&WaterBoxOptions::default()).unwrap();
        water.system.charges.fill(0.0);
        let result = evaluate_reference(&water.system, &water.params, &reaction_field());
        assert_eq!(result.total_coulomb(), 0.0);
        assert!(result.total_vdw() != 0.0);
    }
}
