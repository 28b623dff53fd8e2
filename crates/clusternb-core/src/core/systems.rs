//! Deterministic water boxes for tests and benchmarks.

use crate::core::forcefield::params::{
    CombinationRule, LjTypeParam, NonbondedParameters, ParamLoadError,
};
use crate::core::math::{RVec, Real};
use crate::core::models::shift::PeriodicBox;
use crate::core::models::system::{ParticleSystem, Perturbation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grid spacing of the oxygens; 27 waters fill a 1.86206 nm cube.
pub const WATER_SPACING: Real = 1.862_06 / 3.0;

const OH_BOND_LENGTH: Real = 0.1;
const HOH_ANGLE_DEGREES: Real = 109.47;
const POSITION_JITTER: Real = 0.02;

pub const CHARGE_OXYGEN: Real = -0.8476;
pub const CHARGE_HYDROGEN: Real = 0.4238;

pub const TYPE_OXYGEN: usize = 0;
pub const TYPE_HYDROGEN_LJ: usize = 1;
pub const TYPE_HYDROGEN: usize = 2;

#[derive(Debug, Error)]
pub enum WaterBoxError {
    #[error("A water box needs at least one water molecule")]
    Empty,
    #[error("Energy group count must be between 1 and the number of atoms, got {0}")]
    InvalidEnergyGroups(usize),
    #[error(transparent)]
    Params(#[from] ParamLoadError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct WaterBoxOptions {
    pub num_waters: usize,
    pub num_energy_groups: usize,
    pub combination_rule: CombinationRule,
    /// Number of waters, counted from the end, that are alchemically
    /// perturbed.
    pub num_perturbed_waters: usize,
    pub seed: u64,
}

impl Default for WaterBoxOptions {
    fn default() -> Self {
        Self {
            num_waters: 27,
            num_energy_groups: 1,
            combination_rule: CombinationRule::Geometric,
            num_perturbed_waters: 0,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterBox {
    pub system: ParticleSystem,
    pub params: NonbondedParameters,
}

/// Three LJ types: the oxygen, a hydrogen with a small LJ sphere and a
/// hydrogen without LJ.
pub fn water_types() -> Vec<LjTypeParam> {
    vec![
        LjTypeParam {
            name: "OW".to_string(),
            sigma: 0.316_557,
            epsilon: 0.650_194,
        },
        LjTypeParam {
            name: "HW_LJ".to_string(),
            sigma: 0.04,
            epsilon: 0.192_464,
        },
        LjTypeParam {
            name: "HW".to_string(),
            sigma: 0.0,
            epsilon: 0.0,
        },
    ]
}

/// Builds waters on a cubic grid with jittered oxygens and random
/// orientations.
///
/// The first third of the atoms is uncharged and the hydrogens of the last
/// third carry LJ. Atom `a` of `n` is in energy group `a * groups / n`.
/// Perturbed waters keep their geometry; in the B state their charges are
/// halved and their oxygens take the small hydrogen LJ type.
pub fn water_box(options: &WaterBoxOptions) -> Result<WaterBox, WaterBoxError> {
    let num_waters = options.num_waters;
    if num_waters == 0 {
        return Err(WaterBoxError::Empty);
    }
    let num_atoms = 3 * num_waters;
    if options.num_energy_groups == 0 || options.num_energy_groups > num_atoms {
        return Err(WaterBoxError::InvalidEnergyGroups(options.num_energy_groups));
    }

    let per_dim = (1..).find(|k| k * k * k >= num_waters).unwrap_or(1);
    let box_length = WATER_SPACING * per_dim as Real;
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut coordinates = Vec::with_capacity(num_atoms);
    for w in 0..num_waters {
        let cell = RVec::new(
            (w % per_dim) as Real,
            ((w / per_dim) % per_dim) as Real,
            (w / (per_dim * per_dim)) as Real,
        );
        let jitter = RVec::new(
            rng.gen_range(-POSITION_JITTER..POSITION_JITTER),
            rng.gen_range(-POSITION_JITTER..POSITION_JITTER),
            rng.gen_range(-POSITION_JITTER..POSITION_JITTER),
        );
        let oxygen = (cell + RVec::repeat(0.5)) * WATER_SPACING + jitter;

        let u = random_unit_vector(&mut rng);
        let v = random_perpendicular(&mut rng, &u);
        let angle = HOH_ANGLE_DEGREES.to_radians();
        coordinates.push(oxygen);
        coordinates.push(oxygen + u * OH_BOND_LENGTH);
        coordinates.push(oxygen + (u * angle.cos() + v * angle.sin()) * OH_BOND_LENGTH);
    }

    let charges: Vec<Real> = (0..num_atoms)
        .map(|a| match a {
            a if a < num_atoms / 3 => 0.0,
            a if a % 3 == 0 => CHARGE_OXYGEN,
            _ => CHARGE_HYDROGEN,
        })
        .collect();
    let types: Vec<usize> = (0..num_atoms)
        .map(|a| match a {
            a if a % 3 == 0 => TYPE_OXYGEN,
            a if a >= 2 * num_atoms / 3 => TYPE_HYDROGEN_LJ,
            _ => TYPE_HYDROGEN,
        })
        .collect();
    let energy_groups = (0..num_atoms)
        .map(|a| a * options.num_energy_groups / num_atoms)
        .collect();
    let exclusions = (0..num_atoms)
        .map(|a| {
            let first = a - a % 3;
            (first..first + 3).filter(|&b| b != a).collect()
        })
        .collect();

    let perturbation = (options.num_perturbed_waters > 0).then(|| {
        let first = 3 * num_waters.saturating_sub(options.num_perturbed_waters);
        Perturbation {
            perturbed: (0..num_atoms).map(|a| a >= first).collect(),
            charges_b: charges
                .iter()
                .enumerate()
                .map(|(a, &q)| if a >= first { 0.5 * q } else { q })
                .collect(),
            types_b: types
                .iter()
                .enumerate()
                .map(|(a, &t)| {
                    if a >= first && t == TYPE_OXYGEN {
                        TYPE_HYDROGEN_LJ
                    } else {
                        t
                    }
                })
                .collect(),
        }
    });

    let params = NonbondedParameters::from_sigma_epsilon(&water_types(), options.combination_rule)?;

    Ok(WaterBox {
        system: ParticleSystem {
            coordinates,
            types,
            charges,
            energy_groups,
            num_energy_groups: options.num_energy_groups,
            exclusions,
            periodic_box: PeriodicBox::cubic(box_length),
            perturbation,
        },
        params,
    })
}

fn random_unit_vector(rng: &mut StdRng) -> RVec {
    loop {
        let v = RVec::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let norm2 = v.norm_squared();
        if norm2 > 1e-4 && norm2 <= 1.0 {
            return v / norm2.sqrt();
        }
    }
}

fn random_perpendicular(rng: &mut StdRng, u: &RVec) -> RVec {
    loop {
        let w = random_unit_vector(rng);
        let v = w - u * w.dot(u);
        let norm = v.norm();
        if norm > 1e-2 {
            return v / norm;
        }
    }
}
