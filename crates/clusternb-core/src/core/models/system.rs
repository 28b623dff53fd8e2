use super::shift::PeriodicBox;
use crate::core::math::{RVec, Real};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Length of '{field}' is {found}, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Atom {atom} has type {atom_type}, but only {num_types} types are defined")]
    TypeOutOfRange {
        atom: usize,
        atom_type: usize,
        num_types: usize,
    },
    #[error("Atom {atom} is in energy group {group}, but only {num_groups} groups are defined")]
    EnergyGroupOutOfRange {
        atom: usize,
        group: usize,
        num_groups: usize,
    },
    #[error("At most {max} energy groups are supported, got {found}")]
    TooManyEnergyGroups { max: usize, found: usize },
    #[error("Exclusion list of atom {atom} refers to atom {other}, which does not exist")]
    InvalidExclusion { atom: usize, other: usize },
    #[error("Cluster size {0} is not supported")]
    UnsupportedClusterSize(usize),
    #[error("Pairlist radius {radius} must be below half the smallest box length {box_length}")]
    CutoffTooLarge { radius: Real, box_length: Real },
}

/// B-state topology of the alchemically perturbed atoms.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    pub perturbed: Vec<bool>,
    pub charges_b: Vec<Real>,
    pub types_b: Vec<usize>,
}

/// Flat particle topology and coordinates in the original atom order.
///
/// Charges and types describe the A state. Exclusion lists hold, for every
/// atom, the atoms it must not interact with directly; an atom is always
/// considered excluded from itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystem {
    pub coordinates: Vec<RVec>,
    pub types: Vec<usize>,
    pub charges: Vec<Real>,
    pub energy_groups: Vec<usize>,
    pub num_energy_groups: usize,
    pub exclusions: Vec<Vec<usize>>,
    pub periodic_box: PeriodicBox,
    pub perturbation: Option<Perturbation>,
}

/// Per-atom A/B parameters consumed by the free-energy kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct FepAtomArrays {
    pub charge_a: Vec<Real>,
    pub charge_b: Vec<Real>,
    pub type_a: Vec<usize>,
    pub type_b: Vec<usize>,
    pub energy_groups: Vec<usize>,
}

impl FepAtomArrays {
    pub fn len(&self) -> usize {
        self.charge_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge_a.is_empty()
    }
}

pub const MAX_ENERGY_GROUPS: usize = 256;

impl ParticleSystem {
    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.coordinates.len()
    }

    #[inline]
    pub fn is_perturbed(&self, atom: usize) -> bool {
        self.perturbation
            .as_ref()
            .is_some_and(|p| p.perturbed[atom])
    }

    pub fn num_perturbed(&self) -> usize {
        self.perturbation
            .as_ref()
            .map_or(0, |p| p.perturbed.iter().filter(|&&x| x).count())
    }

    pub fn is_excluded(&self, a: usize, b: usize) -> bool {
        a == b || self.exclusions[a].contains(&b)
    }

    pub fn validate(&self, num_types: usize) -> Result<(), ModelError> {
        let n = self.num_atoms();
        check_len("types", n, self.types.len())?;
        check_len("charges", n, self.charges.len())?;
        check_len("energy_groups", n, self.energy_groups.len())?;
        check_len("exclusions", n, self.exclusions.len())?;

        if self.num_energy_groups == 0 || self.num_energy_groups > MAX_ENERGY_GROUPS {
            return Err(ModelError::TooManyEnergyGroups {
                max: MAX_ENERGY_GROUPS,
                found: self.num_energy_groups,
            });
        }

        for atom in 0..n {
            check_type(atom, self.types[atom], num_types)?;
            if self.energy_groups[atom] >= self.num_energy_groups {
                return Err(ModelError::EnergyGroupOutOfRange {
                    atom,
                    group: self.energy_groups[atom],
                    num_groups: self.num_energy_groups,
                });
            }
            if let Some(&other) = self.exclusions[atom].iter().find(|&&other| other >= n) {
                return Err(ModelError::InvalidExclusion { atom, other });
            }
        }

        if let Some(p) = &self.perturbation {
            check_len("perturbed", n, p.perturbed.len())?;
            check_len("charges_b", n, p.charges_b.len())?;
            check_len("types_b", n, p.types_b.len())?;
            for (atom, &t) in p.types_b.iter().enumerate() {
                check_type(atom, t, num_types)?;
            }
        }
        Ok(())
    }

    /// A/B arrays for the free-energy kernel. Unperturbed systems report
    /// identical A and B states.
    pub fn fep_atom_arrays(&self) -> FepAtomArrays {
        let (charge_b, type_b) = match &self.perturbation {
            Some(p) => (p.charges_b.clone(), p.types_b.clone()),
            None => (self.charges.clone(), self.types.clone()),
        };
        FepAtomArrays {
            charge_a: self.charges.clone(),
            charge_b,
            type_a: self.types.clone(),
            type_b,
            energy_groups: self.energy_groups.clone(),
        }
    }

    /// Copy of this system with the B state promoted to the A state and the
    /// perturbation removed.
    pub fn to_state_b(&self) -> Self {
        let mut system = self.clone();
        if let Some(p) = system.perturbation.take() {
            system.charges = p.charges_b;
            system.types = p.types_b;
        }
        system
    }

    pub fn without_perturbation(&self) -> Self {
        Self {
            perturbation: None,
            ..self.clone()
        }
    }
}

fn check_len(field: &'static str, expected: usize, found: usize) -> Result<(), ModelError> {
    if expected == found {
        Ok(())
    } else {
        Err(ModelError::LengthMismatch {
            field,
            expected,
            found,
        })
    }
}

fn check_type(atom: usize, atom_type: usize, num_types: usize) -> Result<(), ModelError> {
    if atom_type < num_types {
        Ok(())
    } else {
        Err(ModelError::TypeOutOfRange {
            atom,
            atom_type,
            num_types,
        })
    }
}
