use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::Real;
use serde::{Deserialize, Serialize};

/// Components of the λ vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FepCoupling {
    Fep,
    Mass,
    Coul,
    Vdw,
    Bonded,
    Restraint,
    Temperature,
}

impl FepCoupling {
    pub const COUNT: usize = 7;

    pub const ALL: [FepCoupling; Self::COUNT] = [
        Self::Fep,
        Self::Mass,
        Self::Coul,
        Self::Vdw,
        Self::Bonded,
        Self::Restraint,
        Self::Temperature,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Energies and dV/dλ at the current λ (slot 0) and at every foreign λ.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForeignLambdaTerms {
    energies: Vec<Real>,
    dvdl: Vec<Real>,
}

impl ForeignLambdaTerms {
    pub fn new(num_foreign_lambdas: usize) -> Self {
        Self {
            energies: vec![0.0; 1 + num_foreign_lambdas],
            dvdl: vec![0.0; 1 + num_foreign_lambdas],
        }
    }

    /// Slots including the current λ.
    pub fn num_lambdas(&self) -> usize {
        self.energies.len()
    }

    pub fn zero(&mut self) {
        self.energies.fill(0.0);
        self.dvdl.fill(0.0);
    }

    pub fn accumulate(&mut self, index: usize, energy: Real, dvdl: Real) {
        self.energies[index] += energy;
        self.dvdl[index] += dvdl;
    }

    pub fn energies(&self) -> &[Real] {
        &self.energies
    }

    pub fn dvdl(&self) -> &[Real] {
        &self.dvdl
    }

    /// Energy differences of every foreign λ relative to the current λ.
    pub fn energy_differences(&self) -> Vec<Real> {
        let current = self.energies.first().copied().unwrap_or(0.0);
        self.energies.iter().skip(1).map(|e| e - current).collect()
    }
}

/// Energy terms accumulated over one force evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyData {
    pub grpp: GroupPairEnergies,
    /// dV/dλ of terms linear in λ.
    pub dvdl_lin: [Real; FepCoupling::COUNT],
    /// dV/dλ of terms with a non-linear λ dependence (soft-core).
    pub dvdl_nonlin: [Real; FepCoupling::COUNT],
    pub foreign_lambda_terms: ForeignLambdaTerms,
}

impl EnergyData {
    pub fn new(num_energy_groups: usize, num_foreign_lambdas: usize) -> Self {
        Self {
            grpp: GroupPairEnergies::new(num_energy_groups),
            dvdl_lin: [0.0; FepCoupling::COUNT],
            dvdl_nonlin: [0.0; FepCoupling::COUNT],
            foreign_lambda_terms: ForeignLambdaTerms::new(num_foreign_lambdas),
        }
    }

    pub fn clear(&mut self) {
        self.grpp.clear();
        self.dvdl_lin = [0.0; FepCoupling::COUNT];
        self.dvdl_nonlin = [0.0; FepCoupling::COUNT];
        self.foreign_lambda_terms.zero();
    }

    /// Linear plus non-linear dV/dλ of one component.
    pub fn dvdl(&self, component: FepCoupling) -> Real {
        let c = component.index();
        self.dvdl_lin[c] + self.dvdl_nonlin[c]
    }
}
