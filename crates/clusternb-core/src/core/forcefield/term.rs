use crate::core::math::Real;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NonbondedEnergies {
    pub vdw: Real,
    pub coulomb: Real,
}

impl NonbondedEnergies {
    pub fn new(vdw: Real, coulomb: Real) -> Self {
        Self { vdw, coulomb }
    }

    #[inline]
    pub fn total(&self) -> Real {
        self.vdw + self.coulomb
    }
}

impl Add for NonbondedEnergies {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            vdw: self.vdw + rhs.vdw,
            coulomb: self.coulomb + rhs.coulomb,
        }
    }
}

impl AddAssign for NonbondedEnergies {
    fn add_assign(&mut self, rhs: Self) {
        self.vdw += rhs.vdw;
        self.coulomb += rhs.coulomb;
    }
}

impl Sum for NonbondedEnergies {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// LJ and Coulomb energies per energy-group pair, row-major `n × n`.
///
/// Kernels add into cell `g_i * n + g_j` without ordering the pair;
/// [`GroupPairEnergies::fold`] moves everything into the upper triangle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupPairEnergies {
    num_groups: usize,
    pub vdw: Vec<Real>,
    pub coulomb: Vec<Real>,
}

impl GroupPairEnergies {
    pub fn new(num_groups: usize) -> Self {
        Self {
            num_groups,
            vdw: vec![0.0; num_groups * num_groups],
            coulomb: vec![0.0; num_groups * num_groups],
        }
    }

    #[inline]
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    #[inline]
    pub fn cell(&self, gi: usize, gj: usize) -> usize {
        gi * self.num_groups + gj
    }

    pub fn get(&self, gi: usize, gj: usize) -> NonbondedEnergies {
        let c = self.cell(gi, gj);
        NonbondedEnergies::new(self.vdw[c], self.coulomb[c])
    }

    pub fn clear(&mut self) {
        self.vdw.fill(0.0);
        self.coulomb.fill(0.0);
    }

    pub fn add_assign_from(&mut self, other: &Self) {
        debug_assert_eq!(self.num_groups, other.num_groups);
        for (a, b) in self.vdw.iter_mut().zip(&other.vdw) {
            *a += *b;
        }
        for (a, b) in self.coulomb.iter_mut().zip(&other.coulomb) {
            *a += *b;
        }
    }

    /// Adds each lower-triangle cell `[j][i]` into `[i][j]` and zeroes it.
    pub fn fold(&mut self) {
        let n = self.num_groups;
        for i in 0..n {
            for j in (i + 1)..n {
                let (upper, lower) = (i * n + j, j * n + i);
                self.vdw[upper] += self.vdw[lower];
                self.vdw[lower] = 0.0;
                self.coulomb[upper] += self.coulomb[lower];
                self.coulomb[lower] = 0.0;
            }
        }
    }

    pub fn total(&self) -> NonbondedEnergies {
        NonbondedEnergies::new(self.vdw.iter().sum(), self.coulomb.iter().sum())
    }
}
