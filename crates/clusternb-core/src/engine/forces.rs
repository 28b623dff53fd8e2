use crate::core::math::{RVec, Real};
use crate::core::models::shift::NUM_SHIFTS;
use nalgebra::Matrix3;

/// Force output of one evaluation: per-atom forces plus the forces per
/// periodic shift that the virial needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceWithShiftForces {
    force: Vec<RVec>,
    shift_forces: Vec<RVec>,
    compute_virial: bool,
}

impl ForceWithShiftForces {
    pub fn new(num_atoms: usize, compute_virial: bool) -> Self {
        Self {
            force: vec![RVec::zeros(); num_atoms],
            shift_forces: vec![RVec::zeros(); NUM_SHIFTS],
            compute_virial,
        }
    }

    pub fn force(&self) -> &[RVec] {
        &self.force
    }

    pub fn force_mut(&mut self) -> &mut [RVec] {
        &mut self.force
    }

    pub fn shift_forces(&self) -> &[RVec] {
        &self.shift_forces
    }

    pub fn shift_forces_mut(&mut self) -> &mut [RVec] {
        &mut self.shift_forces
    }

    #[inline]
    pub fn compute_virial(&self) -> bool {
        self.compute_virial
    }

    pub fn clear(&mut self) {
        self.force.fill(RVec::zeros());
        self.shift_forces.fill(RVec::zeros());
    }

    pub fn into_forces(self) -> Vec<RVec> {
        self.force
    }
}

/// Single-sum virial `-½ (Σ x_i ⊗ f_i + Σ s ⊗ f_s)` from forces on the
/// unshifted coordinates and per-shift force sums.
pub fn calc_virial(x: &[RVec], force: &[RVec], shift_vecs: &[RVec], shift_forces: &[RVec]) -> Matrix3<Real> {
    let atoms: Matrix3<Real> = x.iter().zip(force).map(|(x, f)| x * f.transpose()).sum();
    let shifts: Matrix3<Real> = shift_vecs
        .iter()
        .zip(shift_forces)
        .map(|(s, f)| s * f.transpose())
        .sum();
    -0.5 * (atoms + shifts)
}
