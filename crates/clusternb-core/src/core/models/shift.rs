use crate::core::math::{RVec, Real};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

pub const NUM_SHIFTS: usize = 27;
pub const CENTRAL_SHIFT: usize = 13;

/// Rectangular periodic unit cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBox {
    pub lengths: [Real; 3],
}

impl PeriodicBox {
    pub fn cubic(length: Real) -> Self {
        Self {
            lengths: [length; 3],
        }
    }

    pub fn min_length(&self) -> Real {
        self.lengths.iter().copied().fold(Real::INFINITY, Real::min)
    }

    pub fn volume(&self) -> Real {
        self.lengths.iter().product()
    }

    /// Wraps a position into `[0, L)` along every dimension.
    pub fn wrap(&self, x: &RVec) -> RVec {
        RVec::new(
            x.x.rem_euclid(self.lengths[0]),
            x.y.rem_euclid(self.lengths[1]),
            x.z.rem_euclid(self.lengths[2]),
        )
    }
}

/// Index of the periodic image offset `(x, y, z)`, each component in `-1..=1`.
///
/// Layout: `(z + 1) * 9 + (y + 1) * 3 + (x + 1)`, so the zero shift sits at
/// [`CENTRAL_SHIFT`] and `shift_index(-v) == NUM_SHIFTS - 1 - shift_index(v)`.
#[inline]
pub fn shift_index(x: i32, y: i32, z: i32) -> usize {
    debug_assert!((-1..=1).contains(&x) && (-1..=1).contains(&y) && (-1..=1).contains(&z));
    ((z + 1) * 9 + (y + 1) * 3 + (x + 1)) as usize
}

/// The image offset encoded by `index`.
#[inline]
pub fn shift_offset(index: usize) -> [i32; 3] {
    let i = index as i32;
    [i % 3 - 1, (i / 3) % 3 - 1, i / 9 - 1]
}

pub fn calc_shift_vectors(periodic_box: &PeriodicBox) -> Vec<RVec> {
    let [lx, ly, lz] = periodic_box.lengths;
    iproduct!(-1..=1, -1..=1, -1..=1)
        .map(|(z, y, x)| RVec::new(x as Real * lx, y as Real * ly, z as Real * lz))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_shift_is_the_zero_vector() {
        let shifts = calc_shift_vectors(&PeriodicBox::cubic(2.0));
        assert_eq!(shifts.len(), NUM_SHIFTS);
        assert_eq!(shifts[CENTRAL_SHIFT], RVec::zeros());
        assert_eq!(shift_index(0, 0, 0), CENTRAL_SHIFT);
    }

    #[test]
    fn shift_vectors_follow_the_index_layout() {
        let pbox = PeriodicBox {
            lengths: [1.0, 2.0, 3.0],
        };
        let shifts = calc_shift_vectors(&pbox);
        for index in 0..NUM_SHIFTS {
            let [x, y, z] = shift_offset(index);
            assert_eq!(shift_index(x, y, z), index);
            assert_eq!(
                shifts[index],
                RVec::new(x as Real, 2.0 * y as Real, 3.0 * z as Real)
            );
        }
    }

    #[test]
    fn opposite_shifts_are_mirrored_around_the_centre() {
        for index in 0..NUM_SHIFTS {
            let [x, y, z] = shift_offset(index);
            assert_eq!(shift_index(-x, -y, -z), NUM_SHIFTS - 1 - index);
        }
    }

    #[test]
    fn wrap_moves_positions_into_the_unit_cell() {
        let pbox = PeriodicBox::cubic(2.0);
        let wrapped = pbox.wrap(&RVec::new(-0.5, 2.5, 1.0));
        assert!((wrapped - RVec::new(1.5, 0.5, 1.0)).norm() < 1e-12);
    }
}
