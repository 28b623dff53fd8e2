use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Pair statistics of one kernel pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairCounts {
    /// Pairs visited, including those beyond the cut-off.
    pub num_pairs: usize,
    pub num_pairs_within_cutoff: usize,
    /// Excluded perturbed pairs found beyond the pairlist radius.
    pub num_excluded_beyond_rlist: usize,
}

impl Add for PairCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            num_pairs: self.num_pairs + rhs.num_pairs,
            num_pairs_within_cutoff: self.num_pairs_within_cutoff + rhs.num_pairs_within_cutoff,
            num_excluded_beyond_rlist: self.num_excluded_beyond_rlist
                + rhs.num_excluded_beyond_rlist,
        }
    }
}

impl AddAssign for PairCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for PairCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
