use crate::core::models::shift::NUM_SHIFTS;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FepIEntry {
    pub i: usize,
    pub shift: usize,
    pub j_start: usize,
    pub j_end: usize,
}

impl FepIEntry {
    #[inline]
    pub fn j_range(&self) -> Range<usize> {
        self.j_start..self.j_end
    }
}

/// Atom-pair list of the interactions involving perturbed atoms, for one
/// thread.
///
/// Excluded pairs stay in the list with `interacts == false` so the kernel
/// can apply their reaction-field or Ewald correction. The self pair of a
/// perturbed atom is listed as an excluded pair with `j == i`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FepPairlist {
    pub entries: Vec<FepIEntry>,
    pub j: Vec<usize>,
    pub interacts: Vec<bool>,
}

impl FepPairlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the pairs of atom `i` at `shift`; nothing is added for an
    /// empty pair set.
    pub fn push_entry(&mut self, i: usize, shift: usize, pairs: impl IntoIterator<Item = (usize, bool)>) {
        let j_start = self.j.len();
        for (j, interacts) in pairs {
            self.j.push(j);
            self.interacts.push(interacts);
        }
        let j_end = self.j.len();
        if j_end > j_start {
            self.entries.push(FepIEntry {
                i,
                shift,
                j_start,
                j_end,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_pairs(&self) -> usize {
        self.j.len()
    }

    /// Checks that every entry indexes inside the list and inside
    /// `num_atoms`, and that every shift is one of the 27 images.
    pub fn validate(&self, num_atoms: usize) -> Result<(), String> {
        if self.j.len() != self.interacts.len() {
            return Err(format!(
                "{} j atoms but {} interaction flags",
                self.j.len(),
                self.interacts.len()
            ));
        }
        for entry in &self.entries {
            if entry.j_start > entry.j_end || entry.j_end > self.j.len() {
                return Err(format!(
                    "j range {}..{} outside the {} listed pairs",
                    entry.j_start,
                    entry.j_end,
                    self.j.len()
                ));
            }
            if entry.shift >= NUM_SHIFTS {
                return Err(format!("shift index {} out of range", entry.shift));
            }
            if entry.i >= num_atoms {
                return Err(format!("atom {} of {num_atoms}", entry.i));
            }
        }
        if let Some(&j) = self.j.iter().find(|&&j| j >= num_atoms) {
            return Err(format!("atom {j} of {num_atoms}"));
        }
        Ok(())
    }

    pub fn touched_atoms(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .flat_map(move |e| std::iter::once(e.i).chain(self.j[e.j_range()].iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_record_their_pair_ranges() {
        let mut list = FepPairlist::new();
        list.push_entry(3, 13, [(3, false), (5, true)]);
        list.push_entry(4, 13, Vec::<(usize, bool)>::new());
        list.push_entry(4, 22, [(0, true)]);

        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.num_pairs(), 3);
        assert_eq!(list.entries[1].j_range(), 2..3);
        assert_eq!(list.interacts, vec![false, true, true]);
        assert_eq!(list.touched_atoms().collect::<Vec<_>>(), vec![3, 3, 5, 4, 0]);
    }

    #[test]
    fn validate_rejects_inconsistent_entries() {
        let mut list = FepPairlist::new();
        list.push_entry(0, 13, [(1, true), (2, false)]);
        assert!(list.validate(3).is_ok());
        assert!(list.validate(2).is_err());

        let mut bad_shift = list.clone();
        bad_shift.entries[0].shift = 99;
        assert!(bad_shift.validate(3).is_err());

        let mut bad_range = list.clone();
        bad_range.entries[0].j_end = 5;
        assert!(bad_range.validate(3).is_err());

        let mut bad_flags = list.clone();
        bad_flags.interacts.pop();
        assert!(bad_flags.validate(3).is_err());
    }

    #[test]
    fn new_list_is_empty() {
        assert!(FepPairlist::new().is_empty());
    }
}
