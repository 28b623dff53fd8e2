//! Brute-force reference pair search.
//!
//! [`ReferencePairSearch`] checks every cluster pair against every periodic
//! image. It is meant for validation and small systems; a grid search can
//! take its place through [`PairlistProvider`].

use crate::core::math::{RVec, Real};
use crate::core::models::atom_data::{AtomData, AtomInfo, I_CLUSTER_SIZE};
use crate::core::models::fep_pairlist::FepPairlist;
use crate::core::models::pairlist::{CiFlags, CjEntry, ClusterPairlist, interaction_bit};
use crate::core::models::pairlist_set::{PairlistSet, PairlistSets};
use crate::core::models::shift::{CENTRAL_SHIFT, NUM_SHIFTS, calc_shift_vectors};
use crate::core::models::system::{ModelError, ParticleSystem};
use tracing::{debug, instrument};

/// Source of the per-thread pairlists consumed by the kernels.
pub trait PairlistProvider {
    fn search(&self, system: &ParticleSystem, atoms: &AtomData) -> Result<PairlistSets, ModelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePairSearch {
    rlist: Real,
    num_threads: usize,
    first_non_local_cluster: Option<usize>,
}

impl ReferencePairSearch {
    pub fn new(rlist: Real, num_threads: usize) -> Self {
        Self {
            rlist,
            num_threads: num_threads.max(1),
            first_non_local_cluster: None,
        }
    }

    /// Assigns i-clusters from `first_cluster` on to the non-local set.
    pub fn with_non_local_split(mut self, first_cluster: usize) -> Self {
        self.first_non_local_cluster = Some(first_cluster);
        self
    }

    pub fn rlist(&self) -> Real {
        self.rlist
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn build_set(
        &self,
        system: &ParticleSystem,
        atoms: &AtomData,
        shift_vectors: &[RVec],
        clusters: &[usize],
    ) -> PairlistSet {
        let n = self.num_threads;
        let mut cluster_lists = Vec::with_capacity(n);
        let mut fep_lists = Vec::with_capacity(n);
        for t in 0..n {
            let chunk = &clusters[t * clusters.len() / n..(t + 1) * clusters.len() / n];
            let mut list = ClusterPairlist::new(atoms.j_cluster_size());
            let mut fep_list = FepPairlist::new();
            for &ci in chunk {
                self.add_cluster_pairs(&mut list, system, atoms, shift_vectors, ci);
                if system.perturbation.is_some() {
                    self.add_fep_pairs(&mut fep_list, system, atoms, shift_vectors, ci);
                }
            }
            cluster_lists.push(list);
            fep_lists.push(fep_list);
        }
        PairlistSet {
            cluster_lists,
            fep_lists,
        }
    }

    fn add_cluster_pairs(
        &self,
        list: &mut ClusterPairlist,
        system: &ParticleSystem,
        atoms: &AtomData,
        shift_vectors: &[RVec],
        ci: usize,
    ) {
        let j_size = atoms.j_cluster_size();
        let rlist2 = self.rlist * self.rlist;
        let i_first = ci * I_CLUSTER_SIZE;
        let i_atoms = i_first..i_first + I_CLUSTER_SIZE;
        let base_flags = cluster_flags(atoms, ci);
        let perturbed = |a: usize| atoms.atom_info[a].contains(AtomInfo::PERTURBED);

        for shift in CENTRAL_SHIFT..NUM_SHIFTS {
            let central = shift == CENTRAL_SHIFT;
            let shift_vec = shift_vectors[shift];
            let mut cj_entries = Vec::new();

            for cj in 0..atoms.num_j_clusters() {
                let j_first = cj * j_size;
                let j_atoms = j_first..j_first + j_size;
                if central && j_atoms.end <= i_first + 1 {
                    continue;
                }
                let is_self = central && j_first < i_atoms.end && i_atoms.start < j_atoms.end;

                let mut mask = 0u32;
                let mut in_range = false;
                for a in i_atoms.clone().filter(|&a| atoms.is_real(a)) {
                    let xi = atoms.x[a] + shift_vec;
                    for b in j_atoms.clone().filter(|&b| atoms.is_real(b)) {
                        if (central && b <= a) || perturbed(a) || perturbed(b) {
                            continue;
                        }
                        if (xi - atoms.x[b]).norm_squared() < rlist2 {
                            in_range = true;
                        }
                        if !system.is_excluded(a, b) {
                            mask |= interaction_bit(a - i_first, b - j_first, j_size);
                        }
                    }
                }
                if in_range || is_self {
                    cj_entries.push(CjEntry { cj, excl: mask });
                }
            }

            let mut flags = base_flags;
            if central {
                flags.insert(CiFlags::DO_SELF);
            }
            list.push_ci(ci, shift, flags, cj_entries);
        }
    }

    /// Adds every pair of an atom of cluster `ci` with a perturbed partner:
    /// pairs within the list radius, excluded pairs at their nearest image
    /// and the self pair of perturbed atoms.
    fn add_fep_pairs(
        &self,
        list: &mut FepPairlist,
        system: &ParticleSystem,
        atoms: &AtomData,
        shift_vectors: &[RVec],
        ci: usize,
    ) {
        let rlist2 = self.rlist * self.rlist;
        let num_atoms = atoms.num_atoms();
        let i_first = ci * I_CLUSTER_SIZE;

        for a in (i_first..i_first + I_CLUSTER_SIZE).filter(|&a| atoms.is_real(a)) {
            for shift in CENTRAL_SHIFT..NUM_SHIFTS {
                let central = shift == CENTRAL_SHIFT;
                let xi = atoms.x[a] + shift_vectors[shift];
                let mut pairs = Vec::new();
                for b in 0..num_atoms {
                    if !(system.is_perturbed(a) || system.is_perturbed(b)) || (central && b < a) {
                        continue;
                    }
                    if central && b == a {
                        pairs.push((b, false));
                        continue;
                    }
                    let excluded = system.is_excluded(a, b);
                    let d2 = (xi - atoms.x[b]).norm_squared();
                    let nearest = || {
                        shift_vectors
                            .iter()
                            .all(|s| (atoms.x[a] + s - atoms.x[b]).norm_squared() >= d2)
                    };
                    if d2 < rlist2 || (excluded && nearest()) {
                        pairs.push((b, !excluded));
                    }
                }
                list.push_entry(a, shift, pairs);
            }
        }
    }
}

/// LJ and Coulomb flags of an i-cluster from its atom info.
fn cluster_flags(atoms: &AtomData, ci: usize) -> CiFlags {
    let info = |k: usize| atoms.atom_info[ci * I_CLUSTER_SIZE + k];
    let mut flags = CiFlags::default();
    if (0..I_CLUSTER_SIZE).any(|k| info(k).contains(AtomInfo::HAS_VDW)) {
        flags.insert(CiFlags::DO_LJ);
        let half = I_CLUSTER_SIZE / 2;
        if (half..I_CLUSTER_SIZE).all(|k| !info(k).contains(AtomInfo::HAS_VDW)) {
            flags.insert(CiFlags::HALF_LJ);
        }
    }
    if (0..I_CLUSTER_SIZE).any(|k| info(k).contains(AtomInfo::HAS_CHARGE)) {
        flags.insert(CiFlags::DO_COUL);
    }
    flags
}

impl PairlistProvider for ReferencePairSearch {
    #[instrument(skip_all, name = "reference_pair_search")]
    fn search(&self, system: &ParticleSystem, atoms: &AtomData) -> Result<PairlistSets, ModelError> {
        let box_length = system.periodic_box.min_length();
        if self.rlist >= 0.5 * box_length {
            return Err(ModelError::CutoffTooLarge {
                radius: self.rlist,
                box_length,
            });
        }

        let shift_vectors = calc_shift_vectors(&system.periodic_box);
        let real_clusters: Vec<usize> = (0..atoms.num_i_clusters())
            .filter(|&ci| atoms.is_real(ci * I_CLUSTER_SIZE))
            .collect();

        let sets = match self.first_non_local_cluster {
            None => {
                let local = self.build_set(system, atoms, &shift_vectors, &real_clusters);
                PairlistSets::new(local, None)
            }
            Some(split) => {
                let (local, non_local): (Vec<usize>, Vec<usize>) =
                    real_clusters.iter().copied().partition(|&ci| ci < split);
                PairlistSets::new(
                    self.build_set(system, atoms, &shift_vectors, &local),
                    Some(self.build_set(system, atoms, &shift_vectors, &non_local)),
                )
            }
        };

        debug!(
            num_threads = self.num_threads,
            cluster_pairs = sets.iter().map(PairlistSet::num_cluster_pairs).sum::<usize>(),
            fep_pairs = sets.iter().map(PairlistSet::num_fep_pairs).sum::<usize>(),
            "Pairlists built."
        );
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::pairlist_set::Locality;
    use crate::core::systems::{WaterBoxOptions, water_box};
    use std::collections::HashSet;

    fn listed_pairs(set: &PairlistSet, atoms: &AtomData) -> Vec<(usize, usize, usize)> {
        let j_size = atoms.j_cluster_size();
        let mut pairs = Vec::new();
        for list in &set.cluster_lists {
            for entry in &list.ci {
                for cj in list.cj_entries(entry) {
                    for i in 0..I_CLUSTER_SIZE {
                        for j in 0..j_size {
                            if cj.excl & interaction_bit(i, j, j_size) != 0 {
                                pairs.push((
                                    entry.ci * I_CLUSTER_SIZE + i,
                                    cj.cj * j_size + j,
                                    entry.shift,
                                ));
                            }
                        }
                    }
                }
            }
        }
        pairs
    }

    #[test]
    fn every_pair_within_range_is_listed_exactly_once() {
        let water = water_box(&WaterBoxOptions::default()).unwrap();
        let rlist: Real = 0.9;
        for j_size in [2, 4, 8] {
            let atoms = AtomData::new(&water.system, &water.params, j_size).unwrap();
            let sets = ReferencePairSearch::new(rlist, 3)
                .search(&water.system, &atoms)
                .unwrap();
            let listed = listed_pairs(sets.local(), &atoms);
            let unique: HashSet<_> = listed.iter().copied().collect();
            assert_eq!(unique.len(), listed.len(), "duplicate pair for J = {j_size}");

            let shifts = calc_shift_vectors(&water.system.periodic_box);
            let x = &water.system.coordinates;
            let n = water.system.num_atoms();
            for a in 0..n {
                for b in 0..n {
                    for (s, sv) in shifts.iter().enumerate() {
                        let within = (x[a] + sv - x[b]).norm_squared() < rlist * rlist;
                        if !within || water.system.is_excluded(a, b) {
                            continue;
                        }
                        let found = unique.contains(&(a, b, s))
                            || unique.contains(&(b, a, NUM_SHIFTS - 1 - s));
                        assert!(found, "pair ({a}, {b}) at shift {s} missing for J = {j_size}");
                    }
                }
            }
        }
    }

    #[test]
    fn central_entries_own_the_self_term() {
        let water = water_box(&WaterBoxOptions::default()).unwrap();
        let atoms = AtomData::new(&water.system, &water.params, 4).unwrap();
        let sets = ReferencePairSearch::new(0.9, 1).search(&water.system, &atoms).unwrap();
        let list = &sets.local().cluster_lists[0];
        let self_entries: Vec<_> = list
            .ci
            .iter()
            .filter(|e| e.flags.contains(CiFlags::DO_SELF))
            .collect();
        assert_eq!(self_entries.len(), atoms.num_i_clusters());
        for entry in self_entries {
            assert_eq!(entry.shift, CENTRAL_SHIFT);
            assert_eq!(list.cj_entries(entry)[0].cj, entry.ci);
        }
    }

    #[test]
    fn threads_and_localities_partition_the_clusters() {
        let water = water_box(&WaterBoxOptions::default()).unwrap();
        let atoms = AtomData::new(&water.system, &water.params, 4).unwrap();
        let whole = ReferencePairSearch::new(0.9, 1).search(&water.system, &atoms).unwrap();
        let split = ReferencePairSearch::new(0.9, 4)
            .with_non_local_split(10)
            .search(&water.system, &atoms)
            .unwrap();

        assert_eq!(split.local().num_threads(), 4);
        let non_local = split.get(Locality::NonLocal).unwrap();
        assert!(non_local.cluster_lists.iter().flat_map(|l| &l.ci).all(|e| e.ci >= 10));
        assert_eq!(
            split.local().num_cluster_pairs() + non_local.num_cluster_pairs(),
            whole.local().num_cluster_pairs()
        );
    }

    #[test]
    fn perturbed_pairs_move_to_the_fep_list() {
        let water = water_box(&WaterBoxOptions {
            num_perturbed_waters: 1,
            ..WaterBoxOptions::default()
        })
        .unwrap();
        let atoms = AtomData::new(&water.system, &water.params, 4).unwrap();
        let sets = ReferencePairSearch::new(0.9, 2).search(&water.system, &atoms).unwrap();

        let listed = listed_pairs(sets.local(), &atoms);
        assert!(listed.iter().all(|&(a, b, _)| a < 78 && b < 78));

        let fep = &sets.local().fep_lists;
        let self_pairs = fep
            .iter()
            .flat_map(|l| {
                l.entries
                    .iter()
                    .flat_map(move |e| l.j[e.j_range()].iter().map(move |&j| (e.i, j)))
            })
            .filter(|(i, j)| i == j)
            .count();
        assert_eq!(self_pairs, 3);

        let excluded: usize = fep
            .iter()
            .map(|l| l.interacts.iter().filter(|&&x| !x).count())
            .sum();
        assert_eq!(excluded, 3 + 3);
    }

    #[test]
    fn oversized_radius_is_rejected() {
        let water = water_box(&WaterBoxOptions::default()).unwrap();
        let atoms = AtomData::new(&water.system, &water.params, 4).unwrap();
        let result = ReferencePairSearch::new(1.0, 1).search(&water.system, &atoms);
        assert!(matches!(result, Err(ModelError::CutoffTooLarge { .. })));
    }
}
