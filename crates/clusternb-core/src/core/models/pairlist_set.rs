use super::fep_pairlist::FepPairlist;
use super::pairlist::ClusterPairlist;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Locality {
    Local,
    NonLocal,
}

/// Per-thread cluster and free-energy lists of one locality. List `t` of
/// either kind is executed by thread `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct PairlistSet {
    pub cluster_lists: Vec<ClusterPairlist>,
    pub fep_lists: Vec<FepPairlist>,
}

impl PairlistSet {
    pub fn num_threads(&self) -> usize {
        self.cluster_lists.len()
    }

    pub fn num_cluster_pairs(&self) -> usize {
        self.cluster_lists.iter().map(ClusterPairlist::num_cluster_pairs).sum()
    }

    pub fn num_fep_pairs(&self) -> usize {
        self.fep_lists.iter().map(FepPairlist::num_pairs).sum()
    }

    pub fn has_fep_pairs(&self) -> bool {
        self.fep_lists.iter().any(|l| !l.is_empty())
    }
}

/// The pairlists of all localities from one search.
///
/// Every set carries a generation number so consumers can detect that they
/// were set up for an older search.
#[derive(Debug, Clone, PartialEq)]
pub struct PairlistSets {
    local: PairlistSet,
    non_local: Option<PairlistSet>,
    generation: u64,
}

impl PairlistSets {
    pub fn new(local: PairlistSet, non_local: Option<PairlistSet>) -> Self {
        Self {
            local,
            non_local,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn get(&self, locality: Locality) -> Option<&PairlistSet> {
        match locality {
            Locality::Local => Some(&self.local),
            Locality::NonLocal => self.non_local.as_ref(),
        }
    }

    pub fn local(&self) -> &PairlistSet {
        &self.local
    }

    pub fn non_local(&self) -> Option<&PairlistSet> {
        self.non_local.as_ref()
    }

    /// All present sets, local first.
    pub fn iter(&self) -> impl Iterator<Item = &PairlistSet> {
        std::iter::once(&self.local).chain(self.non_local.iter())
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_set(threads: usize) -> PairlistSet {
        PairlistSet {
            cluster_lists: vec![ClusterPairlist::new(4); threads],
            fep_lists: vec![FepPairlist::new(); threads],
        }
    }

    #[test]
    fn every_search_gets_a_new_generation() {
        let a = PairlistSets::new(empty_set(2), None);
        let b = PairlistSets::new(empty_set(2), None);
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn non_local_set_is_optional() {
        let sets = PairlistSets::new(empty_set(1), None);
        assert!(sets.get(Locality::NonLocal).is_none());
        assert_eq!(sets.iter().count(), 1);

        let sets = PairlistSets::new(empty_set(1), Some(empty_set(1)));
        assert_eq!(sets.get(Locality::NonLocal).map(PairlistSet::num_threads), Some(1));
        assert_eq!(sets.iter().count(), 2);
    }

    #[test]
    fn fep_pairs_are_counted_over_threads() {
        let mut set = empty_set(2);
        assert!(!set.has_fep_pairs());
        set.fep_lists[1].push_entry(0, 13, [(0, false), (1, true)]);
        assert!(set.has_fep_pairs());
        assert_eq!(set.num_fep_pairs(), 2);
    }
}
