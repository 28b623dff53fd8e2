use std::ops::Range;

/// Per-i-cluster flags of a [`CiEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CiFlags(u32);

impl CiFlags {
    /// At least one i atom carries LJ parameters.
    pub const DO_LJ: u32 = 1 << 0;
    /// At least one i atom carries a charge.
    pub const DO_COUL: u32 = 1 << 1;
    /// Only the first half of the i-cluster carries LJ parameters.
    pub const HALF_LJ: u32 = 1 << 2;
    /// Central-shift entry of the cluster, owner of its self-energy terms.
    pub const DO_SELF: u32 = 1 << 3;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

/// A j-cluster with its interaction mask.
///
/// Bit `i * J + j` of `excl` is set when atom `i` of the i-cluster and atom
/// `j` of the j-cluster interact; cleared bits cover exclusions, padding,
/// perturbed atoms and, at the central shift, pairs with `atom(j) <= atom(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CjEntry {
    pub cj: usize,
    pub excl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiEntry {
    pub ci: usize,
    pub shift: usize,
    pub cj_start: usize,
    pub cj_end: usize,
    pub flags: CiFlags,
}

impl CiEntry {
    #[inline]
    pub fn cj_range(&self) -> Range<usize> {
        self.cj_start..self.cj_end
    }
}

/// Cluster pairlist executed by one thread.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterPairlist {
    j_cluster_size: usize,
    pub ci: Vec<CiEntry>,
    pub cj: Vec<CjEntry>,
}

impl ClusterPairlist {
    pub fn new(j_cluster_size: usize) -> Self {
        Self {
            j_cluster_size,
            ci: Vec::new(),
            cj: Vec::new(),
        }
    }

    #[inline]
    pub fn j_cluster_size(&self) -> usize {
        self.j_cluster_size
    }

    /// Mask with every `4 × J` pair interacting.
    #[inline]
    pub fn full_mask(&self) -> u32 {
        full_interaction_mask(self.j_cluster_size)
    }

    /// Appends an i-cluster entry with its j-clusters. Entries without
    /// j-clusters are dropped.
    pub fn push_ci(
        &mut self,
        ci: usize,
        shift: usize,
        flags: CiFlags,
        cj: impl IntoIterator<Item = CjEntry>,
    ) {
        let cj_start = self.cj.len();
        self.cj.extend(cj);
        let cj_end = self.cj.len();
        if cj_end > cj_start {
            self.ci.push(CiEntry {
                ci,
                shift,
                cj_start,
                cj_end,
                flags,
            });
        }
    }

    #[inline]
    pub fn cj_entries(&self, entry: &CiEntry) -> &[CjEntry] {
        &self.cj[entry.cj_range()]
    }

    pub fn is_empty(&self) -> bool {
        self.ci.is_empty()
    }

    pub fn num_cluster_pairs(&self) -> usize {
        self.cj.len()
    }

    /// Atoms an i-entry and its j-clusters may write forces to.
    pub fn touched_atoms(&self, i_cluster_size: usize) -> impl Iterator<Item = usize> + '_ {
        let j_size = self.j_cluster_size;
        self.ci.iter().flat_map(move |entry| {
            let i_atoms = entry.ci * i_cluster_size..(entry.ci + 1) * i_cluster_size;
            let j_atoms = self
                .cj_entries(entry)
                .iter()
                .flat_map(move |cj| cj.cj * j_size..(cj.cj + 1) * j_size);
            i_atoms.chain(j_atoms)
        })
    }
}

#[inline]
pub fn full_interaction_mask(j_cluster_size: usize) -> u32 {
    ((1u64 << (4 * j_cluster_size)) - 1) as u32
}

/// Bit of the pair `(i_local, j_local)` in a [`CjEntry::excl`] mask.
#[inline(always)]
pub fn interaction_bit(i_local: usize, j_local: usize, j_cluster_size: usize) -> u32 {
    1u32 << (i_local * j_cluster_size + j_local)
}
