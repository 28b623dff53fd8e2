use super::system::{ModelError, ParticleSystem};
use crate::core::forcefield::params::NonbondedParameters;
use crate::core::math::{RVec, Real};

/// Size of the i-clusters in every kernel layout.
pub const I_CLUSTER_SIZE: usize = 4;

/// Bits per atom in a packed energy-group word.
pub const ENERGY_GROUP_BITS: usize = 8;

/// Position of padding atoms: far enough from the box that no image of them
/// can come within any cut-off of a real atom.
const FAR_AWAY: Real = -1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtomInfo(u8);

impl AtomInfo {
    pub const HAS_VDW: u8 = 1 << 0;
    pub const HAS_CHARGE: u8 = 1 << 1;
    pub const PERTURBED: u8 = 1 << 2;

    #[inline]
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Kernel-side copy of the particle data in original atom order, padded so
/// that both the i-clusters and the j-clusters tile it exactly.
///
/// Perturbed atoms are masked: their charge is zero and their type is the
/// padding type, so the cluster kernels see them as inert. Their
/// interactions are evaluated by the free-energy kernel instead.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomData {
    num_atoms: usize,
    j_cluster_size: usize,
    num_energy_groups: usize,
    pub x: Vec<RVec>,
    pub types: Vec<usize>,
    pub q: Vec<Real>,
    pub energy_groups: Vec<usize>,
    pub atom_info: Vec<AtomInfo>,
    packed_groups_i: Vec<u64>,
    packed_groups_j: Vec<u64>,
}

impl AtomData {
    pub fn new(
        system: &ParticleSystem,
        params: &NonbondedParameters,
        j_cluster_size: usize,
    ) -> Result<Self, ModelError> {
        if !matches!(j_cluster_size, 2 | 4 | 8) {
            return Err(ModelError::UnsupportedClusterSize(j_cluster_size));
        }
        system.validate(params.num_types())?;

        let num_atoms = system.num_atoms();
        let tile = I_CLUSTER_SIZE.max(j_cluster_size);
        let num_padded = num_atoms.div_ceil(tile) * tile;
        let padding_type = params.padding_type();

        let mut x = Vec::with_capacity(num_padded);
        let mut types = Vec::with_capacity(num_padded);
        let mut q = Vec::with_capacity(num_padded);
        let mut energy_groups = Vec::with_capacity(num_padded);
        let mut atom_info = Vec::with_capacity(num_padded);

        for a in 0..num_atoms {
            let mut info = AtomInfo::default();
            if system.is_perturbed(a) {
                info.insert(AtomInfo::PERTURBED);
                types.push(padding_type);
                q.push(0.0);
            } else {
                if params.has_lj(system.types[a]) {
                    info.insert(AtomInfo::HAS_VDW);
                }
                if system.charges[a] != 0.0 {
                    info.insert(AtomInfo::HAS_CHARGE);
                }
                types.push(system.types[a]);
                q.push(system.charges[a]);
            }
            x.push(system.coordinates[a]);
            energy_groups.push(system.energy_groups[a]);
            atom_info.push(info);
        }
        for _ in num_atoms..num_padded {
            x.push(RVec::repeat(FAR_AWAY));
            types.push(padding_type);
            q.push(0.0);
            energy_groups.push(0);
            atom_info.push(AtomInfo::default());
        }

        let packed_groups_i = pack_energy_groups(&energy_groups, I_CLUSTER_SIZE);
        let packed_groups_j = pack_energy_groups(&energy_groups, j_cluster_size);

        Ok(Self {
            num_atoms,
            j_cluster_size,
            num_energy_groups: system.num_energy_groups,
            x,
            types,
            q,
            energy_groups,
            atom_info,
            packed_groups_i,
            packed_groups_j,
        })
    }

    /// Copies new coordinates for the real atoms; padding stays put.
    pub fn update_coordinates(&mut self, coordinates: &[RVec]) -> Result<(), ModelError> {
        if coordinates.len() != self.num_atoms {
            return Err(ModelError::LengthMismatch {
                field: "coordinates",
                expected: self.num_atoms,
                found: coordinates.len(),
            });
        }
        self.x[..self.num_atoms].copy_from_slice(coordinates);
        Ok(())
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    #[inline]
    pub fn num_atoms_padded(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn j_cluster_size(&self) -> usize {
        self.j_cluster_size
    }

    #[inline]
    pub fn num_energy_groups(&self) -> usize {
        self.num_energy_groups
    }

    pub fn num_i_clusters(&self) -> usize {
        self.num_atoms_padded() / I_CLUSTER_SIZE
    }

    pub fn num_j_clusters(&self) -> usize {
        self.num_atoms_padded() / self.j_cluster_size
    }

    #[inline]
    pub fn is_real(&self, atom: usize) -> bool {
        atom < self.num_atoms
    }

    /// Energy groups of i-cluster `ci`, atom `k` at bits `8k..8k+8`.
    #[inline]
    pub fn packed_groups_i(&self, ci: usize) -> u64 {
        self.packed_groups_i[ci]
    }

    #[inline]
    pub fn packed_groups_j(&self, cj: usize) -> u64 {
        self.packed_groups_j[cj]
    }
}

#[inline]
pub fn unpack_energy_group(packed: u64, atom_in_cluster: usize) -> usize {
    ((packed >> (ENERGY_GROUP_BITS * atom_in_cluster)) & 0xff) as usize
}

fn pack_energy_groups(groups: &[usize], cluster_size: usize) -> Vec<u64> {
    groups
        .chunks(cluster_size)
        .map(|cluster| {
            cluster
                .iter()
                .enumerate()
                .fold(0u64, |acc, (k, &g)| acc | ((g as u64) << (ENERGY_GROUP_BITS * k)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::params::{CombinationRule, LjTypeParam};
    use crate::core::models::shift::PeriodicBox;
    use crate::core::models::system::Perturbation;

    fn params() -> NonbondedParameters {
        let types = vec![
            LjTypeParam {
                name: "OW".to_string(),
                sigma: 0.3,
                epsilon: 0.6,
            },
            LjTypeParam {
                name: "HW".to_string(),
                sigma: 0.0,
                epsilon: 0.0,
            },
        ];
        NonbondedParameters::from_sigma_epsilon(&types, CombinationRule::Geometric).unwrap()
    }

    fn system(n: usize) -> ParticleSystem {
        ParticleSystem {
            coordinates: (0..n).map(|a| RVec::new(0.1 * a as Real, 0.0, 0.0)).collect(),
            types: (0..n).map(|a| a % 2).collect(),
            charges: (0..n).map(|a| if a % 2 == 0 { -0.5 } else { 0.5 }).collect(),
            energy_groups: (0..n).map(|a| a % 3).collect(),
            num_energy_groups: 3,
            exclusions: vec![Vec::new(); n],
            periodic_box: PeriodicBox::cubic(3.0),
            perturbation: None,
        }
    }

    #[test]
    fn padding_fills_clusters_with_inert_atoms() {
        let nb = params();
        let atoms = AtomData::new(&system(6), &nb, 8).unwrap();
        assert_eq!(atoms.num_atoms(), 6);
        assert_eq!(atoms.num_atoms_padded(), 8);
        assert_eq!(atoms.num_i_clusters(), 2);
        assert_eq!(atoms.num_j_clusters(), 1);
        for a in 6..8 {
            assert!(!atoms.is_real(a));
            assert_eq!(atoms.q[a], 0.0);
            assert_eq!(atoms.types[a], nb.padding_type());
            assert!(atoms.x[a].x < -1.0e5);
        }
    }

    #[test]
    fn energy_groups_are_packed_eight_bits_per_atom() {
        let atoms = AtomData::new(&system(8), &params(), 2).unwrap();
        let packed = atoms.packed_groups_i(1);
        let expected: Vec<usize> = (4..8).map(|a| a % 3).collect();
        let unpacked: Vec<usize> = (0..4).map(|k| unpack_energy_group(packed, k)).collect();
        assert_eq!(unpacked, expected);
        assert_eq!(unpack_energy_group(atoms.packed_groups_j(3), 1), 7 % 3);
    }

    #[test]
    fn perturbed_atoms_are_masked_out() {
        let nb = params();
        let mut sys = system(4);
        sys.perturbation = Some(Perturbation {
            perturbed: vec![false, true, false, false],
            charges_b: vec![-0.5, 0.0, -0.5, 0.5],
            types_b: vec![0, 1, 0, 1],
        });
        let atoms = AtomData::new(&sys, &nb, 4).unwrap();
        assert!(atoms.atom_info[1].contains(AtomInfo::PERTURBED));
        assert_eq!(atoms.q[1], 0.0);
        assert_eq!(atoms.types[1], nb.padding_type());
        assert!(atoms.atom_info[0].contains(AtomInfo::HAS_VDW));
        assert!(atoms.atom_info[0].contains(AtomInfo::HAS_CHARGE));
        assert!(!atoms.atom_info[3].contains(AtomInfo::HAS_VDW));
    }

    #[test]
    fn coordinate_update_checks_length() {
        let mut atoms = AtomData::new(&system(4), &params(), 4).unwrap();
        let moved: Vec<RVec> = (0..4).map(|a| RVec::new(0.0, a as Real, 0.0)).collect();
        atoms.update_coordinates(&moved).unwrap();
        assert_eq!(atoms.x[2], RVec::new(0.0, 2.0, 0.0));
        assert!(matches!(
            atoms.update_coordinates(&moved[..3]),
            Err(ModelError::LengthMismatch { found: 3, .. })
        ));
    }

    #[test]
    fn unsupported_cluster_size_is_rejected() {
        assert_eq!(
            AtomData::new(&system(4), &params(), 3),
            Err(ModelError::UnsupportedClusterSize(3))
        );
    }
}
