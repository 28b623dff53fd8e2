//! # Core Models Module
//!
//! Data structures shared between the pair search and the kernels.
//!
//! ## Key Components
//!
//! - [`system`] - Particle topology and coordinates in the original atom order
//! - [`atom_data`] - Padded, cluster-tiled kernel copy of the particle data
//! - [`pairlist`] - Cluster pairlists with their interaction masks
//! - [`fep_pairlist`] - Atom-pair lists of perturbed interactions
//! - [`pairlist_set`] - Per-thread lists of each locality
//! - [`shift`] - Periodic box and the 27 image shift vectors

pub mod atom_data;
pub mod fep_pairlist;
pub mod pairlist;
pub mod pairlist_set;
pub mod shift;
pub mod system;
