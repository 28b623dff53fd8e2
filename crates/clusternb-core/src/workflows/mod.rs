//! # Workflows Module
//!
//! One-call entry points that wire a particle system and a run
//! configuration through the [`crate::engine`] layer.
//!
//! - **Evaluation** ([`evaluate`]) - Pair search, cluster and free-energy
//!   kernels, reduction and virial for repeated force evaluations, returned
//!   as a [`evaluate::ForceReport`]

pub mod evaluate;
