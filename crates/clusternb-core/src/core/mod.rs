//! # Core Module
//!
//! Stateless data models and math for the nonbonded engine.
//!
//! ## Architecture
//!
//! - **Particle data** ([`models`]) - Topology, kernel atom data, cluster and
//!   free-energy pairlists, periodic shifts
//! - **Physics** ([`forcefield`]) - Parameter tables, interaction constants,
//!   Ewald tables, scalar potentials and energy containers
//! - **Pair search** ([`search`]) - The [`search::PairlistProvider`] seam and a
//!   brute-force reference provider
//! - **Validation** ([`reference`], [`systems`]) - A double-precision
//!   all-pairs evaluator and deterministic water boxes
//!
//! Everything here is plain data plus pure functions; the stateful dispatch
//! and reduction machinery lives in [`crate::engine`].

pub mod forcefield;
pub mod math;
pub mod models;
pub mod reference;
pub mod search;
pub mod systems;
