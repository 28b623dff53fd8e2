//! # clusternb
//!
//! Cluster-pair nonbonded interaction kernels with deterministic
//! thread-parallel force reduction and free-energy dispatch.
//!
//! Atoms are tiled into small i- and j-clusters and a pair search hands out
//! per-thread lists of cluster pairs. Each thread runs one kernel variant,
//! chosen from the electrostatics, the LJ treatment and the cluster layout,
//! into its own force buffer; the buffers are then reduced block by block
//! in a fixed thread order, so results do not depend on scheduling.
//! Perturbed pairs go through a separate soft-core free-energy kernel.
//!
//! ## Layers
//!
//! - **[`core`]**: particle data, pairlists, interaction constants, Ewald
//!   tables, parameter tables and a double-precision reference evaluator.
//! - **[`engine`]**: kernel selection, the kernels themselves, the threaded
//!   force buffer, the free-energy dispatch and
//!   [`engine::nbv::NonbondedVerlet`], which drives them.
//! - **[`workflows`]**: [`workflows::evaluate::run`], a one-call force and
//!   energy evaluation configured from TOML.
//!
//! ## Features
//!
//! - `parallel` (default): run per-thread kernel passes and reductions on
//!   the rayon pool.
//! - `single-precision`: use `f32` for [`core::math::Real`].

pub mod core;
pub mod engine;
pub mod workflows;
