//! # Engine Module
//!
//! The stateful half of the library: everything that owns buffers, runs
//! kernels on worker threads or reduces their results.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - The interaction-constant builder, step
//!   workloads and free-energy parameters
//! - **Kernels** ([`kernels`]) - Kernel selection plus the plain and
//!   SIMD-layout cluster-pair kernels
//! - **Reduction** ([`threaded_force_buffer`]) - Per-thread force buffers
//!   with block-masked, deterministic reduction
//! - **Free energy** ([`free_energy`]) - The perturbed-pair kernel and its
//!   threaded dispatch, including foreign-lambda evaluation
//! - **Orchestration** ([`nbv`]) - [`nbv::NonbondedVerlet`], which ties the
//!   pairlists, atom data and buffers of one search interval together
//! - **Outputs** ([`energy`], [`forces`], [`counters`]) - Energy, dV/dλ,
//!   force and pair-count containers
//! - **Error Handling** ([`error`]) - [`error::EngineError`]
//!
//! All fallible entry points validate their inputs before any worker starts,
//! so an `Err` never leaves output arrays half written.

pub mod config;
pub mod counters;
pub mod energy;
pub mod error;
pub mod forces;
pub mod free_energy;
pub mod kernels;
pub mod nbv;
pub mod progress;
pub mod threaded_force_buffer;
