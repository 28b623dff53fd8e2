//! # Force Field Module
//!
//! Physics constants and parameter tables shared by every nonbonded kernel.
//!
//! ## Key Components
//!
//! - [`params`] - Lennard-Jones type tables, combination-rule detection and
//!   TOML/CSV loading
//! - [`interaction_const`] - Cut-offs, reaction-field and Ewald constants, and
//!   the Vdw modifier coefficients
//! - [`ewald`] - Ewald splitting coefficients and the tabulated long-range
//!   correction
//! - [`potentials`] - Scalar double-precision pair potentials
//! - [`term`] - Energy containers, including the energy-group pair matrix

pub mod ewald;
pub mod interaction_const;
pub mod params;
pub mod potentials;
pub mod term;
