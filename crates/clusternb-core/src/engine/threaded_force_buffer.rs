//! Per-thread force and energy buffers with a deterministic, block-masked
//! reduction.
//!
//! Every worker thread owns one [`ThreadForceBuffer`] and writes to it
//! without synchronization. Before a pass, each thread marks the atoms it
//! may touch; the atoms are grouped in blocks of [`REDUCTION_BLOCK_SIZE`]
//! and only blocks touched by at least one thread are reduced. Within a
//! block the threads are summed in ascending index, so results do not
//! depend on scheduling.

use super::config::StepWorkload;
use super::energy::FepCoupling;
use super::error::EngineError;
use super::forces::ForceWithShiftForces;
use crate::core::forcefield::term::GroupPairEnergies;
use crate::core::math::{RVec, Real};
use crate::core::models::shift::NUM_SHIFTS;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const REDUCTION_BLOCK_BITS: usize = 5;
pub const REDUCTION_BLOCK_SIZE: usize = 1 << REDUCTION_BLOCK_BITS;

/// Thread bitmasks are stored in a `u64` per block.
pub const MAX_THREADS: usize = 64;

fn try_filled<T: Clone>(what: &'static str, count: usize, value: T) -> Result<Vec<T>, EngineError> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| EngineError::Allocation { what, count })?;
    v.resize(count, value);
    Ok(v)
}

/// Mutable views of one thread's outputs, handed to the kernels.
pub struct ThreadOutputs<'a> {
    pub force: &'a mut [RVec],
    pub shift_forces: &'a mut [RVec],
    pub energies: &'a mut GroupPairEnergies,
    pub dvdl: &'a mut [Real; FepCoupling::COUNT],
}

#[derive(Debug, Clone)]
pub struct ThreadForceBuffer {
    thread_index: usize,
    force: Vec<RVec>,
    reduction_mask: Vec<bool>,
    used_blocks: Vec<usize>,
    shift_forces: Vec<RVec>,
    energies: GroupPairEnergies,
    dvdl: [Real; FepCoupling::COUNT],
}

impl ThreadForceBuffer {
    fn new(thread_index: usize, use_energy_terms: bool, num_energy_groups: usize) -> Self {
        let groups = if use_energy_terms { num_energy_groups } else { 0 };
        Self {
            thread_index,
            force: Vec::new(),
            reduction_mask: Vec::new(),
            used_blocks: Vec::new(),
            shift_forces: vec![RVec::zeros(); NUM_SHIFTS],
            energies: GroupPairEnergies::new(groups),
            dvdl: [0.0; FepCoupling::COUNT],
        }
    }

    #[inline]
    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    /// Sizes the force buffer to whole reduction blocks covering
    /// `num_atoms` and marks every block untouched.
    pub fn resize_buffer_and_clear_mask(&mut self, num_atoms: usize) -> Result<(), EngineError> {
        let num_blocks = num_atoms.div_ceil(REDUCTION_BLOCK_SIZE);
        let num_padded = num_blocks * REDUCTION_BLOCK_SIZE;
        if num_padded > self.force.len() {
            self.force
                .try_reserve_exact(num_padded - self.force.len())
                .map_err(|_| EngineError::Allocation {
                    what: "thread force buffer",
                    count: num_padded,
                })?;
        }
        self.force.resize(num_padded, RVec::zeros());
        self.reduction_mask = try_filled("reduction mask", num_blocks, false)?;
        self.used_blocks.clear();
        Ok(())
    }

    #[inline]
    pub fn add_atom_to_mask(&mut self, atom: usize) {
        self.reduction_mask[atom >> REDUCTION_BLOCK_BITS] = true;
    }

    /// Collects the indices of the marked blocks.
    pub fn process_mask(&mut self) {
        self.used_blocks = self
            .reduction_mask
            .iter()
            .enumerate()
            .filter_map(|(b, &used)| used.then_some(b))
            .collect();
    }

    /// Zeroes the used force blocks, the shift forces, energies and dV/dλ.
    pub fn clear_forces_and_energies(&mut self) {
        for &b in &self.used_blocks {
            let start = b * REDUCTION_BLOCK_SIZE;
            self.force[start..start + REDUCTION_BLOCK_SIZE].fill(RVec::zeros());
        }
        self.shift_forces.fill(RVec::zeros());
        self.clear_energies();
    }

    /// Zeroes energies and dV/dλ, keeping the accumulated forces.
    pub fn clear_energies(&mut self) {
        self.energies.clear();
        self.dvdl = [0.0; FepCoupling::COUNT];
    }

    pub fn force(&self) -> &[RVec] {
        &self.force
    }

    pub fn reduction_mask(&self) -> &[bool] {
        &self.reduction_mask
    }

    pub fn used_blocks(&self) -> &[usize] {
        &self.used_blocks
    }

    pub fn shift_forces(&self) -> &[RVec] {
        &self.shift_forces
    }

    pub fn energies(&self) -> &GroupPairEnergies {
        &self.energies
    }

    pub fn dvdl(&self) -> &[Real; FepCoupling::COUNT] {
        &self.dvdl
    }

    pub fn outputs_mut(&mut self) -> ThreadOutputs<'_> {
        ThreadOutputs {
            force: &mut self.force,
            shift_forces: &mut self.shift_forces,
            energies: &mut self.energies,
            dvdl: &mut self.dvdl,
        }
    }
}

/// The set of per-thread buffers plus the reduction table.
#[derive(Debug, Clone)]
pub struct ThreadedForceBuffer {
    buffers: Vec<ThreadForceBuffer>,
    use_energy_terms: bool,
    num_atoms_force: usize,
    block_thread_masks: Vec<u64>,
    used_blocks: Vec<usize>,
}

impl ThreadedForceBuffer {
    pub fn new(
        num_threads: usize,
        use_energy_terms: bool,
        num_energy_groups: usize,
    ) -> Result<Self, EngineError> {
        if num_threads == 0 || num_threads > MAX_THREADS {
            return Err(EngineError::precondition(format!(
                "thread count must be between 1 and {MAX_THREADS}, got {num_threads}"
            )));
        }
        Ok(Self {
            buffers: (0..num_threads)
                .map(|t| ThreadForceBuffer::new(t, use_energy_terms, num_energy_groups))
                .collect(),
            use_energy_terms,
            num_atoms_force: 0,
            block_thread_masks: Vec::new(),
            used_blocks: Vec::new(),
        })
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn num_atoms_force(&self) -> usize {
        self.num_atoms_force
    }

    pub fn thread_buffer(&self, thread: usize) -> &ThreadForceBuffer {
        &self.buffers[thread]
    }

    pub fn thread_buffers_mut(&mut self) -> &mut [ThreadForceBuffer] {
        &mut self.buffers
    }

    /// Blocks touched by at least one thread.
    pub fn used_blocks(&self) -> &[usize] {
        &self.used_blocks
    }

    /// Threads that touch `block`, one bit per thread.
    pub fn block_thread_mask(&self, block: usize) -> u64 {
        self.block_thread_masks.get(block).copied().unwrap_or(0)
    }

    /// Marks, for every thread `t`, the atoms yielded by `touched(t)` and
    /// rebuilds the reduction table.
    #[instrument(skip_all, name = "threaded_force_buffer_setup")]
    pub fn setup<F, I>(&mut self, num_atoms_force: usize, touched: F) -> Result<(), EngineError>
    where
        F: Fn(usize) -> I + Sync,
        I: Iterator<Item = usize>,
    {
        #[cfg(not(feature = "parallel"))]
        let mut iterator = self.buffers.iter_mut();
        #[cfg(feature = "parallel")]
        let iterator = self.buffers.par_iter_mut();

        iterator.try_for_each(|buffer| -> Result<(), EngineError> {
            buffer.resize_buffer_and_clear_mask(num_atoms_force)?;
            for atom in touched(buffer.thread_index) {
                buffer.add_atom_to_mask(atom);
            }
            buffer.process_mask();
            Ok(())
        })?;

        self.setup_reduction(num_atoms_force)
    }

    /// Builds the per-block thread bitmasks from the processed thread masks.
    pub fn setup_reduction(&mut self, num_atoms_force: usize) -> Result<(), EngineError> {
        let num_blocks = num_atoms_force.div_ceil(REDUCTION_BLOCK_SIZE);
        let mut masks = try_filled("block thread masks", num_blocks, 0u64)?;
        for buffer in &self.buffers {
            for &b in buffer.used_blocks() {
                masks[b] |= 1u64 << buffer.thread_index;
            }
        }
        self.used_blocks = masks
            .iter()
            .enumerate()
            .filter_map(|(b, &m)| (m != 0).then_some(b))
            .collect();
        self.block_thread_masks = masks;
        self.num_atoms_force = num_atoms_force;

        debug!(
            num_atoms_force,
            num_blocks,
            used_blocks = self.used_blocks.len(),
            threads = self.num_threads(),
            "Reduction table rebuilt"
        );
        Ok(())
    }

    pub fn clear_forces_and_energies(&mut self) {
        #[cfg(not(feature = "parallel"))]
        let iterator = self.buffers.iter_mut();
        #[cfg(feature = "parallel")]
        let iterator = self.buffers.par_iter_mut();

        iterator.for_each(ThreadForceBuffer::clear_forces_and_energies);
    }

    /// Sums the thread buffers into the outputs requested by `step_work`,
    /// starting at thread `reduction_begin_index`.
    pub fn reduce(
        &self,
        force_with_shift_forces: Option<&mut ForceWithShiftForces>,
        group_pair_energies: Option<&mut GroupPairEnergies>,
        dvdl: &mut [Real],
        step_work: &StepWorkload,
        reduction_begin_index: usize,
    ) {
        if let Some(out) = force_with_shift_forces {
            if step_work.compute_forces && self.num_atoms_force > 0 {
                self.reduce_forces(out.force_mut(), reduction_begin_index);
            }
            if step_work.compute_virial && out.compute_virial() {
                self.reduce_shift_forces(out.shift_forces_mut(), reduction_begin_index);
            }
        }
        if step_work.compute_energy && self.use_energy_terms {
            if let Some(grpp) = group_pair_energies {
                self.reduce_energies(grpp, reduction_begin_index);
            }
        }
        if step_work.compute_dhdl {
            self.reduce_dvdl(dvdl, reduction_begin_index);
        }
    }

    /// Adds the used blocks of every thread from `first_thread` on into
    /// `out`, which may be shorter than the buffers.
    pub fn reduce_forces(&self, out: &mut [RVec], first_thread: usize) {
        let first_mask = if first_thread >= MAX_THREADS {
            0
        } else {
            !0u64 << first_thread
        };

        #[cfg(not(feature = "parallel"))]
        let iterator = out.chunks_mut(REDUCTION_BLOCK_SIZE).enumerate();
        #[cfg(feature = "parallel")]
        let iterator = out.par_chunks_mut(REDUCTION_BLOCK_SIZE).enumerate();

        iterator.for_each(|(b, chunk)| {
            let mut threads = self.block_thread_mask(b) & first_mask;
            let start = b * REDUCTION_BLOCK_SIZE;
            while threads != 0 {
                let t = threads.trailing_zeros() as usize;
                threads &= threads - 1;
                let source = &self.buffers[t].force[start..start + chunk.len()];
                for (f, s) in chunk.iter_mut().zip(source) {
                    *f += s;
                }
            }
        });
    }

    pub fn reduce_shift_forces(&self, out: &mut [RVec], first_thread: usize) {
        for buffer in self.buffers.iter().skip(first_thread) {
            for (f, s) in out.iter_mut().zip(&buffer.shift_forces) {
                *f += s;
            }
        }
    }

    pub fn reduce_energies(&self, out: &mut GroupPairEnergies, first_thread: usize) {
        for buffer in self.buffers.iter().skip(first_thread) {
            out.add_assign_from(&buffer.energies);
        }
    }

    pub fn reduce_dvdl(&self, out: &mut [Real], first_thread: usize) {
        for buffer in self.buffers.iter().skip(first_thread) {
            for (d, s) in out.iter_mut().zip(&buffer.dvdl) {
                *d += s;
            }
        }
    }
}
