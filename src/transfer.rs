//! Carrying the particle population through mesh adaptation.
//!
//! The host mesh offers a generic transfer mechanism: it accepts a fixed
//! per-cell buffer size before adapting, invokes a store callback on every
//! source cell, transports the buffers through coarsening, refinement and
//! repartitioning, and invokes a load callback on every destination cell.
//! The world exposes that protocol as four plain methods the host wires up:
//!
//! 1. [`World::register_store_callback`] before adaptation; if it returns a
//!    size, the host registers it with its mesh.
//! 2. [`World::pack_cell`] as the store callback on every source cell.
//! 3. [`World::register_load_callback`] once the mesh has adapted; if it
//!    returns `true` the host replays the transported buffers.
//! 4. [`World::unpack_cell`] as the load callback on every destination
//!    cell. For a refined cell the parent's buffer is delivered to each
//!    child and the particles are dispersed by containment.
//!
//! Per-cell buffer layout: a `u32` particle count followed by that many
//! particle records, trailing bytes unused.

use std::mem;

use mpi::traits::Communicator;

use crate::particle::Particle;
use crate::traits::Triangulation;
use crate::types::{CellKey, CellStatus};
use crate::world::World;

/// Bookkeeping for one registered transfer, alive from the pre-adapt hook
/// until the load hook invalidates it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RegisteredTransfer {
    pub(crate) bytes_per_cell: usize,
}

impl<const D: usize> World<D> {
    /// Pre-adapt hook. Computes the global maximum particle count per cell
    /// and, if any particles exist, returns the per-cell buffer size the
    /// host must register with its mesh transfer mechanism.
    ///
    /// The reduction is collective and must be reached by every rank, which
    /// is why it runs unconditionally before the registration decision.
    pub fn register_store_callback<C: Communicator>(&mut self, comm: &C) -> Option<usize> {
        let max_per_cell = self.global_max_particles_per_cell(comm);
        self.register_transfer(max_per_cell)
    }

    /// The communicator-free part of the pre-adapt hook; `max_per_cell`
    /// must be the global maximum.
    pub(crate) fn register_transfer(&mut self, max_per_cell: u64) -> Option<usize> {
        if max_per_cell == 0 {
            self.transfer = None;
            return None;
        }
        // A coarsened parent may absorb one cell's worth per child, hence
        // the 2^dim headroom.
        let bytes_per_cell = mem::size_of::<u32>()
            + self.property_manager().particle_size() * max_per_cell as usize * (1 << D);
        self.transfer = Some(RegisteredTransfer { bytes_per_cell });
        Some(bytes_per_cell)
    }

    /// Store callback, invoked on every source cell before adaptation.
    ///
    /// Writes the cell's particles into `out` and erases them from the
    /// store. For a coarsening cell the callback runs on the parent and
    /// gathers all children, decimating by a stride of `2^dim` when the
    /// merged count would exceed the density cap.
    pub fn pack_cell<M: Triangulation<D>>(
        &mut self,
        mesh: &M,
        cell: CellKey,
        status: CellStatus,
        out: &mut [u8],
    ) {
        let transfer = self
            .transfer
            .expect("pack_cell requires a registered transfer");
        assert!(
            out.len() >= transfer.bytes_per_cell,
            "transfer buffer is smaller than the registered per-cell size"
        );

        let batch = match status {
            CellStatus::Persist | CellStatus::Refine => self.particles_mut().remove_cell(&cell),
            CellStatus::Coarsen => {
                let mut gathered = Vec::new();
                for child in mesh.children(cell) {
                    gathered.append(&mut self.particles_mut().remove_cell(&child));
                }
                let cap = self.cap_policy();
                if cap.on_coarsen && cap.max_per_cell > 0 && gathered.len() > cap.max_per_cell {
                    gathered = gathered.into_iter().step_by(1 << D).collect();
                }
                gathered
            }
        };

        let (head, rest) = out.split_at_mut(mem::size_of::<u32>());
        head.copy_from_slice(&(batch.len() as u32).to_le_bytes());
        let mut cursor = rest;
        for particle in &batch {
            debug_assert_eq!(
                particle.properties.len(),
                self.property_manager().data_len(),
                "particle payload does not match the property manager's layout"
            );
            cursor = particle.write_data(cursor);
        }
    }

    /// Load hook, invoked once after the mesh has adapted and before any
    /// buffer is replayed. Verifies that the store was fully handed over to
    /// the mesh layer, invalidates the registration, and reports whether
    /// there are buffers to unpack.
    pub fn register_load_callback(&mut self) -> bool {
        assert!(
            self.particles().is_empty(),
            "the mesh is adapting but particles remain in the store; all of \
             them should have been packed into the transfer buffers"
        );
        self.transfer.take().is_some()
    }

    /// Load callback, invoked on every destination cell after adaptation.
    ///
    /// For `Persist` and `Coarsen` the particles go straight into `cell`.
    /// For `Refine`, `cell` is one child of the refined cell and `data` is
    /// the parent's buffer; only the particles this child contains are
    /// inserted, which disperses the parent's population over the children
    /// without duplication.
    pub fn unpack_cell<M: Triangulation<D>>(
        &mut self,
        mesh: &M,
        cell: CellKey,
        status: CellStatus,
        data: &[u8],
    ) {
        let (head, rest) = data.split_at(mem::size_of::<u32>());
        let count = u32::from_le_bytes(head.try_into().unwrap()) as usize;
        let property_bytes = self.property_manager().data_len();

        let mut cursor = rest;
        for _ in 0..count {
            let (particle, tail) = Particle::from_bytes(cursor, property_bytes);
            cursor = tail;
            match status {
                CellStatus::Persist | CellStatus::Coarsen => {
                    self.particles_mut().insert(cell, particle)
                }
                CellStatus::Refine => {
                    if mesh.cell_contains(cell, &particle.location) {
                        self.particles_mut().insert(cell, particle);
                    }
                }
            }
        }
    }
}
