//! The particle world: population bookkeeping, rebinning, migration and
//! the timestep driver.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, trace, warn};
use mpi::collective::SystemOperation;
use mpi::traits::*;
use mpi::Count;

use crate::exchange::exchange_buffers;
use crate::particle::Particle;
use crate::store::ParticleStore;
use crate::traits::{Integrator, PropertyManager, PropertyUpdate, SolutionField, Triangulation};
use crate::types::{CapPolicy, CellKey, Ownership, PointType, SubdomainId};

/// Subdomains that share a ghost boundary with the local one, deduplicated
/// and sorted. The sorted order is the canonical channel order of the
/// migration exchange and is identical on every rank.
pub fn find_neighbors<const D: usize, M: Triangulation<D>>(mesh: &M) -> Vec<SubdomainId> {
    mesh.active_cells()
        .filter_map(|cell| match mesh.ownership(cell) {
            Ownership::Ghost(owner) => Some(owner),
            Ownership::Owned => None,
        })
        .sorted_unstable()
        .dedup()
        .collect()
}

/// The distributed particle population attached to one host solver.
///
/// The world owns the particle store and mutates it only through its own
/// methods. The host's triangulation and solution fields are borrowed per
/// call and consumed read-only.
pub struct World<const D: usize> {
    particles: ParticleStore<D>,
    integrator: Box<dyn Integrator<D>>,
    property_manager: Box<dyn PropertyManager<D>>,
    cap: CapPolicy,
    pub(crate) transfer: Option<crate::transfer::RegisteredTransfer>,
}

impl<const D: usize> World<D> {
    /// Create a world with the given integrator, property manager and
    /// density cap policy.
    pub fn new(
        integrator: Box<dyn Integrator<D>>,
        property_manager: Box<dyn PropertyManager<D>>,
        cap: CapPolicy,
    ) -> Self {
        Self {
            particles: ParticleStore::new(),
            integrator,
            property_manager,
            cap,
            transfer: None,
        }
    }

    /// Read access to the particle store.
    pub fn particles(&self) -> &ParticleStore<D> {
        &self.particles
    }

    /// Mutable access to the particle store.
    pub fn particles_mut(&mut self) -> &mut ParticleStore<D> {
        &mut self.particles
    }

    /// The property manager this world was configured with.
    pub fn property_manager(&self) -> &dyn PropertyManager<D> {
        self.property_manager.as_ref()
    }

    /// The density cap policy this world was configured with.
    pub fn cap_policy(&self) -> CapPolicy {
        self.cap
    }

    /// Insert an externally generated particle into `cell`.
    ///
    /// `cell` must be owned by the local subdomain. Returns `false` when the
    /// cap policy enforces the density limit on insertion and the cell is
    /// already full.
    pub fn add_particle<M: Triangulation<D>>(
        &mut self,
        mesh: &M,
        cell: CellKey,
        particle: Particle<D>,
    ) -> bool {
        assert!(
            mesh.ownership(cell) == Ownership::Owned,
            "particles may only be added to cells in the local subdomain"
        );
        if self.cap.on_insert
            && self.cap.max_per_cell > 0
            && self.particles.count_in(&cell) >= self.cap.max_per_cell
        {
            warn!(
                "cell ({}, {}) already holds {} particles, refusing particle {}",
                cell.level, cell.index, self.cap.max_per_cell, particle.id
            );
            return false;
        }
        self.particles.insert(cell, particle);
        true
    }

    /// Total number of particles across all ranks.
    pub fn global_particle_count<C: Communicator>(&self, comm: &C) -> u64 {
        let local = self.particles.len() as u64;
        let mut global = 0u64;
        comm.all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    /// Largest per-cell particle count on this rank.
    pub fn local_max_particles_per_cell(&self) -> u64 {
        self.particles
            .iter()
            .map(|(_, batch)| batch.len() as u64)
            .max()
            .unwrap_or(0)
    }

    /// Largest per-cell particle count across all ranks.
    pub fn global_max_particles_per_cell<C: Communicator>(&self, comm: &C) -> u64 {
        let local = self.local_max_particles_per_cell();
        let mut global = 0u64;
        comm.all_reduce_into(&local, &mut global, SystemOperation::max());
        global
    }

    /// Re-associate every particle with the cell that now contains it and
    /// migrate the ones that crossed into another subdomain.
    ///
    /// Particles for which no containing cell exists anywhere have left the
    /// global domain and are dropped.
    pub fn find_all_cells<C: Communicator, M: Triangulation<D>>(&mut self, comm: &C, mesh: &M) {
        let outbound = self.sort_particles_into_subdomains_and_cells(mesh);
        self.move_particles_back_in_mesh();
        if comm.size() > 1 {
            self.send_recv_particles(comm, mesh, outbound);
        }
    }

    /// The process-local half of [`find_all_cells`](Self::find_all_cells).
    ///
    /// Runs the two-pass rebinning: the store is drained and every particle
    /// classified, then the ones staying on this rank are reinserted in
    /// bulk. The returned map holds the particles whose new cell belongs to
    /// another subdomain, keyed by the owning subdomain, ready for the
    /// exchange.
    pub fn sort_particles_into_subdomains_and_cells<M: Triangulation<D>>(
        &mut self,
        mesh: &M,
    ) -> BTreeMap<SubdomainId, Vec<Particle<D>>> {
        let mut moved: Vec<(CellKey, Particle<D>)> = Vec::new();
        let mut outbound: BTreeMap<SubdomainId, Vec<Particle<D>>> = BTreeMap::new();
        let mut lost = 0usize;

        for (cell, batch) in self.particles.drain() {
            for particle in batch {
                if mesh.cell_contains(cell, &particle.location) {
                    moved.push((cell, particle));
                    continue;
                }
                match mesh.find_cell_around_point(&particle.location) {
                    None => {
                        // Left the domain through an open boundary or an
                        // integration error.
                        trace!("particle {} left the domain", particle.id);
                        lost += 1;
                    }
                    Some(found) => match mesh.ownership(found) {
                        Ownership::Owned => moved.push((found, particle)),
                        Ownership::Ghost(owner) => {
                            outbound.entry(owner).or_default().push(particle)
                        }
                    },
                }
            }
        }

        for (cell, particle) in moved {
            self.particles.insert(cell, particle);
        }
        if lost > 0 {
            debug!("dropped {} particle(s) that left the domain", lost);
        }
        outbound
    }

    // Reserved extension point, invoked between local reinsertion and the
    // migration exchange.
    // TODO: snap particles that left through an open boundary back to the
    // nearest mesh point once the mesh interface can report one.
    fn move_particles_back_in_mesh(&mut self) {}

    /// Two-phase exchange of outbound particles with all ghost neighbors,
    /// followed by reinsertion of the arrivals.
    fn send_recv_particles<C: Communicator, M: Triangulation<D>>(
        &mut self,
        comm: &C,
        mesh: &M,
        outbound: BTreeMap<SubdomainId, Vec<Particle<D>>>,
    ) {
        let neighbors = find_neighbors(mesh);
        debug_assert!(
            outbound.keys().all(|owner| neighbors.contains(owner)),
            "every migration destination must be a ghost neighbor"
        );

        let particle_size = self.property_manager.particle_size() + self.integrator.data_len();

        // Pack outbound particles in neighbor order, each record followed by
        // the integrator's scratch state for that particle.
        let n_outbound: usize = neighbors
            .iter()
            .map(|n| outbound.get(n).map_or(0, Vec::len))
            .sum();
        let mut send_counts = Vec::with_capacity(neighbors.len());
        let mut send_data = vec![0u8; n_outbound * particle_size];
        let mut cursor = send_data.as_mut_slice();
        for neighbor in &neighbors {
            let batch = outbound.get(neighbor).map_or(&[][..], Vec::as_slice);
            send_counts.push((batch.len() * particle_size) as Count);
            for particle in batch {
                debug_assert_eq!(
                    particle.properties.len(),
                    self.property_manager.data_len(),
                    "particle payload does not match the property manager's layout"
                );
                cursor = particle.write_data(cursor);
                cursor = self.integrator.write_data(cursor, particle.id);
            }
        }
        assert!(
            cursor.is_empty(),
            "the amount of data written for the migration exchange is \
             inconsistent with the number and size of outbound particles"
        );

        let (recv_data, _recv_counts) =
            exchange_buffers(comm, &neighbors, &send_data, &send_counts);

        // Reinsert arrivals. The sender's view of ownership may be one step
        // stale, so the containing cell is looked up again here and arrivals
        // we do not own are discarded.
        assert!(
            recv_data.len() % particle_size == 0,
            "received migration data is not a whole number of particles"
        );
        let n_arrivals = recv_data.len() / particle_size;
        let coarsen_factor = 1usize << D;
        let property_bytes = self.property_manager.data_len();
        let mut cursor = recv_data.as_slice();
        let mut inserted = 0usize;
        for arrival in 0..n_arrivals {
            let (particle, rest) = Particle::from_bytes(cursor, property_bytes);
            cursor = self.integrator.read_data(rest, particle.id);

            let Some(cell) = mesh.find_cell_around_point(&particle.location) else {
                trace!("arriving particle {} left the domain", particle.id);
                continue;
            };
            if mesh.ownership(cell) != Ownership::Owned {
                continue;
            }
            // Arrivals into a full cell likely come from a denser region, so
            // they are decimated first. The cap is soft: the stride filter
            // still lets every 2^dim-th arrival through.
            let decimate = self.cap.on_arrival
                && self.cap.max_per_cell > 0
                && self.particles.count_in(&cell) >= self.cap.max_per_cell;
            if !decimate || arrival % coarsen_factor == 0 {
                self.particles.insert(cell, particle);
                inserted += 1;
            }
        }
        assert!(
            cursor.is_empty(),
            "the amount of data read from the migration exchange does not \
             match the amount sent"
        );
        debug!(
            "migrated {} particle(s) out, {} in ({} kept)",
            n_outbound, n_arrivals, inserted
        );
    }

    /// Advance the whole population by one timestep.
    ///
    /// Keeps calling the integrator until it reports the timestep complete,
    /// rebinning and migrating after every stage, then refreshes particle
    /// properties if the manager asked for per-step updates.
    pub fn advance_timestep<C, M, F>(&mut self, comm: &C, mesh: &M, field: &F, dt: PointType)
    where
        C: Communicator,
        M: Triangulation<D>,
        F: SolutionField<D>,
    {
        loop {
            self.advect_particles(mesh, field, dt);
            self.find_all_cells(comm, mesh);
            self.integrator.advance_stage();
            if !self.integrator.continue_integration() {
                break;
            }
        }

        if self.property_manager.need_update() == PropertyUpdate::EveryStep {
            self.update_particles(mesh, field);
        }
    }

    /// Move every particle by one integrator stage, cell by cell.
    pub fn advect_particles<M, F>(&mut self, mesh: &M, field: &F, dt: PointType)
    where
        M: Triangulation<D>,
        F: SolutionField<D>,
    {
        let cells: Vec<CellKey> = self.particles.cells().collect();
        for cell in cells {
            let unit_points = unit_points_of(&self.particles, mesh, cell);
            let mut velocities = vec![[0.0; D]; unit_points.len()];
            let mut old_velocities = vec![[0.0; D]; unit_points.len()];
            field.velocities_at(cell, &unit_points, &mut velocities, &mut old_velocities);

            self.integrator.local_step(
                self.particles.particles_in_mut(&cell),
                &old_velocities,
                &velocities,
                dt,
            );
        }
    }

    /// Initialize the properties of every particle from the solution.
    pub fn initialize_particles<M, F>(&mut self, mesh: &M, field: &F)
    where
        M: Triangulation<D>,
        F: SolutionField<D>,
    {
        self.property_pass(mesh, field, false);
    }

    /// Refresh the properties of every particle from the solution.
    pub fn update_particles<M, F>(&mut self, mesh: &M, field: &F)
    where
        M: Triangulation<D>,
        F: SolutionField<D>,
    {
        self.property_pass(mesh, field, true);
    }

    fn property_pass<M, F>(&mut self, mesh: &M, field: &F, update: bool)
    where
        M: Triangulation<D>,
        F: SolutionField<D>,
    {
        let n_components = field.n_components();
        let cells: Vec<CellKey> = self.particles.cells().collect();
        for cell in cells {
            let unit_points = unit_points_of(&self.particles, mesh, cell);
            let n = unit_points.len();
            let mut values = vec![0.0; n * n_components];
            let mut gradients = vec![0.0; n * n_components * D];
            field.solution_at(cell, &unit_points, &mut values, &mut gradients);

            for (i, particle) in self.particles.particles_in_mut(&cell).iter_mut().enumerate() {
                let value = &values[i * n_components..(i + 1) * n_components];
                let gradient = &gradients[i * n_components * D..(i + 1) * n_components * D];
                if update {
                    self.property_manager.update_particle(particle, value, gradient);
                } else {
                    self.property_manager
                        .initialize_particle(particle, value, gradient);
                }
            }
        }
    }
}

/// Unit-cell coordinates of all particles in `cell`, in store order.
fn unit_points_of<const D: usize, M: Triangulation<D>>(
    particles: &ParticleStore<D>,
    mesh: &M,
    cell: CellKey,
) -> Vec<[PointType; D]> {
    particles
        .particles_in(&cell)
        .iter()
        .map(|particle| {
            mesh.transform_real_to_unit_cell(cell, &particle.location)
                .expect("stored particles map into their associated cell")
        })
        .collect()
}
