//? mpirun -n 2
//! Two-rank migration: a particle crossing the subdomain boundary changes
//! owner without changing identity, and repeated rebinning conserves the
//! global population.

use mpi::traits::*;
use rand::prelude::*;
use rand::SeedableRng;

use plume::integrators::Euler;
use plume::particle::Particle;
use plume::shapes::StructuredMesh;
use plume::traits::{PropertyManager, PropertyUpdate, SolutionField, Triangulation};
use plume::types::{CapPolicy, CellKey, PointType, SubdomainId};
use plume::world::World;

struct Inert;

impl<const D: usize> PropertyManager<D> for Inert {
    fn data_len(&self) -> usize {
        0
    }
    fn initialize_particle(&self, _: &mut Particle<D>, _: &[PointType], _: &[PointType]) {}
    fn update_particle(&self, _: &mut Particle<D>, _: &[PointType], _: &[PointType]) {}
    fn need_update(&self) -> PropertyUpdate {
        PropertyUpdate::Never
    }
}

struct UniformFlow<const D: usize> {
    velocity: [PointType; D],
}

impl<const D: usize> SolutionField<D> for UniformFlow<D> {
    fn n_components(&self) -> usize {
        D
    }

    fn velocities_at(
        &self,
        _cell: CellKey,
        unit_points: &[[PointType; D]],
        current: &mut [[PointType; D]],
        previous: &mut [[PointType; D]],
    ) {
        for i in 0..unit_points.len() {
            current[i] = self.velocity;
            previous[i] = self.velocity;
        }
    }

    fn solution_at(
        &self,
        _cell: CellKey,
        _unit_points: &[[PointType; D]],
        values: &mut [PointType],
        gradients: &mut [PointType],
    ) {
        values.fill(0.0);
        gradients.fill(0.0);
    }
}

/// Unit square split into four cells; the left half belongs to rank 0, the
/// right half to rank 1.
fn partitioned_mesh(local_rank: SubdomainId) -> StructuredMesh<2> {
    let mut mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
    mesh.set_owner(CellKey::new(0, 1), 1);
    mesh.set_owner(CellKey::new(0, 3), 1);
    mesh.set_local_rank(local_rank);
    mesh
}

fn main() {
    env_logger::init();
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    if comm.size() != 2 {
        if comm.rank() == 0 {
            println!("this program needs exactly 2 ranks, e.g. mpirun -n 2");
        }
        return;
    }
    let rank = comm.rank();
    let mesh = partitioned_mesh(rank);
    let mut world = World::new(Box::new(Euler), Box::new(Inert), CapPolicy::default());

    // A single particle drifts across the subdomain boundary.
    if rank == 0 {
        world.add_particle(&mesh, CellKey::new(0, 0), Particle::new(7, [0.49, 0.25]));
    }
    let field = UniformFlow {
        velocity: [0.1, 0.0],
    };
    world.advance_timestep(&comm, &mesh, &field, 0.2);

    assert_eq!(world.global_particle_count(&comm), 1);
    if rank == 0 {
        assert!(world.particles().is_empty());
    } else {
        let cell = CellKey::new(0, 1);
        assert_eq!(world.particles().count_in(&cell), 1);
        let particle = &world.particles().particles_in(&cell)[0];
        assert_eq!(particle.id, 7);
        assert!((particle.location[0] - 0.51).abs() < 1e-12);
    }
    if rank == 0 {
        println!("\t ... boundary crossing passed");
    }
    world.particles_mut().drain();

    // A swarm advected in lockstep on both ranks: nothing leaves the
    // domain, so the population count is invariant under any number of
    // rebinning rounds.
    let mut rng = StdRng::seed_from_u64(100 + rank as u64);
    let x_range = if rank == 0 { 0.05..0.45 } else { 0.55..0.80 };
    let between_x = rand::distributions::Uniform::from(x_range);
    let between_y = rand::distributions::Uniform::from(0.05..0.95);
    let n_local = 64u64;
    for i in 0..n_local {
        let location = [between_x.sample(&mut rng), between_y.sample(&mut rng)];
        let cell = mesh.find_cell_around_point(&location).unwrap();
        world.add_particle(&mesh, cell, Particle::new(rank as u64 * n_local + i, location));
    }
    assert_eq!(world.global_particle_count(&comm), 2 * n_local);

    let field = UniformFlow {
        velocity: [0.3, 0.0],
    };
    world.advance_timestep(&comm, &mesh, &field, 0.5);
    for _ in 0..3 {
        world.find_all_cells(&comm, &mesh);
        assert_eq!(world.global_particle_count(&comm), 2 * n_local);
    }

    // Every surviving particle sits in a cell its rank owns and that
    // contains it.
    for (cell, batch) in world.particles().iter() {
        assert_eq!(mesh.ownership(cell), plume::types::Ownership::Owned);
        for particle in batch {
            assert!(mesh.cell_contains(cell, &particle.location));
        }
    }
    if rank == 0 {
        println!("\t ... conservation passed");
    }
}
