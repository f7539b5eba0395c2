//? mpirun -n 1
//! Single-rank smoke test of the timestep driver: a population advected by
//! the two-stage integrator through a uniform flow, then carried through a
//! refine/coarsen cycle.

use mpi::traits::*;
use rand::prelude::*;
use rand::SeedableRng;

use plume::integrators::Rk2;
use plume::particle::Particle;
use plume::shapes::{adapt_with_particles, StructuredMesh};
use plume::traits::{PropertyManager, PropertyUpdate, SolutionField, Triangulation};
use plume::types::{CapPolicy, CellKey, PointType};
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

fn main() {
    env_logger::init();
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();

    let mesh = StructuredMesh::<2>::subdivided_unit_cube(4);
    let mut world = World::new(Box::new(Rk2::new()), Box::new(Inert), CapPolicy::default());

    let mut rng = StdRng::seed_from_u64(42);
    let between = rand::distributions::Uniform::from(0.05..0.45);
    let n_particles = 256u64;
    let mut expected = Vec::new();
    for id in 0..n_particles {
        let location = [between.sample(&mut rng), between.sample(&mut rng)];
        let cell = mesh.find_cell_around_point(&location).unwrap();
        world.add_particle(&mesh, cell, Particle::new(id, location));
        expected.push((id, location));
    }

    let field = UniformFlow {
        velocity: [0.3, 0.5],
    };
    let dt = 1.0;
    world.advance_timestep(&comm, &mesh, &field, dt);

    // A uniform flow moves every particle by exactly velocity * dt, and the
    // population stays attached to the right cells.
    assert_eq!(world.global_particle_count(&comm), n_particles as u64);
    let mut moved: Vec<(u64, [PointType; 2])> = world
        .particles()
        .iter()
        .flat_map(|(_, batch)| batch.iter().map(|p| (p.id, p.location)))
        .collect();
    moved.sort_by_key(|(id, _)| *id);
    for ((id, location), (expected_id, start)) in moved.iter().zip(&expected) {
        assert_eq!(id, expected_id);
        assert!((location[0] - (start[0] + 0.3)).abs() < 1e-12);
        assert!((location[1] - (start[1] + 0.5)).abs() < 1e-12);
    }
    for (cell, batch) in world.particles().iter() {
        for particle in batch {
            assert!(mesh.cell_contains(cell, &particle.location));
        }
    }
    println!("\t ... advection passed");

    // Refine every occupied cell and coarsen one family back; the
    // population must survive both transitions.
    let mut mesh = mesh;
    let occupied: Vec<CellKey> = world.particles().cells().collect();
    adapt_with_particles(&mut world, &mut mesh, &occupied, &[]);
    assert_eq!(world.particles().len(), n_particles as usize);
    for (cell, batch) in world.particles().iter() {
        for particle in batch {
            assert!(mesh.cell_contains(cell, &particle.location));
        }
    }

    adapt_with_particles(&mut world, &mut mesh, &[], &[occupied[0]]);
    assert_eq!(world.particles().len(), n_particles as usize);
    println!("\t ... adaptation passed");
}
