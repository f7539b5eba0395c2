//! Single-rank behavior of the particle world: rebinning, refinement
//! transfer, density capping and property updates. Multi-rank behavior is
//! exercised by the programs under `demos/`, run with `mpirun`.

use rand::prelude::*;
use rand::SeedableRng;

use plume::integrators::Euler;
use plume::particle::Particle;
use plume::shapes::{adapt_with_particles, StructuredMesh};
use plume::traits::{PropertyManager, PropertyUpdate, SolutionField, Triangulation};
use plume::types::{CapPolicy, CellKey, PointType};
use plume::world::{find_neighbors, World};

/// Property manager storing one solution component as the payload.
struct Tracers;

impl<const D: usize> PropertyManager<D> for Tracers {
    fn data_len(&self) -> usize {
        std::mem::size_of::<PointType>()
    }

    fn initialize_particle(
        &self,
        particle: &mut Particle<D>,
        values: &[PointType],
        _gradients: &[PointType],
    ) {
        particle.properties = values[0].to_le_bytes().to_vec();
    }

    fn update_particle(
        &self,
        particle: &mut Particle<D>,
        values: &[PointType],
        _gradients: &[PointType],
    ) {
        particle.properties = values[0].to_le_bytes().to_vec();
    }

    fn need_update(&self) -> PropertyUpdate {
        PropertyUpdate::EveryStep
    }
}

/// One-component field whose value is constant in space.
struct UniformField {
    value: PointType,
}

impl<const D: usize> SolutionField<D> for UniformField {
    fn n_components(&self) -> usize {
        1
    }

    fn velocities_at(
        &self,
        _cell: CellKey,
        unit_points: &[[PointType; D]],
        current: &mut [[PointType; D]],
        previous: &mut [[PointType; D]],
    ) {
        for i in 0..unit_points.len() {
            current[i] = [0.0; D];
            previous[i] = [0.0; D];
        }
    }

    fn solution_at(
        &self,
        _cell: CellKey,
        unit_points: &[[PointType; D]],
        values: &mut [PointType],
        gradients: &mut [PointType],
    ) {
        for i in 0..unit_points.len() {
            values[i] = self.value;
        }
        gradients.fill(0.0);
    }
}

fn world_with_cap(cap: CapPolicy) -> World<2> {
    World::new(Box::new(Euler), Box::new(Tracers), cap)
}

fn root() -> CellKey {
    CellKey::new(0, 0)
}

/// A particle whose payload matches the [`Tracers`] layout.
fn tracer(id: u64, location: [PointType; 2]) -> Particle<2> {
    Particle::with_properties(id, location, (id as PointType).to_le_bytes().to_vec())
}

#[test]
fn a_resting_particle_stays_in_its_cell() {
    let mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    world.add_particle(&mesh, root(), Particle::new(1, [0.25, 0.75]));

    let outbound = world.sort_particles_into_subdomains_and_cells(&mesh);
    assert!(outbound.is_empty());
    assert_eq!(world.particles().len(), 1);
    assert_eq!(world.particles().count_in(&root()), 1);
    assert_eq!(world.particles().particles_in(&root())[0].location, [0.25, 0.75]);
}

#[test]
fn persisting_a_cell_round_trips_its_population() {
    let mut mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    let mut rng = StdRng::seed_from_u64(0);
    let between = rand::distributions::Uniform::from(0.0..1.0);
    for id in 0..17 {
        let location = [between.sample(&mut rng), between.sample(&mut rng)];
        world.add_particle(&mesh, root(), tracer(id, location));
    }
    let mut before: Vec<Particle<2>> = world.particles().particles_in(&root()).to_vec();

    adapt_with_particles(&mut world, &mut mesh, &[], &[]);

    let mut after: Vec<Particle<2>> = world.particles().particles_in(&root()).to_vec();
    before.sort_by_key(|p| p.id);
    after.sort_by_key(|p| p.id);
    assert_eq!(after, before);
}

#[test]
fn refinement_disperses_particles_to_the_containing_child() {
    let mut mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    for (id, location) in [[0.25, 0.25], [0.75, 0.25], [0.25, 0.75], [0.75, 0.75]]
        .into_iter()
        .enumerate()
    {
        world.add_particle(&mesh, root(), tracer(id as u64, location));
    }

    adapt_with_particles(&mut world, &mut mesh, &[root()], &[]);

    assert_eq!(world.particles().len(), 4);
    for child in mesh.children(root()) {
        assert_eq!(world.particles().count_in(&child), 1);
        let particle = &world.particles().particles_in(&child)[0];
        assert!(mesh.cell_contains(child, &particle.location));
    }
}

#[test]
fn coarsening_a_full_family_decimates_to_the_cap() {
    let mut mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::with_max(4));
    let children = mesh.refine_cell(root());
    for (c, child) in children.iter().enumerate() {
        let center = mesh.center(child);
        for i in 0..4u64 {
            let location = [center[0] - 0.05 + 0.02 * i as PointType, center[1]];
            world.add_particle(&mesh, *child, tracer(4 * c as u64 + i, location));
        }
    }
    assert_eq!(world.particles().len(), 16);

    adapt_with_particles(&mut world, &mut mesh, &[], &[root()]);

    // 16 merged candidates, stride 4: exactly the cap survives.
    assert_eq!(world.particles().count_in(&root()), 4);
    assert_eq!(world.particles().len(), 4);
}

#[test]
fn coarsening_under_the_cap_keeps_every_particle() {
    let mut mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::with_max(16));
    let children = mesh.refine_cell(root());
    for (c, child) in children.iter().enumerate() {
        world.add_particle(&mesh, *child, tracer(c as u64, mesh.center(child)));
    }

    adapt_with_particles(&mut world, &mut mesh, &[], &[root()]);
    assert_eq!(world.particles().count_in(&root()), 4);
}

#[test]
fn a_particle_outside_the_mesh_is_dropped_silently() {
    let mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    world.add_particle(&mesh, root(), Particle::new(1, [0.99, 0.5]));
    world.add_particle(&mesh, root(), Particle::new(2, [0.5, 0.5]));

    // Emulate an advection step with velocity (10, 0) and dt 1; order
    // within a cell is unspecified, so pick the particle by id.
    for particle in world.particles_mut().particles_in_mut(&root()) {
        if particle.id == 1 {
            particle.location = [10.99, 0.5];
        }
    }

    let outbound = world.sort_particles_into_subdomains_and_cells(&mesh);
    assert!(outbound.is_empty());
    assert_eq!(world.particles().len(), 1);
    assert_eq!(world.particles().particles_in(&root())[0].id, 2);
}

#[test]
fn rebinning_restores_locality() {
    let mesh = StructuredMesh::<2>::subdivided_unit_cube(4);
    let mut world = world_with_cap(CapPolicy::default());
    let mut rng = StdRng::seed_from_u64(7);
    let between = rand::distributions::Uniform::from(0.0..1.0);

    // Insert everything into one cell, then scatter the locations.
    for id in 0..200 {
        world.add_particle(&mesh, root(), Particle::new(id, [0.1, 0.1]));
    }
    for particle in world.particles_mut().particles_in_mut(&root()) {
        particle.location = [between.sample(&mut rng), between.sample(&mut rng)];
    }

    let outbound = world.sort_particles_into_subdomains_and_cells(&mesh);
    assert!(outbound.is_empty());
    assert_eq!(world.particles().len(), 200);
    for (cell, batch) in world.particles().iter() {
        for particle in batch {
            assert!(mesh.cell_contains(cell, &particle.location));
        }
    }

    // Identifiers survive the shuffle without duplication.
    let mut ids: Vec<u64> = world
        .particles()
        .iter()
        .flat_map(|(_, batch)| batch.iter().map(|p| p.id))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
}

#[test]
fn particles_crossing_into_ghost_cells_are_staged_for_migration() {
    let mut mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
    // The right half of the domain belongs to rank 1.
    mesh.set_owner(CellKey::new(0, 1), 1);
    mesh.set_owner(CellKey::new(0, 3), 1);

    let mut world = world_with_cap(CapPolicy::default());
    world.add_particle(&mesh, root(), Particle::new(5, [0.49, 0.25]));
    world.particles_mut().particles_in_mut(&root())[0].location = [0.51, 0.25];

    let outbound = world.sort_particles_into_subdomains_and_cells(&mesh);
    assert!(world.particles().is_empty());
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[&1].len(), 1);
    assert_eq!(outbound[&1][0].id, 5);

    assert_eq!(find_neighbors::<2, _>(&mesh), vec![1]);
}

#[test]
#[should_panic(expected = "local subdomain")]
fn adding_to_a_ghost_cell_is_refused() {
    let mut mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
    mesh.set_owner(CellKey::new(0, 3), 2);
    let mut world = world_with_cap(CapPolicy::default());
    world.add_particle(&mesh, CellKey::new(0, 3), Particle::new(1, [0.75, 0.75]));
}

#[test]
fn insert_cap_refuses_only_when_enabled() {
    let mesh = StructuredMesh::<2>::unit_cube();
    let mut cap = CapPolicy::with_max(2);
    cap.on_insert = true;
    let mut world = world_with_cap(cap);

    assert!(world.add_particle(&mesh, root(), Particle::new(0, [0.2, 0.2])));
    assert!(world.add_particle(&mesh, root(), Particle::new(1, [0.4, 0.4])));
    assert!(!world.add_particle(&mesh, root(), Particle::new(2, [0.6, 0.6])));
    assert_eq!(world.particles().len(), 2);

    // The default policy lets insertions exceed the cap.
    let mut world = world_with_cap(CapPolicy::with_max(2));
    for id in 0..3 {
        assert!(world.add_particle(&mesh, root(), Particle::new(id, [0.5, 0.5])));
    }
    assert_eq!(world.particles().len(), 3);
}

#[test]
fn property_updates_sample_the_solution() {
    let mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    world.add_particle(&mesh, root(), Particle::new(1, [0.25, 0.75]));

    let field = UniformField { value: 3.5 };
    world.initialize_particles(&mesh, &field);
    let payload = world.particles().particles_in(&root())[0].properties.clone();
    assert_eq!(PointType::from_le_bytes(payload.try_into().unwrap()), 3.5);

    let field = UniformField { value: -1.25 };
    world.update_particles(&mesh, &field);
    let payload = world.particles().particles_in(&root())[0].properties.clone();
    assert_eq!(PointType::from_le_bytes(payload.try_into().unwrap()), -1.25);
}

#[test]
fn adapting_an_empty_world_registers_nothing() {
    let mut mesh = StructuredMesh::<2>::unit_cube();
    let mut world = world_with_cap(CapPolicy::default());
    adapt_with_particles(&mut world, &mut mesh, &[root()], &[]);
    assert!(world.particles().is_empty());
    assert_eq!(mesh.active_cells().count(), 4);
}
