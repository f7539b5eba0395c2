//! Reference integrators.
//!
//! [`Euler`] is the cheapest possible stepper and keeps no state at all.
//! [`Rk2`] is a two-stage midpoint scheme; it remembers each particle's
//! stage-zero location between stages and serializes that scratch state
//! alongside migrating particles.

use std::collections::HashMap;
use std::mem;

use crate::particle::Particle;
use crate::traits::Integrator;
use crate::types::{ParticleId, PointType};

/// Forward Euler, a single stage per timestep.
#[derive(Clone, Copy, Debug, Default)]
pub struct Euler;

impl<const D: usize> Integrator<D> for Euler {
    fn data_len(&self) -> usize {
        0
    }

    fn write_data<'b>(&self, buf: &'b mut [u8], _id: ParticleId) -> &'b mut [u8] {
        buf
    }

    fn read_data<'b>(&mut self, buf: &'b [u8], _id: ParticleId) -> &'b [u8] {
        buf
    }

    fn local_step(
        &mut self,
        particles: &mut [Particle<D>],
        old_velocities: &[[PointType; D]],
        _velocities: &[[PointType; D]],
        dt: PointType,
    ) {
        for (particle, velocity) in particles.iter_mut().zip(old_velocities) {
            for d in 0..D {
                particle.location[d] += dt * velocity[d];
            }
        }
    }

    fn advance_stage(&mut self) {}

    fn continue_integration(&self) -> bool {
        false
    }
}

/// Explicit midpoint rule with two stages per timestep.
///
/// Stage zero stores the starting location and takes half a step with the
/// previous solution's velocity; stage one takes the full step from the
/// stored location with the current velocity sampled at the midpoint.
#[derive(Clone, Debug, Default)]
pub struct Rk2<const D: usize> {
    step: u32,
    start_locations: HashMap<ParticleId, [PointType; D]>,
}

impl<const D: usize> Rk2<D> {
    /// Create a fresh two-stage integrator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<const D: usize> Integrator<D> for Rk2<D> {
    fn data_len(&self) -> usize {
        D * mem::size_of::<PointType>()
    }

    fn write_data<'b>(&self, buf: &'b mut [u8], id: ParticleId) -> &'b mut [u8] {
        let location = self
            .start_locations
            .get(&id)
            .copied()
            .unwrap_or([0.0; D]);
        let mut rest = buf;
        for coordinate in location {
            let (head, tail) = rest.split_at_mut(mem::size_of::<PointType>());
            head.copy_from_slice(&coordinate.to_le_bytes());
            rest = tail;
        }
        rest
    }

    fn read_data<'b>(&mut self, buf: &'b [u8], id: ParticleId) -> &'b [u8] {
        let mut rest = buf;
        let mut location = [0.0; D];
        for coordinate in location.iter_mut() {
            let (head, tail) = rest.split_at(mem::size_of::<PointType>());
            *coordinate = PointType::from_le_bytes(head.try_into().unwrap());
            rest = tail;
        }
        self.start_locations.insert(id, location);
        rest
    }

    fn local_step(
        &mut self,
        particles: &mut [Particle<D>],
        old_velocities: &[[PointType; D]],
        velocities: &[[PointType; D]],
        dt: PointType,
    ) {
        if self.step == 0 {
            for (particle, velocity) in particles.iter_mut().zip(old_velocities) {
                self.start_locations.insert(particle.id, particle.location);
                for d in 0..D {
                    particle.location[d] += 0.5 * dt * velocity[d];
                }
            }
        } else {
            for (particle, velocity) in particles.iter_mut().zip(velocities) {
                let start = self
                    .start_locations
                    .get(&particle.id)
                    .copied()
                    .unwrap_or(particle.location);
                for d in 0..D {
                    particle.location[d] = start[d] + dt * velocity[d];
                }
            }
        }
    }

    fn advance_stage(&mut self) {
        self.step = 1 - self.step;
        if self.step == 0 {
            self.start_locations.clear();
        }
    }

    fn continue_integration(&self) -> bool {
        self.step != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn euler_takes_one_step_with_the_old_velocity() {
        let mut integrator = Euler;
        let mut particles = vec![Particle::<2>::new(0, [0.2, 0.2])];
        Integrator::local_step(
            &mut integrator,
            &mut particles,
            &[[1.0, -1.0]],
            &[[9.0, 9.0]],
            0.1,
        );
        assert_relative_eq!(particles[0].location[0], 0.3);
        assert_relative_eq!(particles[0].location[1], 0.1);
        assert!(!Integrator::<2>::continue_integration(&integrator));
    }

    #[test]
    fn rk2_recovers_a_constant_velocity_exactly() {
        let mut integrator = Rk2::<2>::new();
        let mut particles = vec![Particle::<2>::new(3, [0.5, 0.5])];
        let velocity = [[0.2, 0.4]];
        let dt = 0.5;

        integrator.local_step(&mut particles, &velocity, &velocity, dt);
        integrator.advance_stage();
        assert!(Integrator::<2>::continue_integration(&integrator));

        integrator.local_step(&mut particles, &velocity, &velocity, dt);
        integrator.advance_stage();
        assert!(!Integrator::<2>::continue_integration(&integrator));

        assert_relative_eq!(particles[0].location[0], 0.6);
        assert_relative_eq!(particles[0].location[1], 0.7);
    }

    #[test]
    fn rk2_scratch_state_round_trips() {
        let mut source = Rk2::<2>::new();
        let mut particles = vec![Particle::<2>::new(11, [0.25, 0.75])];
        source.local_step(&mut particles, &[[1.0, 0.0]], &[[1.0, 0.0]], 0.1);

        let mut buf = vec![0u8; Integrator::<2>::data_len(&source)];
        let rest = source.write_data(&mut buf, 11);
        assert!(rest.is_empty());

        let mut destination = Rk2::<2>::new();
        destination.advance_stage();
        let rest = destination.read_data(&buf, 11);
        assert!(rest.is_empty());

        destination.local_step(&mut particles, &[[1.0, 0.0]], &[[1.0, 0.0]], 0.1);
        assert_relative_eq!(particles[0].location[0], 0.35);
        assert_relative_eq!(particles[0].location[1], 0.75);
    }
}
