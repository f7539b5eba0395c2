//! Interface of the multi-stage ODE stepper that moves the particles.

use crate::particle::Particle;
use crate::types::{ParticleId, PointType};

/// A time integrator advancing particle locations through one or more
/// stages per timestep.
///
/// Integrators with more than one stage usually keep per-particle scratch
/// state between stages. When a particle migrates to another process in the
/// middle of a timestep that state travels with it, framed right behind the
/// particle record, through [`write_data`](Integrator::write_data) and
/// [`read_data`](Integrator::read_data).
pub trait Integrator<const D: usize> {
    /// Bytes of per-particle scratch state appended to each migrated
    /// particle.
    fn data_len(&self) -> usize;

    /// Serialize the scratch state of the particle with the given id into
    /// the front of `buf`, returning the unwritten rest. Advances by
    /// exactly [`data_len`](Integrator::data_len) bytes.
    fn write_data<'b>(&self, buf: &'b mut [u8], id: ParticleId) -> &'b mut [u8];

    /// Restore the scratch state of an arriving particle from the front of
    /// `buf`, returning the unread rest. Inverse of
    /// [`write_data`](Integrator::write_data).
    fn read_data<'b>(&mut self, buf: &'b [u8], id: ParticleId) -> &'b [u8];

    /// Advance a cell-local range of particles by one stage. The velocity
    /// slices are parallel to `particles` and hold samples of the previous
    /// and the current solution at each particle's location.
    fn local_step(
        &mut self,
        particles: &mut [Particle<D>],
        old_velocities: &[[PointType; D]],
        velocities: &[[PointType; D]],
        dt: PointType,
    );

    /// Move on to the next stage of the current timestep.
    fn advance_stage(&mut self);

    /// Whether another stage of the current timestep remains.
    fn continue_integration(&self) -> bool;
}
