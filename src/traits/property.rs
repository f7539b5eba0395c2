//! Interface of the manager that owns per-particle properties.

use crate::particle::Particle;
use crate::types::PointType;

/// When the property manager wants its particles refreshed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyUpdate {
    /// Properties are set once at initialization and never touched again.
    Never,
    /// Properties are recomputed at the end of every timestep.
    EveryStep,
}

/// Owner of the opaque property payload carried by every particle.
///
/// The tracker hands the manager FE field values and gradients sampled at
/// the particle's location; what the manager stores in the payload is its
/// own business.
pub trait PropertyManager<const D: usize> {
    /// Bytes of the per-particle property payload.
    fn data_len(&self) -> usize;

    /// Serialized size of one full particle record including the payload.
    fn particle_size(&self) -> usize {
        Particle::<D>::record_len(self.data_len())
    }

    /// Fill in the payload of a freshly generated particle. `values` holds
    /// all solution components at the particle's location, `gradients`
    /// their spatial derivatives (`n_components × D`, row-major).
    fn initialize_particle(
        &self,
        particle: &mut Particle<D>,
        values: &[PointType],
        gradients: &[PointType],
    );

    /// Refresh the payload of an existing particle; same slice layout as
    /// [`initialize_particle`](Self::initialize_particle).
    fn update_particle(
        &self,
        particle: &mut Particle<D>,
        values: &[PointType],
        gradients: &[PointType],
    );

    /// Whether [`update_particle`](Self::update_particle) runs every step.
    fn need_update(&self) -> PropertyUpdate;
}
