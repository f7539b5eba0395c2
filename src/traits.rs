//! Interfaces between the tracker and its collaborators.

pub mod integrator;
pub mod mesh;
pub mod property;

pub use integrator::Integrator;
pub use mesh::{SolutionField, Triangulation};
pub use property::{PropertyManager, PropertyUpdate};
