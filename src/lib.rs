//! # Distributed Lagrangian particle tracking in Rust
//!
//! Massless tracer particles advected through a time-varying finite-element
//! velocity field on an adaptively refined, MPI-partitioned mesh. The crate
//! keeps every particle attached to the mesh cell that contains it, migrates
//! particle ownership across subdomain boundaries, and carries particle
//! populations through coarsen/refine/repartition events of the host mesh.
//!
//! The host solver stays in charge of the mesh, the mapping and the solution
//! vectors; it is consumed through the traits in [`traits`].
//!
//! ## References
//! \[1\] Gassmöller, R., Lokavarapu, H., Heien, E., Puckett, E. G., Bangerth,
//! W. "Flexible and scalable particle-in-cell methods with adaptive mesh
//! refinement for geodynamic computation." Geochemistry, Geophysics,
//! Geosystems 19.9 (2018): 3596-3604.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod exchange;
pub mod integrators;
pub mod particle;
pub mod shapes;
pub mod store;
pub mod traits;
pub mod transfer;
pub mod types;
pub mod world;
