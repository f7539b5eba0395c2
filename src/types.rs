//! Shared type definitions.

/// Scalar type of particle coordinates.
pub type PointType = f64;

/// Globally unique particle identifier, assigned by the particle generator
/// and stable across migration and mesh adaptation.
pub type ParticleId = u64;

/// Identifier of a subdomain, i.e. an MPI rank in the host communicator.
pub type SubdomainId = i32;

/// Identifies a cell of the process-local triangulation by its refinement
/// level and its index within that level.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    /// Refinement level of the cell.
    pub level: i32,
    /// Index of the cell within its level.
    pub index: i32,
}

impl CellKey {
    /// Create a key from a level and an index.
    pub fn new(level: i32, index: i32) -> Self {
        Self { level, index }
    }
}

/// Ownership of an active cell as seen from the local process.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Ownership {
    /// The cell belongs to the local subdomain.
    Owned,
    /// The cell belongs to another subdomain and is only visible here
    /// because it touches the local subdomain.
    Ghost(SubdomainId),
}

/// Status of a cell during a mesh adaptation cycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CellStatus {
    /// The cell survives adaptation unchanged.
    Persist,
    /// The cell is split into `2^dim` children.
    Refine,
    /// The cell's `2^dim` children are merged back into it.
    Coarsen,
}

/// Per-cell density cap and the points at which it is enforced.
///
/// A `max_per_cell` of zero disables capping. The cap is soft: enforcement
/// decimates a stream of candidates with a stride of `2^dim` instead of
/// cutting off at the limit, so a cell may temporarily exceed it.
#[derive(Clone, Copy, Debug)]
pub struct CapPolicy {
    /// Soft limit on the number of particles in one cell; 0 means unlimited.
    pub max_per_cell: usize,
    /// Decimate when merging children into a coarsened parent.
    pub on_coarsen: bool,
    /// Decimate arrivals from other subdomains whose destination cell is full.
    pub on_arrival: bool,
    /// Refuse insertions into full cells.
    pub on_insert: bool,
}

impl CapPolicy {
    /// Cap at `max_per_cell`, enforced at coarsening and on migration
    /// arrival but not on insertion.
    pub fn with_max(max_per_cell: usize) -> Self {
        Self {
            max_per_cell,
            ..Self::default()
        }
    }
}

impl Default for CapPolicy {
    fn default() -> Self {
        Self {
            max_per_cell: 0,
            on_coarsen: true,
            on_arrival: true,
            on_insert: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_keys_order_by_level_then_index() {
        let mut keys = vec![
            CellKey::new(1, 0),
            CellKey::new(0, 7),
            CellKey::new(0, 2),
            CellKey::new(1, 3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                CellKey::new(0, 2),
                CellKey::new(0, 7),
                CellKey::new(1, 0),
                CellKey::new(1, 3),
            ]
        );
    }

    #[test]
    fn default_cap_is_disabled() {
        let cap = CapPolicy::default();
        assert_eq!(cap.max_per_cell, 0);
        assert!(cap.on_coarsen && cap.on_arrival && !cap.on_insert);
    }
}
