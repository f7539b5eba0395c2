//! The surface of the host solver that the tracker consumes.
//!
//! The mesh, the mapping between physical and unit-cell coordinates, and
//! the solution vectors all belong to the host. The tracker only reads
//! them; their mutation during mesh adaptation is mediated through the
//! pack/unpack callbacks in [`crate::transfer`].

use crate::types::{CellKey, Ownership, PointType};

/// Read access to the process-local part of a distributed triangulation.
pub trait Triangulation<const D: usize> {
    /// Iterator over the active cells visible to this process.
    type ActiveCells<'a>: Iterator<Item = CellKey> + 'a
    where
        Self: 'a;

    /// All active cells visible to this process, owned and ghost alike,
    /// in an order that is identical on every call.
    fn active_cells(&self) -> Self::ActiveCells<'_>;

    /// Who owns `cell`.
    fn ownership(&self, cell: CellKey) -> Ownership;

    /// The child cells of `cell`; empty if `cell` has not been refined.
    fn children(&self, cell: CellKey) -> Vec<CellKey>;

    /// Pull `point` back to the unit cell of `cell` through the mapping.
    /// `None` signals that the mapping could not be inverted at this point;
    /// the result may lie outside the unit cell.
    fn transform_real_to_unit_cell(
        &self,
        cell: CellKey,
        point: &[PointType; D],
    ) -> Option<[PointType; D]>;

    /// Whether `point` lies inside `cell`.
    ///
    /// On faces shared between two cells the test must accept the point in
    /// exactly one of them, so that dispersing a population over sibling
    /// cells never duplicates a particle. The default accepts the closed
    /// unit cell and is only adequate for meshes that never share faces.
    fn cell_contains(&self, cell: CellKey, point: &[PointType; D]) -> bool {
        match self.transform_real_to_unit_cell(cell, point) {
            Some(unit) => unit.iter().all(|&u| (0.0..=1.0).contains(&u)),
            None => false,
        }
    }

    /// Find the active cell containing `point`, or `None` if the point
    /// lies outside the mesh known to this process. The choice among cells
    /// sharing a boundary is deterministic but otherwise unspecified.
    fn find_cell_around_point(&self, point: &[PointType; D]) -> Option<CellKey> {
        self.active_cells()
            .find(|&cell| self.cell_contains(cell, point))
    }
}

/// Point-wise evaluation of the host solver's solution fields inside one
/// cell. Points are given in unit-cell coordinates of that cell.
pub trait SolutionField<const D: usize> {
    /// Number of solution components.
    fn n_components(&self) -> usize;

    /// Evaluate the velocity part of the current and the previous solution
    /// at the given unit-cell points of `cell`. Both output slices have one
    /// entry per point.
    fn velocities_at(
        &self,
        cell: CellKey,
        unit_points: &[[PointType; D]],
        current: &mut [[PointType; D]],
        previous: &mut [[PointType; D]],
    );

    /// Evaluate all solution components and their gradients at the given
    /// unit-cell points of `cell`. `values` is filled with
    /// `n_points × n_components` entries, `gradients` with
    /// `n_points × n_components × D`, both row-major by point.
    fn solution_at(
        &self,
        cell: CellKey,
        unit_points: &[[PointType; D]],
        values: &mut [PointType],
        gradients: &mut [PointType],
    );
}
