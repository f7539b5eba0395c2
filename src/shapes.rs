//! Simple structured meshes.
//!
//! [`StructuredMesh`] is a Cartesian box mesh with hierarchic refinement,
//! small enough to reason about by hand. It backs the crate's tests and
//! demo programs and doubles as a reference implementation of the
//! [`Triangulation`] surface, including the transport flow of the mesh
//! transfer mechanism (see [`adapt_with_particles`]).

use std::collections::{BTreeMap, BTreeSet};

use crate::traits::Triangulation;
use crate::types::{CellKey, CellStatus, Ownership, PointType, SubdomainId};
use crate::world::World;

#[derive(Clone, Debug)]
struct CellGeometry<const D: usize> {
    origin: [PointType; D],
    extent: [PointType; D],
    children: Vec<CellKey>,
}

/// A Cartesian mesh over the unit box with quadtree/octree refinement.
///
/// Cells are addressed by `(level, index)`; indices are assigned
/// sequentially per level in creation order, which keeps the active cell
/// list deterministic. Cell ownership defaults to subdomain 0 and can be
/// reassigned per cell to emulate a partitioned mesh.
#[derive(Clone, Debug)]
pub struct StructuredMesh<const D: usize> {
    cells: BTreeMap<CellKey, CellGeometry<D>>,
    active: Vec<CellKey>,
    owners: BTreeMap<CellKey, SubdomainId>,
    local_rank: SubdomainId,
    next_index: BTreeMap<i32, i32>,
    upper: [PointType; D],
}

impl<const D: usize> StructuredMesh<D> {
    /// The unit box as a single unrefined cell.
    pub fn unit_cube() -> Self {
        Self::subdivided_unit_cube(1)
    }

    /// The unit box split into `divisions` equal cells per axis, all at
    /// level 0, indexed lexicographically with the first axis fastest.
    pub fn subdivided_unit_cube(divisions: usize) -> Self {
        assert!(divisions > 0);
        let h = 1.0 / divisions as PointType;
        let n_cells = divisions.pow(D as u32);

        let mut cells = BTreeMap::new();
        let mut active = Vec::with_capacity(n_cells);
        let mut owners = BTreeMap::new();
        for flat in 0..n_cells {
            let mut origin = [0.0; D];
            let mut rem = flat;
            for coordinate in origin.iter_mut() {
                *coordinate = (rem % divisions) as PointType * h;
                rem /= divisions;
            }
            let key = CellKey::new(0, flat as i32);
            cells.insert(
                key,
                CellGeometry {
                    origin,
                    extent: [h; D],
                    children: Vec::new(),
                },
            );
            owners.insert(key, 0);
            active.push(key);
        }

        let mut next_index = BTreeMap::new();
        next_index.insert(0, n_cells as i32);
        Self {
            cells,
            active,
            owners,
            local_rank: 0,
            next_index,
            upper: [1.0; D],
        }
    }

    /// The subdomain this mesh instance views the world from.
    pub fn set_local_rank(&mut self, rank: SubdomainId) {
        self.local_rank = rank;
    }

    /// Assign `cell` to a subdomain.
    pub fn set_owner(&mut self, cell: CellKey, owner: SubdomainId) {
        assert!(self.cells.contains_key(&cell), "unknown cell");
        self.owners.insert(cell, owner);
    }

    /// Whether `cell` is an active (leaf) cell.
    pub fn is_active(&self, cell: &CellKey) -> bool {
        self.active.binary_search(cell).is_ok()
    }

    /// The geometric center of `cell`.
    pub fn center(&self, cell: &CellKey) -> [PointType; D] {
        let geometry = &self.cells[cell];
        let mut center = geometry.origin;
        for d in 0..D {
            center[d] += 0.5 * geometry.extent[d];
        }
        center
    }

    /// Split an active cell into `2^D` children, which inherit its owner.
    pub fn refine_cell(&mut self, cell: CellKey) -> Vec<CellKey> {
        assert!(self.is_active(&cell), "only active cells can be refined");
        let geometry = self.cells[&cell].clone();
        let owner = self.owners[&cell];
        let level = cell.level + 1;

        let mut children = Vec::with_capacity(1 << D);
        for corner in 0..(1usize << D) {
            let index = {
                let counter = self.next_index.entry(level).or_insert(0);
                let index = *counter;
                *counter += 1;
                index
            };
            let child = CellKey::new(level, index);

            let mut origin = geometry.origin;
            let mut extent = geometry.extent;
            for d in 0..D {
                extent[d] *= 0.5;
                if corner >> d & 1 == 1 {
                    origin[d] += extent[d];
                }
            }
            self.cells.insert(
                child,
                CellGeometry {
                    origin,
                    extent,
                    children: Vec::new(),
                },
            );
            self.owners.insert(child, owner);
            children.push(child);
        }

        self.cells.get_mut(&cell).unwrap().children = children.clone();
        self.active.retain(|active| *active != cell);
        self.active.extend(children.iter().copied());
        self.active.sort_unstable();
        children
    }

    /// Merge the active children of `cell` back into it.
    pub fn coarsen_cell(&mut self, cell: CellKey) {
        let children = std::mem::take(&mut self.cells.get_mut(&cell).unwrap().children);
        assert!(
            !children.is_empty() && children.iter().all(|child| self.is_active(child)),
            "only a cell whose children are all active can be coarsened"
        );
        for child in &children {
            self.cells.remove(child);
            self.owners.remove(child);
        }
        self.active.retain(|active| !children.contains(active));
        self.active.push(cell);
        self.active.sort_unstable();
    }
}

impl<const D: usize> Triangulation<D> for StructuredMesh<D> {
    type ActiveCells<'a> = std::iter::Copied<std::slice::Iter<'a, CellKey>>
    where
        Self: 'a;

    fn active_cells(&self) -> Self::ActiveCells<'_> {
        self.active.iter().copied()
    }

    fn ownership(&self, cell: CellKey) -> Ownership {
        match self.owners.get(&cell) {
            Some(&owner) if owner != self.local_rank => Ownership::Ghost(owner),
            _ => Ownership::Owned,
        }
    }

    fn children(&self, cell: CellKey) -> Vec<CellKey> {
        self.cells
            .get(&cell)
            .map(|geometry| geometry.children.clone())
            .unwrap_or_default()
    }

    fn transform_real_to_unit_cell(
        &self,
        cell: CellKey,
        point: &[PointType; D],
    ) -> Option<[PointType; D]> {
        let geometry = self.cells.get(&cell)?;
        let mut unit = [0.0; D];
        for d in 0..D {
            unit[d] = (point[d] - geometry.origin[d]) / geometry.extent[d];
        }
        Some(unit)
    }

    // Half-open on interior faces, closed on the upper domain boundary, so
    // a point on a shared face belongs to exactly one cell.
    fn cell_contains(&self, cell: CellKey, point: &[PointType; D]) -> bool {
        let Some(geometry) = self.cells.get(&cell) else {
            return false;
        };
        for d in 0..D {
            let hi = geometry.origin[d] + geometry.extent[d];
            let on_domain_face = (hi - self.upper[d]).abs() < 1e-12;
            let below = if on_domain_face {
                point[d] <= hi
            } else {
                point[d] < hi
            };
            if point[d] < geometry.origin[d] || !below {
                return false;
            }
        }
        true
    }
}

/// Run one full adaptation cycle on a single rank: hand the population to
/// the transfer buffers, refine and coarsen the mesh, and load the buffers
/// back, replaying them exactly as the mesh transfer mechanism would.
///
/// `refine` lists active cells to split; `coarsen` lists parents whose
/// children shall merge. A refined cell's buffer is delivered to each of
/// its children; a coarsening parent packs once and loads once.
pub fn adapt_with_particles<const D: usize>(
    world: &mut World<D>,
    mesh: &mut StructuredMesh<D>,
    refine: &[CellKey],
    coarsen: &[CellKey],
) {
    let max_per_cell = world.local_max_particles_per_cell();
    let registered = world.register_transfer(max_per_cell);

    let mut packets: Vec<(CellKey, CellStatus, Vec<u8>)> = Vec::new();
    if let Some(bytes_per_cell) = registered {
        let merged_children: BTreeSet<CellKey> = coarsen
            .iter()
            .flat_map(|parent| mesh.children(*parent))
            .collect();

        for cell in mesh.active_cells().collect::<Vec<_>>() {
            if merged_children.contains(&cell) {
                continue;
            }
            let status = if refine.contains(&cell) {
                CellStatus::Refine
            } else {
                CellStatus::Persist
            };
            let mut buffer = vec![0u8; bytes_per_cell];
            world.pack_cell(mesh, cell, status, &mut buffer);
            packets.push((cell, status, buffer));
        }
        for &parent in coarsen {
            let mut buffer = vec![0u8; bytes_per_cell];
            world.pack_cell(mesh, parent, CellStatus::Coarsen, &mut buffer);
            packets.push((parent, CellStatus::Coarsen, buffer));
        }
    }

    for &cell in refine {
        mesh.refine_cell(cell);
    }
    for &parent in coarsen {
        mesh.coarsen_cell(parent);
    }

    if world.register_load_callback() {
        for (cell, status, buffer) in packets {
            match status {
                CellStatus::Persist | CellStatus::Coarsen => {
                    world.unpack_cell(mesh, cell, status, &buffer)
                }
                CellStatus::Refine => {
                    for child in mesh.children(cell) {
                        world.unpack_cell(mesh, child, CellStatus::Refine, &buffer);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdivided_mesh_enumerates_cells_lexicographically() {
        let mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
        assert_eq!(mesh.active_cells().count(), 4);
        assert_eq!(mesh.center(&CellKey::new(0, 0)), [0.25, 0.25]);
        assert_eq!(mesh.center(&CellKey::new(0, 1)), [0.75, 0.25]);
        assert_eq!(mesh.center(&CellKey::new(0, 2)), [0.25, 0.75]);
        assert_eq!(mesh.center(&CellKey::new(0, 3)), [0.75, 0.75]);
    }

    #[test]
    fn refinement_replaces_the_parent_with_its_children() {
        let mut mesh = StructuredMesh::<2>::unit_cube();
        let parent = CellKey::new(0, 0);
        let children = mesh.refine_cell(parent);

        assert_eq!(children.len(), 4);
        assert!(!mesh.is_active(&parent));
        assert!(children.iter().all(|child| mesh.is_active(child)));
        assert_eq!(mesh.children(parent), children);

        mesh.coarsen_cell(parent);
        assert!(mesh.is_active(&parent));
        assert_eq!(mesh.active_cells().count(), 1);
    }

    #[test]
    fn shared_faces_belong_to_exactly_one_cell() {
        let mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
        let on_face = [0.5, 0.25];
        let containing: Vec<CellKey> = mesh
            .active_cells()
            .filter(|&cell| mesh.cell_contains(cell, &on_face))
            .collect();
        assert_eq!(containing, vec![CellKey::new(0, 1)]);

        // The domain boundary stays inside the mesh.
        assert_eq!(
            mesh.find_cell_around_point(&[1.0, 1.0]),
            Some(CellKey::new(0, 3))
        );
        assert_eq!(mesh.find_cell_around_point(&[1.1, 0.5]), None);
    }

    #[test]
    fn unit_transform_is_affine_per_cell() {
        let mesh = StructuredMesh::<2>::subdivided_unit_cube(2);
        let unit = mesh
            .transform_real_to_unit_cell(CellKey::new(0, 3), &[0.75, 0.625])
            .unwrap();
        assert_eq!(unit, [0.5, 0.25]);
    }
}
