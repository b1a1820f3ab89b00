use super::{
    BoundaryInfo, BoundaryMapper, Derivatives, Grid, Interpolation, Location, QuadPoints,
    ShapeFunction,
};
use crate::math::*;
use smallvec::SmallVec;

/// Abscissa of the 2-point Gauss rule on `[0, 1]`.
const GAUSS_OFFSET: T = 0.211_324_865_405_187_1;

fn gauss_points(grid: &Grid, cell: UV) -> QuadPoints {
    let weight = grid.cell_volume() / (1 << DIM) as T;
    let origin = grid.node_x(cell);
    (0..1 << DIM)
        .map(|k| {
            let local = TV::from_fn(|d, _| {
                if (k >> d) & 1 == 1 {
                    1. - GAUSS_OFFSET
                } else {
                    GAUSS_OFFSET
                }
            });
            (origin + local.component_mul(&grid.dx), weight)
        })
        .collect()
}

/// Trilinear shape functions on the grid vertices.
pub struct LinearShape {
    pub grid: Grid,
}

impl LinearShape {
    pub fn new(grid: Grid) -> Self {
        LinearShape { grid }
    }
}

impl ShapeFunction for LinearShape {
    fn node_count(&self) -> usize {
        self.grid.node_count()
    }

    fn cell_count(&self) -> usize {
        self.grid.cell_count()
    }

    fn cell_size(&self) -> T {
        self.grid.min_dx()
    }

    fn locate(&self, x: &TV) -> Location {
        let (cell, coords) = self.grid.locate(x);
        Location {
            cell: self.grid.cell_index(cell),
            coords,
        }
    }

    fn list_nodes(&self, loc: &Location) -> NodeList {
        let cell = self.grid.cell_coord(loc.cell);
        self.grid
            .cell_corners(cell)
            .iter()
            .map(|&c| self.grid.node_index(c))
            .collect()
    }

    fn interpolate(&self, loc: &Location) -> Interpolation {
        let c = &loc.coords;
        let coeffs = (0..1 << DIM)
            .map(|k| {
                (0..DIM)
                    .map(|d| if (k >> d) & 1 == 1 { c[d] } else { 1. - c[d] })
                    .product::<T>()
            })
            .collect();
        Interpolation {
            nodes: self.list_nodes(loc),
            coeffs,
        }
    }

    fn derivatives(&self, loc: &Location) -> Derivatives {
        let c = &loc.coords;
        let factor = |k: usize, d: usize| if (k >> d) & 1 == 1 { c[d] } else { 1. - c[d] };
        let slope = |k: usize, d: usize| if (k >> d) & 1 == 1 { 1. } else { -1. };

        (0..1 << DIM)
            .map(|k| {
                TV::from_fn(|d, _| {
                    let mut g = slope(k, d) * self.grid.one_over_dx[d];
                    for e in (0..DIM).filter(|&e| e != d) {
                        g *= factor(k, e);
                    }
                    g
                })
            })
            .collect()
    }

    fn quadrature_points(&self, cell: usize) -> QuadPoints {
        gauss_points(&self.grid, self.grid.cell_coord(cell))
    }

    fn cell_center(&self, cell: usize) -> TV {
        self.grid.cell_center(self.grid.cell_coord(cell))
    }

    fn node_position(&self, node: usize) -> TV {
        self.grid.node_x(self.grid.node_coord(node))
    }

    fn lumped_mass(&self) -> Vec<T> {
        let n = self.grid.num_nodes();
        let vol = self.grid.cell_volume();
        self.grid
            .nodes()
            .map(|node| {
                // Each adjacent cell contributes an eighth of its volume.
                let adjacent: usize = (0..DIM)
                    .map(|d| if node[d] == 0 || node[d] + 1 == n[d] { 1 } else { 2 })
                    .product();
                vol * adjacent as T / (1 << DIM) as T
            })
            .collect()
    }

    fn boundary_info(&self, node: usize, mapper: &BoundaryMapper) -> BoundaryInfo {
        let coord = self.grid.node_coord(node);
        let cells = self.grid.cells;
        mapper.classify(|axis, upper| {
            if upper {
                coord[axis] == cells[axis]
            } else {
                coord[axis] == 0
            }
        })
    }
}

/// Piecewise-constant shape functions, one node per cell.
pub struct ConstantShape {
    pub grid: Grid,
}

impl ConstantShape {
    pub fn new(grid: Grid) -> Self {
        ConstantShape { grid }
    }
}

impl ShapeFunction for ConstantShape {
    fn node_count(&self) -> usize {
        self.grid.cell_count()
    }

    fn cell_count(&self) -> usize {
        self.grid.cell_count()
    }

    fn cell_size(&self) -> T {
        self.grid.min_dx()
    }

    fn locate(&self, x: &TV) -> Location {
        let (cell, coords) = self.grid.locate(x);
        Location {
            cell: self.grid.cell_index(cell),
            coords,
        }
    }

    fn list_nodes(&self, loc: &Location) -> NodeList {
        std::iter::once(loc.cell).collect()
    }

    fn interpolate(&self, loc: &Location) -> Interpolation {
        Interpolation {
            nodes: self.list_nodes(loc),
            coeffs: SmallVec::from_elem(1., 1),
        }
    }

    fn derivatives(&self, _loc: &Location) -> Derivatives {
        SmallVec::from_elem(TV::zeros(), 1)
    }

    fn quadrature_points(&self, cell: usize) -> QuadPoints {
        gauss_points(&self.grid, self.grid.cell_coord(cell))
    }

    fn cell_center(&self, cell: usize) -> TV {
        self.grid.cell_center(self.grid.cell_coord(cell))
    }

    fn node_position(&self, node: usize) -> TV {
        self.cell_center(node)
    }

    fn lumped_mass(&self) -> Vec<T> {
        vec![self.grid.cell_volume(); self.grid.cell_count()]
    }

    fn boundary_info(&self, node: usize, mapper: &BoundaryMapper) -> BoundaryInfo {
        let coord = self.grid.cell_coord(node);
        let cells = self.grid.cells;
        mapper.classify(|axis, upper| {
            if upper {
                coord[axis] + 1 == cells[axis]
            } else {
                coord[axis] == 0
            }
        })
    }
}
