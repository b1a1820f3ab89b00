use crate::math::*;
use crate::util::RangeExt;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Represents a regular (co-located) grid in world space.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Grid {
    /// Represents the world-space domain of the grid.
    pub domain: Range<TV>,
    /// The number of cells in each direction.
    /// Should always by domain.size() / dx, componentwise.
    pub cells: UV,
    /// Size of each grid cell
    /// Not serialized, since it can be calculated from `domain` and `cells`
    #[serde(skip, default = "TV::zeros")]
    pub dx: TV,
    /// Reciprocal of each component of `dx`
    /// Also not serialized, since it can be easily calculated from `dx`.
    #[serde(skip, default = "TV::zeros")]
    pub one_over_dx: TV,
}

impl Grid {
    /// Creates a new grid given the number of cells in each direction and the size of the domain.
    pub fn new(cells: UV, domain: Range<TV>) -> Self {
        let mut grid = Self {
            domain,
            cells: cells.map(|c| c.max(1)),
            dx: TV::zeros(),
            one_over_dx: TV::zeros(),
        };
        grid.recalculate_dx();
        grid
    }

    /// Recalculates dx and one_over_dx using `domain` and `cells`.
    /// Must be called after deserializing.
    pub fn recalculate_dx(&mut self) {
        self.dx = self.domain.size().component_div(&self.cells.cast::<T>());
        self.one_over_dx = self.dx.map(|d| 1. / d);
    }

    /// Returns the number of nodes in each direction
    /// This is one greater than the number of cells.
    pub fn num_nodes(&self) -> UV {
        self.cells + UV::from_element(1)
    }

    pub fn node_count(&self) -> usize {
        self.num_nodes().iter().product()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.iter().product()
    }

    /// Returns the volume of a cell
    pub fn cell_volume(&self) -> T {
        self.dx.iter().product()
    }

    /// The smallest edge length of a cell
    pub fn min_dx(&self) -> T {
        self.dx.min()
    }

    /// Location of the center of the cell.
    pub fn cell_center(&self, idx: UV) -> TV {
        self.domain.start + (idx.cast::<T>() + TV::from_element(0.5)).component_mul(&self.dx)
    }

    /// The cell containing `x` together with the local coordinates of `x` in `[0, 1]^3`.
    /// Points outside of the domain are clamped onto the closest cell.
    pub fn locate(&self, x: &TV) -> (UV, TV) {
        let grid_space = (x - self.domain.start).component_mul(&self.one_over_dx);
        let mut cell = UV::zeros();
        let mut local = TV::zeros();
        for k in 0..DIM {
            let max_cell = self.cells[k] - 1;
            let f = grid_space[k].floor();
            let c = if f < 0. {
                0
            } else {
                (f as usize).min(max_cell)
            };
            cell[k] = c;
            local[k] = (grid_space[k] - c as T).max(0.).min(1.);
        }
        (cell, local)
    }

    pub fn node_x(&self, node: UV) -> TV {
        self.domain.start + node.cast::<T>().component_mul(&self.dx)
    }

    pub fn node_index(&self, node: UV) -> usize {
        let n = self.num_nodes();
        node.x + n.x * (node.y + n.y * node.z)
    }

    pub fn node_coord(&self, mut i: usize) -> UV {
        let n = self.num_nodes();
        let x = i % n.x;
        i /= n.x;
        let y = i % n.y;
        UV::new(x, y, i / n.y)
    }

    pub fn cell_index(&self, cell: UV) -> usize {
        cell.x + self.cells.x * (cell.y + self.cells.y * cell.z)
    }

    pub fn cell_coord(&self, mut i: usize) -> UV {
        let x = i % self.cells.x;
        i /= self.cells.x;
        let y = i % self.cells.y;
        UV::new(x, y, i / self.cells.y)
    }

    /// The 8 corners of a cell, in binary-count order (x fastest).
    pub fn cell_corners(&self, cell: UV) -> [UV; 1 << DIM] {
        let mut corners = [cell; 1 << DIM];
        for (k, corner) in corners.iter_mut().enumerate() {
            for d in 0..DIM {
                corner[d] += (k >> d) & 1;
            }
        }
        corners
    }

    pub fn nodes(&self) -> impl Iterator<Item = UV> {
        RangeIterator::new(UV::zeros()..self.num_nodes())
    }

    pub fn cells(&self) -> impl Iterator<Item = UV> {
        RangeIterator::new(UV::zeros()..self.cells)
    }
}

/// Iterates over every multi-index in `range` (end exclusive), x fastest.
pub struct RangeIterator {
    index: UV,
    range: Range<UV>,
    done: bool,
}

impl RangeIterator {
    pub fn new(range: Range<UV>) -> Self {
        let done = (0..DIM).any(|k| range.start[k] >= range.end[k]);
        Self {
            index: range.start,
            range,
            done,
        }
    }
}

impl Iterator for RangeIterator {
    type Item = UV;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.index;

        let mut i = 0;
        loop {
            self.index[i] += 1;
            if self.index[i] >= self.range.end[i] {
                self.index[i] = self.range.start[i];
                if i != DIM - 1 {
                    i += 1;
                } else {
                    self.done = true;
                    break;
                }
            } else {
                break;
            }
        }

        Some(result)
    }
}
