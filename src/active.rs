//! Compaction of the grid nodes touched in a step into a dense local numbering.

use crate::math::*;
use crate::mesh::{Location, ShapeFunction};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Active degrees of freedom of one grid, for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Active {
    /// Cells that contributed nodes.
    pub cells: Vec<usize>,
    /// Global node -> local index, or [`Active::INACTIVE`].
    pub indices: Vec<usize>,
    /// Local index -> global node.
    pub rev_indices: Vec<usize>,
}

impl Active {
    pub const INACTIVE: usize = usize::MAX;

    /// Nodes of `shape` used by at least one of `cells`, numbered in ascending global order.
    pub fn compute(shape: &dyn ShapeFunction, cells: &[usize]) -> Self {
        let touched: Vec<AtomicU32> = (0..shape.node_count()).map(|_| AtomicU32::new(0)).collect();

        cells.par_iter().for_each(|&cell| {
            let loc = Location {
                cell,
                coords: TV::from_element(0.5),
            };
            for n in shape.list_nodes(&loc) {
                touched[n].fetch_add(1, Ordering::Relaxed);
            }
        });

        let mut indices = vec![Self::INACTIVE; touched.len()];
        let mut rev_indices = Vec::new();
        for (n, t) in touched.iter().enumerate() {
            if t.load(Ordering::Relaxed) > 0 {
                indices[n] = rev_indices.len();
                rev_indices.push(n);
            }
        }

        Active {
            cells: cells.to_vec(),
            indices,
            rev_indices,
        }
    }

    /// The primal and dual active sets of the same cells.
    pub fn compute_pair(
        primal: &dyn ShapeFunction,
        dual: &dyn ShapeFunction,
        cells: &[usize],
    ) -> (Self, Self) {
        rayon::join(
            || Self::compute(primal, cells),
            || Self::compute(dual, cells),
        )
    }

    pub fn count(&self) -> usize {
        self.rev_indices.len()
    }

    pub fn is_active(&self, node: usize) -> bool {
        self.indices[node] != Self::INACTIVE
    }

    pub fn local(&self, node: usize) -> Option<usize> {
        match self.indices[node] {
            Self::INACTIVE => None,
            i => Some(i),
        }
    }

    /// Restricts a full-grid field to the active nodes.
    pub fn field2var<V: Copy + Send + Sync>(&self, field: &[V]) -> Vec<V> {
        self.rev_indices.par_iter().map(|&n| field[n]).collect()
    }

    /// Extends an active field to the full grid, with `zero` on inactive nodes.
    pub fn var2field<V: Copy + Send + Sync>(&self, var: &[V], zero: V) -> Vec<V> {
        let mut field = vec![zero; self.indices.len()];
        self.var2field_into(var, &mut field, zero);
        field
    }

    /// Same as [`Active::var2field`], writing into an existing full-grid field.
    pub fn var2field_into<V: Copy + Send + Sync>(&self, var: &[V], field: &mut [V], zero: V) {
        field
            .par_iter_mut()
            .zip(self.indices.par_iter())
            .for_each(|(f, &i)| {
                *f = if i == Self::INACTIVE { zero } else { var[i] };
            });
    }
}
