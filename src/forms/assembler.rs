//! Two-pass assembly of block operators from weighted samples.
//!
//! A sample is a quadrature point (a particle, or a point of a cell quadrature rule) with the
//! shape-function values and gradients of the active nodes it touches on both grids. The first
//! pass only records which (row, column) pairs are touched and freezes the sparsity pattern, the
//! second accumulates the blocks. Both passes are parallel over rows.

use super::block_matrix::{Block, BlockMatrix};
use crate::active::Active;
use crate::math::*;
use crate::mesh::{Derivatives, ShapeFunction};
use rayon::prelude::*;
use smallvec::SmallVec;

/// Shape functions of the active nodes touching a sample. Node indices are local.
#[derive(Debug, Clone, Default)]
pub struct NodeWeights {
    pub nodes: NodeList,
    pub coeffs: SmallVec<[T; 8]>,
    pub grads: Derivatives,
}

impl NodeWeights {
    /// Evaluates `shape` at `x`, dropping the nodes that are not active.
    pub fn at(shape: &dyn ShapeFunction, active: &Active, x: &TV) -> Self {
        let loc = shape.locate(x);
        let itp = shape.interpolate(&loc);
        let grads = shape.derivatives(&loc);

        let mut out = NodeWeights::default();
        for ((&n, &c), g) in itp.nodes.iter().zip(&itp.coeffs).zip(&grads) {
            if let Some(local) = active.local(n) {
                out.nodes.push(local);
                out.coeffs.push(c);
                out.grads.push(*g);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub position: TV,
    pub weight: T,
    pub primal: NodeWeights,
    pub dual: NodeWeights,
}

impl Sample {
    pub fn new(
        position: TV,
        weight: T,
        primal: (&dyn ShapeFunction, &Active),
        dual: (&dyn ShapeFunction, &Active),
    ) -> Self {
        Sample {
            position,
            weight,
            primal: NodeWeights::at(primal.0, primal.1, &position),
            dual: NodeWeights::at(dual.0, dual.1, &position),
        }
    }

    pub fn nodes(&self, space: Space) -> &NodeWeights {
        match space {
            Space::Primal => &self.primal,
            Space::Dual => &self.dual,
        }
    }
}

/// Which grid a row or column index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Primal,
    Dual,
}

/// Assembles `sum_s block(s, a, b)` into the block at (row node `a` of `s`, column node `b`
/// of `s`), for every sample `s`.
///
/// `block` receives the sample index and the positions of the nodes in the sample's
/// [`NodeWeights`]. When `diagonal` is set every diagonal block is present in the pattern,
/// whether or not a sample touches it.
pub fn assemble<const R: usize, const C: usize, F>(
    rows: Space,
    cols: Space,
    nrows: usize,
    ncols: usize,
    samples: &[Sample],
    diagonal: bool,
    block: F,
) -> BlockMatrix<R, C>
where
    F: Fn(usize, usize, usize) -> Block<R, C> + Sync,
{
    // Row incidence: (sample, slot) pairs per row, by counting sort.
    let mut offsets = vec![0usize; nrows + 1];
    for s in samples {
        for &r in &s.nodes(rows).nodes {
            offsets[r + 1] += 1;
        }
    }
    for r in 0..nrows {
        offsets[r + 1] += offsets[r];
    }
    let mut next = offsets.clone();
    let mut incidence = vec![(0usize, 0usize); offsets[nrows]];
    for (k, s) in samples.iter().enumerate() {
        for (a, &r) in s.nodes(rows).nodes.iter().enumerate() {
            incidence[next[r]] = (k, a);
            next[r] += 1;
        }
    }
    let incident = |r: usize| &incidence[offsets[r]..offsets[r + 1]];

    let pattern: Vec<Vec<usize>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let mut row: Vec<usize> = incident(r)
                .iter()
                .flat_map(|&(k, _)| samples[k].nodes(cols).nodes.iter().copied())
                .collect();
            if diagonal && r < ncols {
                row.push(r);
            }
            row.sort_unstable();
            row.dedup();
            row
        })
        .collect();

    let mut matrix = BlockMatrix::from_rows(ncols, &pattern);
    matrix.fill_rows(|r, row_cols, vals| {
        for &(k, a) in incident(r) {
            for (b, c) in samples[k].nodes(cols).nodes.iter().enumerate() {
                let pos = row_cols
                    .binary_search(c)
                    .expect("Column recorded in the index pass");
                vals[pos] += block(k, a, b);
            }
        }
    });
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Grid, LinearShape};

    #[test]
    fn mass_matrix_rows_sum_to_lumped_mass() {
        let shape = LinearShape::new(Grid::new(UV::new(2, 2, 2), TV::zeros()..TV::from_element(1.)));
        let cells: Vec<usize> = (0..8).collect();
        let active = Active::compute(&shape, &cells);

        let samples: Vec<Sample> = (0..8)
            .flat_map(|c| shape.quadrature_points(c))
            .map(|(x, w)| Sample::new(x, w, (&shape, &active), (&shape, &active)))
            .collect();

        let mass = assemble::<1, 1, _>(
            Space::Primal,
            Space::Primal,
            active.count(),
            active.count(),
            &samples,
            true,
            |k, a, b| {
                let s = &samples[k];
                Block::from_element(s.weight * s.primal.coeffs[a] * s.primal.coeffs[b])
            },
        );

        let lumped = shape.lumped_mass();
        for r in 0..mass.nrows() {
            let (_, vals) = mass.row(r);
            let sum: T = vals.iter().map(|b| b[(0, 0)]).sum();
            assert!((sum - lumped[active.rev_indices[r]]).abs() < 1e-12);
        }
        let dense = mass.to_dense();
        assert!((dense.transpose() - &dense).norm() < 1e-14);
    }

    #[test]
    fn inactive_nodes_are_dropped() {
        let shape = LinearShape::new(Grid::new(UV::new(2, 1, 1), TV::zeros()..TV::new(2., 1., 1.)));
        let active = Active::compute(&shape, &[0]);
        let w = NodeWeights::at(&shape, &active, &TV::new(1.5, 0.5, 0.5));
        // only the shared face of the two cells is active
        assert_eq!(w.len(), 4);
        let sum: T = w.coeffs.iter().sum();
        assert!((sum - 0.5).abs() < 1e-12);
    }
}
