use crate::math::*;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::prelude::*;

pub type Block<const R: usize, const C: usize> = na::SMatrix<T, R, C>;
pub type BlockVec<const N: usize> = na::SVector<T, N>;

/// Compressed sparse row matrix of fixed-size dense blocks.
#[derive(Debug, Clone)]
pub struct BlockMatrix<const R: usize, const C: usize> {
    pattern: SparsityPattern,
    values: Vec<Block<R, C>>,
}

impl<const R: usize, const C: usize> BlockMatrix<R, C> {
    /// A matrix with zero blocks at the positions of `pattern`.
    pub fn from_pattern(pattern: SparsityPattern) -> Self {
        let values = vec![Block::zeros(); pattern.nnz()];
        BlockMatrix { pattern, values }
    }

    /// Builds the pattern from sorted, deduplicated column lists, one per row.
    pub fn from_rows(ncols: usize, rows: &[Vec<usize>]) -> Self {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        let mut indices = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for row in rows {
            indices.extend_from_slice(row);
            offsets.push(indices.len());
        }
        let pattern =
            SparsityPattern::try_from_offsets_and_indices(rows.len(), ncols, offsets, indices)
                .expect("Block rows must be sorted and within bounds");
        Self::from_pattern(pattern)
    }

    /// A square block-diagonal matrix.
    pub fn from_diagonal(blocks: Vec<Block<R, C>>) -> Self {
        let n = blocks.len();
        let pattern = SparsityPattern::try_from_offsets_and_indices(
            n,
            n,
            (0..=n).collect(),
            (0..n).collect(),
        )
        .expect("Diagonal pattern is valid");
        BlockMatrix {
            pattern,
            values: blocks,
        }
    }

    pub fn nrows(&self) -> usize {
        self.pattern.major_dim()
    }

    pub fn ncols(&self) -> usize {
        self.pattern.minor_dim()
    }

    pub fn nnz(&self) -> usize {
        self.pattern.nnz()
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    /// Column indices and blocks of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[Block<R, C>]) {
        let offsets = self.pattern.major_offsets();
        let range = offsets[i]..offsets[i + 1];
        (self.pattern.lane(i), &self.values[range])
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&Block<R, C>> {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).ok().map(|k| &vals[k])
    }

    /// Calls `f(row, columns, blocks)` on every row in parallel. Each row is handed to exactly
    /// one task.
    pub fn fill_rows<F>(&mut self, f: F)
    where
        F: Fn(usize, &[usize], &mut [Block<R, C>]) + Sync,
    {
        let pattern = &self.pattern;
        let offsets = pattern.major_offsets();

        let mut rest: &mut [Block<R, C>] = &mut self.values;
        let mut rows = Vec::with_capacity(pattern.major_dim());
        for i in 0..pattern.major_dim() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(offsets[i + 1] - offsets[i]);
            rows.push(head);
            rest = tail;
        }

        rows.into_par_iter()
            .enumerate()
            .for_each(|(i, vals)| f(i, pattern.lane(i), vals));
    }

    /// `self * x`
    pub fn multiply(&self, x: &[BlockVec<C>]) -> Vec<BlockVec<R>> {
        debug_assert_eq!(x.len(), self.ncols());
        (0..self.nrows())
            .into_par_iter()
            .map(|i| self.row_dot(i, x))
            .collect()
    }

    /// `y += self * x`
    pub fn multiply_add(&self, x: &[BlockVec<C>], y: &mut [BlockVec<R>]) {
        y.par_iter_mut()
            .enumerate()
            .for_each(|(i, yi)| *yi += self.row_dot(i, x));
    }

    /// Product of row `i` with `x`.
    pub fn row_dot(&self, i: usize, x: &[BlockVec<C>]) -> BlockVec<R> {
        let (cols, vals) = self.row(i);
        cols.iter()
            .zip(vals)
            .fold(BlockVec::zeros(), |acc, (&j, b)| acc + b * x[j])
    }

    pub fn transpose(&self) -> BlockMatrix<C, R> {
        let nrows = self.nrows();
        let ncols = self.ncols();

        let mut offsets = vec![0; ncols + 1];
        for &j in self.pattern.minor_indices() {
            offsets[j + 1] += 1;
        }
        for j in 0..ncols {
            offsets[j + 1] += offsets[j];
        }

        let mut next = offsets.clone();
        let mut indices = vec![0; self.nnz()];
        let mut values = vec![Block::<C, R>::zeros(); self.nnz()];
        for i in 0..nrows {
            let (cols, vals) = self.row(i);
            for (&j, b) in cols.iter().zip(vals) {
                indices[next[j]] = i;
                values[next[j]] = b.transpose();
                next[j] += 1;
            }
        }

        let pattern = SparsityPattern::try_from_offsets_and_indices(ncols, nrows, offsets, indices)
            .expect("Transposed pattern is sorted by construction");
        BlockMatrix { pattern, values }
    }

    /// Diagonal blocks of a square matrix, zero where absent.
    pub fn diagonal(&self) -> Vec<Block<R, C>> {
        (0..self.nrows())
            .map(|i| self.get(i, i).copied().unwrap_or_else(Block::zeros))
            .collect()
    }

    /// Left-multiplies each row by `left[i]` and right-multiplies each column by `right[j]`.
    pub fn scale_blocks(&mut self, left: &[Block<R, R>], right: &[Block<C, C>]) {
        self.fill_rows(|i, cols, vals| {
            for (&j, b) in cols.iter().zip(vals.iter_mut()) {
                *b = left[i] * *b * right[j];
            }
        });
    }

    pub fn to_dense(&self) -> na::DMatrix<T> {
        let mut out = na::DMatrix::zeros(self.nrows() * R, self.ncols() * C);
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for (&j, b) in cols.iter().zip(vals) {
                out.fixed_view_mut::<R, C>(i * R, j * C).copy_from(b);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random(rng: &mut StdRng, nrows: usize, ncols: usize) -> BlockMatrix<2, 3> {
        let rows: Vec<Vec<usize>> = (0..nrows)
            .map(|_| {
                let mut cols: Vec<usize> = (0..3).map(|_| rng.gen_range(0..ncols)).collect();
                cols.sort_unstable();
                cols.dedup();
                cols
            })
            .collect();
        let mut m = BlockMatrix::<2, 3>::from_rows(ncols, &rows);
        let seeds: Vec<u64> = (0..nrows).map(|_| rng.gen()).collect();
        m.fill_rows(|i, _, vals| {
            let mut rng = StdRng::seed_from_u64(seeds[i]);
            for b in vals {
                *b = Block::from_fn(|_, _| rng.gen_range(-1.0..1.0));
            }
        });
        m
    }

    #[test]
    fn multiply_matches_dense() {
        let mut rng = StdRng::seed_from_u64(3);
        let m = random(&mut rng, 7, 5);
        let x: Vec<BlockVec<3>> = (0..5)
            .map(|_| BlockVec::from_fn(|_, _| rng.gen_range(-1.0..1.0)))
            .collect();
        let y = m.multiply(&x);

        let flat_x = na::DVector::from_iterator(15, x.iter().flat_map(|v| v.iter().copied()));
        let dense = m.to_dense() * flat_x;
        for i in 0..7 {
            for r in 0..2 {
                assert!((y[i][r] - dense[2 * i + r]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn transpose_matches_dense() {
        let mut rng = StdRng::seed_from_u64(4);
        let m = random(&mut rng, 6, 9);
        let t = m.transpose();
        assert_eq!(t.nrows(), 9);
        assert_eq!(t.ncols(), 6);
        assert!((t.to_dense() - m.to_dense().transpose()).norm() < 1e-14);
        assert!((t.transpose().to_dense() - m.to_dense()).norm() < 1e-14);
    }

    #[test]
    fn lookup_and_diagonal() {
        let m = BlockMatrix::<3, 3>::from_diagonal(vec![Mat::identity() * 2.; 4]);
        assert_eq!(m.get(2, 2), Some(&(Mat::identity() * 2.)));
        assert_eq!(m.get(2, 1), None);
        assert_eq!(m.diagonal().len(), 4);
    }
}
