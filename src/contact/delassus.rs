//! The operator `W` mapping contact impulses to relative contact velocities, either assembled
//! or applied as a product of its factors.

use crate::forms::BlockMatrix;
use crate::math::*;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Contacts of one rigid body, a contiguous range of the contact rows.
#[derive(Debug, Clone)]
pub struct BodyContacts {
    pub first: usize,
    /// Body Jacobian times body projection, one block per contact.
    pub coupling: Vec<Mat6>,
    /// `dt * inverse inertia`, zero for kinematic bodies.
    pub mobility: Mat6,
}

impl BodyContacts {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.first..self.first + self.coupling.len()
    }

    /// `mobility * G^T x` over the contacts of this body.
    fn body_velocity(&self, x: &[Vec6]) -> Vec6 {
        let impulse = self
            .coupling
            .iter()
            .zip(&x[self.range()])
            .fold(Vec6::zeros(), |acc, (g, xi)| acc + g.transpose() * xi);
        self.mobility * impulse
    }
}

/// Factors of `W = H D H^T + sum_b G_b M_b G_b^T`.
#[derive(Debug, Clone)]
pub struct ContactOperators {
    /// Contact rows (bulk first, then every body) against active primal velocities.
    pub h: BlockMatrix<6, 3>,
    pub ht: BlockMatrix<3, 6>,
    /// Velocity correction per unit force, per active primal node.
    pub d: Vec<Mat>,
    pub bodies: Vec<BodyContacts>,
    /// Body index of each contact row, if any.
    pub body_of: Vec<Option<usize>>,
}

impl ContactOperators {
    pub fn new(h: BlockMatrix<6, 3>, d: Vec<Mat>, bodies: Vec<BodyContacts>) -> Self {
        let ht = h.transpose();
        let mut body_of = vec![None; h.nrows()];
        for (b, body) in bodies.iter().enumerate() {
            for i in body.range() {
                body_of[i] = Some(b);
            }
        }
        ContactOperators {
            h,
            ht,
            d,
            bodies,
            body_of,
        }
    }

    pub fn n_contacts(&self) -> usize {
        self.h.nrows()
    }

    /// Primal velocity change `D H^T x` caused by impulses `x`.
    pub fn velocity_correction(&self, x: &[Vec6]) -> Vec<TV> {
        let f = self.ht.multiply(x);
        f.par_iter().zip(&self.d).map(|(f, d)| d * f).collect()
    }

    /// Twist change of each body caused by impulses `x` (the body gets the reaction).
    pub fn body_correction(&self, x: &[Vec6]) -> Vec<Vec6> {
        self.bodies.iter().map(|b| -b.body_velocity(x)).collect()
    }
}

/// What the contact solvers need from `W`.
pub trait DelassusOperator: Sync {
    /// Whatever makes [`DelassusOperator::row_product`] cheap, kept in sync with the iterate.
    type Cache: Send;

    fn n_contacts(&self) -> usize;

    fn diagonal_block(&self, i: usize) -> Mat6;

    /// `W x`
    fn apply(&self, x: &[Vec6]) -> Vec<Vec6>;

    fn init_cache(&self, x: &[Vec6]) -> Self::Cache;

    /// `(W x)_i`
    fn row_product(&self, cache: &Self::Cache, x: &[Vec6], i: usize) -> Vec6;

    /// Accounts for `x_i` having changed by `delta`.
    fn update_cache(&self, cache: &mut Self::Cache, i: usize, delta: &Vec6);
}

/// `W` as an explicit block matrix.
pub struct AssembledDelassus {
    pub w: BlockMatrix<6, 6>,
    diagonal: Vec<Mat6>,
}

impl AssembledDelassus {
    pub fn new(ops: &ContactOperators) -> Self {
        let n = ops.n_contacts();
        let rows: Vec<BTreeMap<usize, Mat6>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut row = BTreeMap::new();
                let (cols, blocks) = ops.h.row(i);
                for (&j, hij) in cols.iter().zip(blocks) {
                    let left = hij * ops.d[j];
                    let (tcols, tblocks) = ops.ht.row(j);
                    for (&k, hjk) in tcols.iter().zip(tblocks) {
                        *row.entry(k).or_insert_with(Mat6::zeros) += left * hjk;
                    }
                }
                if let Some(b) = ops.body_of[i] {
                    let body = &ops.bodies[b];
                    let left = body.coupling[i - body.first] * body.mobility;
                    for k in body.range() {
                        *row.entry(k).or_insert_with(Mat6::zeros) +=
                            left * body.coupling[k - body.first].transpose();
                    }
                }
                row
            })
            .collect();

        let pattern: Vec<Vec<usize>> = rows.iter().map(|r| r.keys().copied().collect()).collect();
        let mut w = BlockMatrix::<6, 6>::from_rows(n, &pattern);
        w.fill_rows(|i, _, vals| {
            for (v, b) in vals.iter_mut().zip(rows[i].values()) {
                *v = *b;
            }
        });
        let diagonal = w.diagonal();
        AssembledDelassus { w, diagonal }
    }
}

impl DelassusOperator for AssembledDelassus {
    type Cache = ();

    fn n_contacts(&self) -> usize {
        self.w.nrows()
    }

    fn diagonal_block(&self, i: usize) -> Mat6 {
        self.diagonal[i]
    }

    fn apply(&self, x: &[Vec6]) -> Vec<Vec6> {
        self.w.multiply(x)
    }

    fn init_cache(&self, _x: &[Vec6]) -> Self::Cache {}

    fn row_product(&self, _cache: &Self::Cache, x: &[Vec6], i: usize) -> Vec6 {
        self.w.row_dot(i, x)
    }

    fn update_cache(&self, _cache: &mut Self::Cache, _i: usize, _delta: &Vec6) {}
}

/// `W` applied through its factors, never formed.
pub struct ProductDelassus<'a> {
    ops: &'a ContactOperators,
    diagonal: Vec<Mat6>,
}

/// Primal velocity correction and body twist correction of the current iterate.
pub struct ProductCache {
    velocity: Vec<TV>,
    bodies: Vec<Vec6>,
}

impl<'a> ProductDelassus<'a> {
    pub fn new(ops: &'a ContactOperators) -> Self {
        let diagonal = (0..ops.n_contacts())
            .into_par_iter()
            .map(|i| {
                let (cols, blocks) = ops.h.row(i);
                let mut w = cols
                    .iter()
                    .zip(blocks)
                    .fold(Mat6::zeros(), |acc, (&j, h)| acc + h * ops.d[j] * h.transpose());
                if let Some(b) = ops.body_of[i] {
                    let body = &ops.bodies[b];
                    let g = body.coupling[i - body.first];
                    w += g * body.mobility * g.transpose();
                }
                w
            })
            .collect();
        ProductDelassus { ops, diagonal }
    }
}

impl<'a> DelassusOperator for ProductDelassus<'a> {
    type Cache = ProductCache;

    fn n_contacts(&self) -> usize {
        self.ops.n_contacts()
    }

    fn diagonal_block(&self, i: usize) -> Mat6 {
        self.diagonal[i]
    }

    fn apply(&self, x: &[Vec6]) -> Vec<Vec6> {
        let cache = self.init_cache(x);
        (0..self.n_contacts())
            .into_par_iter()
            .map(|i| self.row_product(&cache, x, i))
            .collect()
    }

    fn init_cache(&self, x: &[Vec6]) -> ProductCache {
        ProductCache {
            velocity: self.ops.velocity_correction(x),
            bodies: self.ops.bodies.iter().map(|b| b.body_velocity(x)).collect(),
        }
    }

    fn row_product(&self, cache: &ProductCache, _x: &[Vec6], i: usize) -> Vec6 {
        let mut y = self.ops.h.row_dot(i, &cache.velocity);
        if let Some(b) = self.ops.body_of[i] {
            let body = &self.ops.bodies[b];
            y += body.coupling[i - body.first] * cache.bodies[b];
        }
        y
    }

    fn update_cache(&self, cache: &mut ProductCache, i: usize, delta: &Vec6) {
        let (cols, blocks) = self.ops.h.row(i);
        for (&j, h) in cols.iter().zip(blocks) {
            cache.velocity[j] += self.ops.d[j] * (h.transpose() * delta);
        }
        if let Some(b) = self.ops.body_of[i] {
            let body = &self.ops.bodies[b];
            cache.bodies[b] += body.mobility * (body.coupling[i - body.first].transpose() * delta);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// A random contact system with `nb` bulk contacts and one dynamic body of `nc` contacts.
    pub(crate) fn random_operators(seed: u64, nb: usize, nc: usize, nodes: usize) -> ContactOperators {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = nb + nc;
        let rows: Vec<Vec<usize>> = (0..n)
            .map(|_| {
                let mut cols: Vec<usize> = (0..4).map(|_| rng.gen_range(0..nodes)).collect();
                cols.sort_unstable();
                cols.dedup();
                cols
            })
            .collect();
        let mut h = BlockMatrix::<6, 3>::from_rows(nodes, &rows);
        let values: Vec<Vec<na::SMatrix<T, 6, 3>>> = rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|_| na::SMatrix::<T, 6, 3>::from_fn(|_, _| rng.gen_range(-1.0..1.0)))
                    .collect()
            })
            .collect();
        h.fill_rows(|i, _, vals| vals.copy_from_slice(&values[i]));

        let d = (0..nodes)
            .map(|_| Mat::identity() * rng.gen_range(0.5..2.0))
            .collect();
        let a = Mat6::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        let body = BodyContacts {
            first: nb,
            coupling: (0..nc)
                .map(|_| Mat6::from_fn(|_, _| rng.gen_range(-1.0..1.0)))
                .collect(),
            mobility: a * a.transpose() * 0.1,
        };
        ContactOperators::new(h, d, vec![body])
    }

    /// Like [`random_operators`], but every contact owns two nodes so that `W` is well
    /// conditioned.
    pub(crate) fn well_conditioned_operators(seed: u64, nb: usize, nc: usize) -> ContactOperators {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = nb + nc;
        let shared = 4;
        let nodes = 2 * n + shared;
        let rows: Vec<Vec<usize>> = (0..n)
            .map(|i| vec![2 * i, 2 * i + 1, 2 * n + rng.gen_range(0..shared)])
            .collect();
        let mut h = BlockMatrix::<6, 3>::from_rows(nodes, &rows);
        let values: Vec<Vec<na::SMatrix<T, 6, 3>>> = (0..n)
            .map(|_| {
                let own = Mat6::identity() + Mat6::from_fn(|_, _| rng.gen_range(-0.2..0.2));
                vec![
                    own.fixed_columns::<3>(0).into_owned(),
                    own.fixed_columns::<3>(3).into_owned(),
                    na::SMatrix::<T, 6, 3>::from_fn(|_, _| rng.gen_range(-0.3..0.3)),
                ]
            })
            .collect();
        h.fill_rows(|i, _, vals| vals.copy_from_slice(&values[i]));

        let d = (0..nodes)
            .map(|_| Mat::identity() * rng.gen_range(0.5..2.0))
            .collect();
        let a = Mat6::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        let body = BodyContacts {
            first: nb,
            coupling: (0..nc)
                .map(|_| Mat6::from_fn(|_, _| rng.gen_range(-0.3..0.3)))
                .collect(),
            mobility: a * a.transpose() * 0.1,
        };
        ContactOperators::new(h, d, vec![body])
    }

    #[test]
    fn product_matches_assembled() {
        let ops = random_operators(11, 7, 3, 6);
        let assembled = AssembledDelassus::new(&ops);
        let product = ProductDelassus::new(&ops);

        let mut rng = StdRng::seed_from_u64(12);
        let mut x: Vec<Vec6> = (0..10)
            .map(|_| Vec6::from_fn(|_, _| rng.gen_range(-1.0..1.0)))
            .collect();
        let wa = assembled.apply(&x);
        let wp = product.apply(&x);
        for i in 0..10 {
            assert!((wa[i] - wp[i]).norm() < 1e-10);
            assert!((assembled.diagonal_block(i) - product.diagonal_block(i)).norm() < 1e-10);
        }

        // incremental updates keep the cache exact
        let mut cache = product.init_cache(&x);
        let delta = Vec6::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        x[8] += delta;
        product.update_cache(&mut cache, 8, &delta);
        let wa = assembled.apply(&x);
        for i in 0..10 {
            assert!((product.row_product(&cache, &x, i) - wa[i]).norm() < 1e-10);
        }

        // W is symmetric
        let dense = assembled.w.to_dense();
        assert!((dense.transpose() - &dense).norm() < 1e-10);
    }
}
