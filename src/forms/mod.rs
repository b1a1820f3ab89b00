//! Sparse block operators of one step, assembled from the particles over the active nodes.

mod assembler;
mod block_matrix;

pub use assembler::{assemble, NodeWeights, Sample, Space};
pub use block_matrix::{Block, BlockMatrix, BlockVec};

use crate::active::Active;
use crate::linear::KrylovSystem;
use crate::math::*;
use crate::mesh::{BoundaryMapper, ShapeFunction};
use crate::particles::{DualIntegrals, Particles, PrimalIntegrals, TransferScheme};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Floor of the lumped mass of an active node.
const MASS_EPS: T = 1e-10;
const ORIENTATION_EPS: T = 1e-6;

/// Material parameters entering the operators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialParams {
    pub viscosity: T,
    /// Static friction coefficient.
    pub mu: T,
    pub mu_dynamic: T,
    /// Inertial number at which friction is halfway to `mu_dynamic`.
    pub i0: T,
    pub cohesion: T,
    /// Volume fraction above which cohesion starts acting.
    pub cohesion_threshold: T,
    /// Exponent of the fabric anisotropy, zero for isotropic friction.
    pub anisotropy: T,
}

impl Default for MaterialParams {
    fn default() -> Self {
        MaterialParams {
            viscosity: 0.,
            mu: 0.5,
            mu_dynamic: 0.5,
            i0: 0.3,
            cohesion: 0.,
            cohesion_threshold: 0.,
            anisotropy: 0.,
        }
    }
}

/// Both discretizations with their active nodes.
#[derive(Clone, Copy)]
pub struct Spaces<'a> {
    pub primal: &'a dyn ShapeFunction,
    pub dual: &'a dyn ShapeFunction,
    pub active_primal: &'a Active,
    pub active_dual: &'a Active,
}

impl<'a> Spaces<'a> {
    pub fn sample(&self, x: TV, weight: T) -> Sample {
        Sample::new(
            x,
            weight,
            (self.primal, self.active_primal),
            (self.dual, self.active_dual),
        )
    }
}

/// Operators of one step. Primal quantities are indexed by active primal node, dual ones by
/// active dual node.
#[derive(Debug, Clone)]
pub struct StepForms {
    /// Lumped mass (unit density).
    pub mass: Vec<T>,
    pub inv_mass: Vec<T>,
    pub inv_sqrt_mass: Vec<T>,
    /// `M / dt + viscosity * sum_p V_p B_pᵀ B_p`
    pub a: BlockMatrix<3, 3>,
    /// `momentum / dt + M g`
    pub rhs: Vec<TV>,
    /// Strain rate: `sum_p V_p N_i sym(u ∇N_jᵀ)`
    pub b: BlockMatrix<6, 3>,
    /// Spin: `sum_p V_p N_i axial(skew(u ∇N_jᵀ))`
    pub j: BlockMatrix<3, 3>,
    /// Volume change per displacement: `sum_p V_p ∇N_iᵀ N_j`
    pub c: BlockMatrix<1, 3>,
    /// Particle volume at each dual node.
    pub volume: Vec<T>,
    /// Integral of each dual shape function.
    pub lumped: Vec<T>,
    /// `volume / lumped`
    pub fraction: Vec<T>,
    pub velocity_proj: Vec<Mat>,
    pub stress_proj: Vec<Mat6>,
    /// Change of basis from isotropic to fabric-aligned stresses.
    pub anisotropy: Vec<Mat6>,
    pub mu: Vec<T>,
    pub cohesion: Vec<T>,
}

impl StepForms {
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        spaces: &Spaces,
        particles: &Particles,
        primal_integrals: &PrimalIntegrals,
        dual_integrals: &DualIntegrals,
        mapper: &BoundaryMapper,
        scheme: TransferScheme,
        params: &MaterialParams,
        dt: T,
        gravity: &TV,
    ) -> Self {
        let active_primal = spaces.active_primal;
        let active_dual = spaces.active_dual;
        let np = active_primal.count();
        let nd = active_dual.count();

        let samples: Vec<Sample> = (0..particles.count())
            .into_par_iter()
            .flat_map_iter(|p| particles.samples(p, scheme).into_iter())
            .map(|(x, w)| spaces.sample(x, w))
            .collect();

        let mass: Vec<T> = active_primal
            .field2var(&primal_integrals.volume)
            .into_iter()
            .map(|m| m.max(MASS_EPS))
            .collect();
        let inv_mass = mass.iter().map(|m| 1. / m).collect();
        let inv_sqrt_mass = mass.iter().map(|m| 1. / m.sqrt()).collect();
        let rhs = active_primal
            .field2var(&primal_integrals.momentum)
            .par_iter()
            .zip(&mass)
            .map(|(p, &m)| p / dt + gravity * m)
            .collect();

        let viscosity = params.viscosity;
        let mut a = assemble::<3, 3, _>(
            Space::Primal,
            Space::Primal,
            np,
            np,
            &samples,
            true,
            |k, x, y| {
                let s = &samples[k];
                sym_block(&s.primal.grads[x]).transpose()
                    * sym_block(&s.primal.grads[y])
                    * (viscosity * s.weight)
            },
        );
        a.fill_rows(|i, cols, vals| {
            let pos = cols
                .binary_search(&i)
                .expect("Diagonal block forced into the pattern");
            vals[pos] += Mat::identity() * (mass[i] / dt);
        });

        let b = assemble::<6, 3, _>(Space::Dual, Space::Primal, nd, np, &samples, false, |k, i, j| {
            let s = &samples[k];
            sym_block(&s.primal.grads[j]) * (s.weight * s.dual.coeffs[i])
        });
        let j = assemble::<3, 3, _>(Space::Dual, Space::Primal, nd, np, &samples, false, |k, i, j| {
            let s = &samples[k];
            skew_block(&s.primal.grads[j]) * (s.weight * s.dual.coeffs[i])
        });
        let c = assemble::<1, 3, _>(Space::Dual, Space::Primal, nd, np, &samples, false, |k, i, j| {
            let s = &samples[k];
            s.dual.grads[i].transpose() * (s.weight * s.primal.coeffs[j])
        });

        let volume = active_dual.field2var(&dual_integrals.volume);
        let lumped = active_dual.field2var(&spaces.dual.lumped_mass());
        let fraction: Vec<T> = volume
            .iter()
            .zip(&lumped)
            .map(|(&v, &l)| if l > 0. { v / l } else { 0. })
            .collect();

        let velocity_proj = active_primal
            .rev_indices
            .par_iter()
            .map(|&n| spaces.primal.boundary_info(n, mapper).velocity_projector())
            .collect();
        let stress_proj = active_dual
            .rev_indices
            .par_iter()
            .map(|&n| spaces.dual.boundary_info(n, mapper).stress_projector())
            .collect();
        let anisotropy = active_dual
            .rev_indices
            .par_iter()
            .map(|&n| anisotropy_transform(&dual_integrals.orientation[n], params.anisotropy))
            .collect();

        let mu = active_dual
            .rev_indices
            .par_iter()
            .map(|&n| friction_coefficient(params, dual_integrals.inertia[n]))
            .collect();
        let cohesion = active_dual
            .rev_indices
            .par_iter()
            .zip(&fraction)
            .map(|(&n, &phi)| {
                params.cohesion
                    * dual_integrals.cohesion[n]
                    * smoothstep(params.cohesion_threshold, 1., phi)
            })
            .collect();

        StepForms {
            mass,
            inv_mass,
            inv_sqrt_mass,
            a,
            rhs,
            b,
            j,
            c,
            volume,
            lumped,
            fraction,
            velocity_proj,
            stress_proj,
            anisotropy,
            mu,
            cohesion,
        }
    }

    pub fn project(&self, u: &mut [TV]) {
        u.par_iter_mut()
            .zip(&self.velocity_proj)
            .for_each(|(u, p)| *u = p * *u);
    }

    /// Velocity change per unit impulse at each active primal node, `F Fᵀ` with
    /// `F = sqrt(dt) P M^-1/2`. Symmetric positive semi-definite by construction.
    pub fn velocity_compliance(&self, dt: T) -> Vec<Mat> {
        let root_dt = dt.sqrt();
        self.velocity_proj
            .par_iter()
            .zip(&self.inv_sqrt_mass)
            .map(|(p, &s)| {
                let f = p * (root_dt * s);
                f * f.transpose()
            })
            .collect()
    }

    /// `C P M⁻¹ Cᵀ`, the operator of the volume-exclusion problem.
    pub fn volume_operator(&self) -> CsrMatrix<T> {
        let nd = self.c.nrows();
        let ct = self.c.transpose();
        let rows: Vec<Vec<(usize, T)>> = (0..nd)
            .into_par_iter()
            .map(|i| {
                let (cols, blocks) = self.c.row(i);
                let mut row = Vec::new();
                for (&j, cij) in cols.iter().zip(blocks) {
                    let left = cij * self.velocity_proj[j] * self.inv_mass[j];
                    let (others, tblocks) = ct.row(j);
                    for (&k, ckj) in others.iter().zip(tblocks) {
                        row.push((k, (left * ckj)[(0, 0)]));
                    }
                }
                row
            })
            .collect();

        let mut coo = CooMatrix::new(nd, nd);
        for (i, row) in rows.into_iter().enumerate() {
            for (k, v) in row {
                coo.push(i, k, v);
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Displacement `-P M⁻¹ Cᵀ p` pushing material away from the nodes with pressure `p`.
    pub fn volume_displacement(&self, p: &[T]) -> Vec<TV> {
        let p: Vec<BlockVec<1>> = p.iter().map(|&x| BlockVec::<1>::new(x)).collect();
        let f = self.c.transpose().multiply(&p);
        f.par_iter()
            .zip(&self.velocity_proj)
            .zip(&self.inv_mass)
            .map(|((f, proj), &m)| -(proj * f) * m)
            .collect()
    }

    /// Mean strain rate at each dual node.
    pub fn strain_rate(&self, u: &[TV]) -> Vec<Vec6> {
        let d = self.b.multiply(u);
        d.par_iter()
            .zip(&self.volume)
            .map(|(d, &v)| if v > 0. { d / v } else { Vec6::zeros() })
            .collect()
    }

    /// Mean spin (axial vector) at each dual node.
    pub fn spin(&self, u: &[TV]) -> Vec<TV> {
        let w = self.j.multiply(u);
        w.par_iter()
            .zip(&self.volume)
            .map(|(w, &v)| if v > 0. { w / v } else { TV::zeros() })
            .collect()
    }
}

/// Friction coefficient at inertial number `inertia`.
pub fn friction_coefficient(params: &MaterialParams, inertia: T) -> T {
    let denom = params.i0 + inertia;
    if denom > 0. {
        params.mu + (params.mu_dynamic - params.mu) * inertia / denom
    } else {
        params.mu
    }
}

/// Stress-space congruence by `orientation^(strength / 2)`, normalized so that the isotropic
/// orientation `I / 3` gives the identity.
pub fn anisotropy_transform(orientation: &Mat, strength: T) -> Mat6 {
    if strength == 0. || orientation.trace() < ORIENTATION_EPS {
        return Mat6::identity();
    }
    let eigen = orientation.symmetric_eigen();
    let scale = eigen
        .eigenvalues
        .map(|l| (DIM as T * l).max(ORIENTATION_EPS).powf(0.5 * strength));
    let f = eigen.eigenvectors * Mat::from_diagonal(&scale) * eigen.eigenvectors.transpose();
    congruence_matrix(&f)
}

/// `P A P + (I - P)`, with a block Jacobi preconditioner.
pub struct ProjectedSystem<'a> {
    a: &'a BlockMatrix<3, 3>,
    proj: &'a [Mat],
    jacobi: Vec<Mat>,
}

impl<'a> ProjectedSystem<'a> {
    pub fn new(forms: &'a StepForms) -> Self {
        let jacobi = forms
            .a
            .diagonal()
            .into_par_iter()
            .zip(&forms.velocity_proj)
            .map(|(d, p)| {
                (p * d * p + Mat::identity() - p)
                    .try_inverse()
                    .unwrap_or_else(Mat::identity)
            })
            .collect();
        ProjectedSystem {
            a: &forms.a,
            proj: &forms.velocity_proj,
            jacobi,
        }
    }
}

impl<'a> KrylovSystem for ProjectedSystem<'a> {
    fn apply(&self, x: &[TV]) -> Vec<TV> {
        let px: Vec<TV> = x.par_iter().zip(self.proj).map(|(x, p)| p * x).collect();
        let apx = self.a.multiply(&px);
        apx.par_iter()
            .zip(x)
            .zip(self.proj)
            .map(|((a, x), p)| p * a + x - p * x)
            .collect()
    }

    fn precondition(&self, r: &[TV]) -> Vec<TV> {
        r.par_iter().zip(&self.jacobi).map(|(r, d)| d * r).collect()
    }
}
