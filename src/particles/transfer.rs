//! Particle to grid integrals, and the grid to particle update used by the driver.

use super::{generate::normalize_trace, Particles};
use crate::math::*;
use crate::mesh::ShapeFunction;
use crate::phase::Phase;
use crate::util::RangeExt;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::Range;

/// How particle velocities are spread onto the primal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferScheme {
    /// Samples the corners of the particle's box, carrying the affine velocity at each corner.
    Trapezoidal,
    /// Samples the particle center, with the APIC correction `A (x_j - x_p)`.
    Affine,
}

impl Default for TransferScheme {
    fn default() -> Self {
        TransferScheme::Affine
    }
}

/// Primal-grid integrals of the particles.
#[derive(Debug, Clone, Default)]
pub struct PrimalIntegrals {
    /// `sum_p V_p N_j(x_p)`
    pub volume: Vec<T>,
    /// `sum_p V_p N_j(x_p) v_p`
    pub momentum: Vec<TV>,
    /// Sorted cells containing at least one particle sample.
    pub active_cells: Vec<usize>,
}

/// Dual-grid integrals. Everything but `volume` is a volume-weighted average, zero where no
/// particle contributes.
#[derive(Debug, Clone, Default)]
pub struct DualIntegrals {
    pub volume: Vec<T>,
    pub inertia: Vec<T>,
    pub cohesion: Vec<T>,
    pub orientation: Vec<Mat>,
}

/// Sample points of a particle.
type Samples = SmallVec<[(TV, T); 8]>;

const VOLUME_EPS: T = 1e-12;

impl Particles {
    /// Corners of the particle's box along the principal axes of its frame, each weighted by an
    /// eighth of the volume.
    fn corner_samples(&self, p: usize) -> Samples {
        let eigen = self.frame[p].symmetric_eigen();
        let half: SmallVec<[TV; 3]> = (0..DIM)
            .map(|k| eigen.eigenvectors.column(k) * (3. * eigen.eigenvalues[k].max(0.)).sqrt())
            .collect();
        let w = self.volume[p] / (1 << DIM) as T;
        (0..1 << DIM)
            .map(|c| {
                let x = (0..DIM).fold(self.position[p], |x, k| {
                    if (c >> k) & 1 == 1 {
                        x + half[k]
                    } else {
                        x - half[k]
                    }
                });
                (x, w)
            })
            .collect()
    }

    /// Quadrature points of particle `p` under `scheme`.
    pub(crate) fn samples(&self, p: usize, scheme: TransferScheme) -> Samples {
        match scheme {
            TransferScheme::Trapezoidal => self.corner_samples(p),
            TransferScheme::Affine => std::iter::once((self.position[p], self.volume[p])).collect(),
        }
    }

    /// Scatters volume and momentum onto the primal nodes and lists the touched cells.
    pub fn integrate_primal(
        &self,
        shape: &dyn ShapeFunction,
        scheme: TransferScheme,
    ) -> PrimalIntegrals {
        let n = shape.node_count();
        let empty = || PrimalIntegrals {
            volume: vec![0.; n],
            momentum: vec![TV::zeros(); n],
            active_cells: Vec::new(),
        };

        let mut out = (0..self.count())
            .into_par_iter()
            .fold(empty, |mut acc, p| {
                if scheme == TransferScheme::Trapezoidal {
                    acc.active_cells.push(shape.locate(&self.position[p]).cell);
                }
                for (x, w) in self.samples(p, scheme) {
                    let loc = shape.locate(&x);
                    let itp = shape.interpolate(&loc);
                    acc.active_cells.push(loc.cell);

                    let v = self.velocity[p] + self.affine[p] * (x - self.position[p]);
                    for (&j, &c) in itp.nodes.iter().zip(&itp.coeffs) {
                        let u = match scheme {
                            TransferScheme::Trapezoidal => v,
                            TransferScheme::Affine => {
                                v + self.affine[p] * (shape.node_position(j) - x)
                            }
                        };
                        acc.volume[j] += w * c;
                        acc.momentum[j] += w * c * u;
                    }
                }
                acc
            })
            .reduce(empty, |mut a, b| {
                a.volume.iter_mut().zip(&b.volume).for_each(|(x, y)| *x += y);
                a.momentum.iter_mut().zip(&b.momentum).for_each(|(x, y)| *x += y);
                a.active_cells.extend(b.active_cells);
                a
            });

        out.active_cells.par_sort_unstable();
        out.active_cells.dedup();
        out
    }

    /// Scatters volume, inertial number, cohesion and orientation onto the dual nodes.
    pub fn integrate_dual(&self, shape: &dyn ShapeFunction) -> DualIntegrals {
        let n = shape.node_count();
        let empty = || DualIntegrals {
            volume: vec![0.; n],
            inertia: vec![0.; n],
            cohesion: vec![0.; n],
            orientation: vec![Mat::zeros(); n],
        };

        let mut out = (0..self.count())
            .into_par_iter()
            .fold(empty, |mut acc, p| {
                let itp = shape.interpolate_at(&self.position[p]);
                for (&i, &c) in itp.nodes.iter().zip(&itp.coeffs) {
                    let w = self.volume[p] * c;
                    acc.volume[i] += w;
                    acc.inertia[i] += w * self.inertia[p];
                    acc.cohesion[i] += w * self.cohesion[p];
                    acc.orientation[i] += w * self.orientation[p];
                }
                acc
            })
            .reduce(empty, |mut a, b| {
                a.volume.iter_mut().zip(&b.volume).for_each(|(x, y)| *x += y);
                a.inertia.iter_mut().zip(&b.inertia).for_each(|(x, y)| *x += y);
                a.cohesion.iter_mut().zip(&b.cohesion).for_each(|(x, y)| *x += y);
                a.orientation
                    .iter_mut()
                    .zip(&b.orientation)
                    .for_each(|(x, y)| *x += y);
                a
            });

        let DualIntegrals {
            volume,
            inertia,
            cohesion,
            orientation,
        } = &mut out;
        volume
            .par_iter()
            .zip(inertia.par_iter_mut())
            .zip(cohesion.par_iter_mut())
            .zip(orientation.par_iter_mut())
            .for_each(|(((&v, i), c), o)| {
                if v > VOLUME_EPS {
                    *i /= v;
                    *c /= v;
                    *o /= v;
                }
            });
        out
    }

    /// Moves the particles through the grid velocity field of `phase`.
    ///
    /// Velocities and affine gradients are gathered from the primal grid, frames and
    /// orientations are advected by the velocity gradient, the volume-correction displacement is
    /// applied, and the inertial number is refreshed from the dual strain rate and stress.
    pub fn advect(
        &mut self,
        primal: &dyn ShapeFunction,
        dual: &dyn ShapeFunction,
        phase: &Phase,
        dt: T,
        domain: &Range<TV>,
        grain_diameter: T,
    ) {
        let updated: Vec<_> = (0..self.count())
            .into_par_iter()
            .map(|p| {
                let x = self.position[p];
                let loc = primal.locate(&x);
                let itp = primal.interpolate(&loc);
                let grads = primal.derivatives(&loc);

                let mut v = TV::zeros();
                let mut grad = Mat::zeros();
                let mut shift = TV::zeros();
                for ((&j, &c), g) in itp.nodes.iter().zip(&itp.coeffs).zip(&grads) {
                    v += c * phase.velocity[j];
                    grad += phase.velocity[j] * g.transpose();
                    shift += c * phase.geo_proj[j];
                }

                let step = Mat::identity() + dt * grad;
                let frame = step * self.frame[p] * step.transpose();
                let orientation = normalize_trace(&(step * self.orientation[p] * step.transpose()));
                let position = domain.clamp_point(&(x + dt * v + shift));

                let ditp = dual.interpolate_at(&x);
                let mut d = Vec6::zeros();
                let mut s = Vec6::zeros();
                for (&i, &c) in ditp.nodes.iter().zip(&ditp.coeffs) {
                    d += c * phase.sym_grad[i];
                    s += c * phase.stresses[i];
                }
                let pressure = (s[0] / DIM as T).max(VOLUME_EPS);
                let inertia = tangential_norm(&d) * grain_diameter / pressure.sqrt();

                (position, v, grad, frame, orientation, inertia)
            })
            .collect();

        for (p, (x, v, grad, frame, orientation, inertia)) in updated.into_iter().enumerate() {
            self.position[p] = x;
            self.velocity[p] = v;
            self.affine[p] = grad;
            self.frame[p] = frame;
            self.orientation[p] = orientation;
            self.inertia[p] = inertia;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Grid, LinearShape};
    use crate::particles::Particle;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn shape() -> LinearShape {
        LinearShape::new(Grid::new(UV::new(4, 4, 4), TV::zeros()..TV::from_element(1.)))
    }

    fn random_particles(n: usize) -> Particles {
        let mut rng = StdRng::seed_from_u64(7);
        let mut particles = Particles::with_capacity(n);
        for _ in 0..n {
            let x: TV = rng.gen::<[T; 3]>().into();
            let mut p = Particle::new(
                rng.gen_range(0.001..0.01),
                x * 0.8 + TV::from_element(0.1),
                Mat::identity() * 1e-4,
            );
            p.velocity = rng.gen::<[T; 3]>().into();
            p.inertia = rng.gen();
            particles.push(p);
        }
        particles
    }

    #[test]
    fn primal_integrals_conserve_volume_and_momentum() {
        let particles = random_particles(200);
        let shape = shape();
        for scheme in [TransferScheme::Affine, TransferScheme::Trapezoidal].iter() {
            let integrals = particles.integrate_primal(&shape, *scheme);
            let volume: T = integrals.volume.iter().sum();
            assert!((volume - particles.total_volume()).abs() < 1e-12);

            // affine terms integrate to zero against a partition of unity reproducing x
            let momentum: TV = integrals.momentum.iter().sum();
            let expected: TV = particles
                .volume
                .iter()
                .zip(&particles.velocity)
                .map(|(&v, u)| v * u)
                .sum();
            assert!((momentum - expected).norm() < 1e-10, "{:?}", scheme);

            assert!(integrals.active_cells.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn dual_integrals_are_averages() {
        let mut particles = random_particles(50);
        for i in particles.inertia.iter_mut() {
            *i = 0.3;
        }
        let integrals = particles.integrate_dual(&shape());
        for (&v, &i) in integrals.volume.iter().zip(&integrals.inertia) {
            if v > 1e-9 {
                assert!((i - 0.3).abs() < 1e-9);
            } else {
                assert_eq!(i, 0.);
            }
        }
        for (&v, o) in integrals.volume.iter().zip(&integrals.orientation) {
            if v > 1e-9 {
                assert!((o.trace() - 1.).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn uniform_grid_velocity_is_recovered() {
        let shape = shape();
        let mut particles = random_particles(20);
        let mut phase = Phase::new(shape.node_count(), shape.node_count());
        let u = TV::new(0.1, -0.2, 0.3);
        phase.velocity.iter_mut().for_each(|v| *v = u);

        let before = particles.position.clone();
        let domain = TV::zeros()..TV::from_element(1.);
        particles.advect(&shape, &shape, &phase, 0.01, &domain, 1e-3);

        for p in 0..particles.count() {
            assert!((particles.velocity[p] - u).norm() < 1e-12);
            assert!(particles.affine[p].norm() < 1e-10);
            assert!((particles.position[p] - before[p] - 0.01 * u).norm() < 1e-12);
        }
    }
}
