use super::{Particle, Particles};
use crate::math::*;
use crate::mesh::Grid;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

impl Particles {
    /// Seeds particles in every cell of `grid` where `density` is non-zero.
    ///
    /// Each cell is divided into `k^3` sub-cells, with `k^3` the closest cube to
    /// `samples_per_cell`. One particle is placed per sub-cell, at its center when
    /// `align_to_cells` is set, jittered inside it otherwise. Its volume is the sub-cell
    /// volume scaled by the density, and its frame the covariance of a uniform box of the
    /// sub-cell's size. Returns the number of particles added; anything beyond capacity is
    /// dropped.
    pub fn generate<F>(
        &mut self,
        density: F,
        samples_per_cell: usize,
        grid: &Grid,
        align_to_cells: bool,
        orientation: &Mat,
    ) -> usize
    where
        F: Fn(&TV) -> T + Sync,
    {
        let k = ((samples_per_cell.max(1) as T).cbrt().round() as usize).max(1);
        let sub = grid.dx / k as T;
        let sub_volume = sub.product();
        let frame = Mat::from_diagonal(&sub.map(|h| h * h / 12.));
        let orientation = normalize_trace(orientation);

        let sampled: Vec<Vec<Particle>> = (0..grid.cell_count())
            .into_par_iter()
            .map(|c| {
                let cell = grid.cell_coord(c);
                let origin = grid.node_x(cell);
                let mut rng = StdRng::seed_from_u64(c as u64);

                let mut out = Vec::new();
                for s in 0..k * k * k {
                    let local = TV::new((s % k) as T, ((s / k) % k) as T, (s / (k * k)) as T);
                    let offset = if align_to_cells {
                        TV::from_element(0.5)
                    } else {
                        let r: TV = rng.gen::<[T; 3]>().into();
                        TV::from_element(0.25) + 0.5 * r
                    };
                    let x = origin + (local + offset).component_mul(&sub);

                    let d = density(&x).max(0.).min(1.);
                    if d > 0. {
                        let mut p = Particle::new(sub_volume * d, x, frame);
                        p.orientation = orientation;
                        out.push(p);
                    }
                }
                out
            })
            .collect();

        let before = self.count();
        for p in sampled.into_iter().flatten() {
            if self.push(p).is_none() {
                tracing::debug!("Particle capacity {} reached while seeding", self.capacity());
                break;
            }
        }

        let added = self.count() - before;
        tracing::info!("Generated {} particles", added);
        added
    }
}

/// Rescales a fabric tensor to unit trace. Degenerate tensors become isotropic.
pub(crate) fn normalize_trace(m: &Mat) -> Mat {
    let tr = m.trace();
    if tr > 1e-12 {
        m / tr
    } else {
        Mat::identity() / DIM as T
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::RangeExt;

    fn grid() -> Grid {
        Grid::new(UV::new(4, 4, 4), TV::zeros()..TV::from_element(1.))
    }

    #[test]
    fn empty_predicate_generates_nothing() {
        let mut particles = Particles::with_capacity(100);
        let added = particles.generate(|_| 0., 8, &grid(), true, &Mat::identity());
        assert_eq!(added, 0);
        assert_eq!(particles.count(), 0);
    }

    #[test]
    fn full_density_fills_domain_volume() {
        let mut particles = Particles::with_capacity(10_000);
        let added = particles.generate(|_| 1., 8, &grid(), false, &Mat::identity());
        assert_eq!(added, 64 * 8);
        assert!((particles.total_volume() - 1.).abs() < 1e-12);

        let domain = TV::zeros()..TV::from_element(1.);
        assert!(particles.position.iter().all(|x| domain.contains_point(x)));
        assert!(particles
            .orientation
            .iter()
            .all(|o| (o.trace() - 1.).abs() < 1e-12));

        // sub-cell frame: (dx / 2)^2 / 12
        let expected = 0.125 * 0.125 / 12.;
        assert!((particles.frame[0][(0, 0)] - expected).abs() < 1e-15);
    }

    #[test]
    fn generation_is_clamped_to_capacity() {
        let mut particles = Particles::with_capacity(10);
        let added = particles.generate(|_| 1., 1, &grid(), true, &Mat::identity());
        assert_eq!(added, 10);
        assert!(particles.is_full());
    }

    #[test]
    fn generation_is_deterministic() {
        let mut a = Particles::with_capacity(1000);
        let mut b = Particles::with_capacity(1000);
        let half = |x: &TV| if x.y < 0.5 { 1. } else { 0. };
        a.generate(half, 8, &grid(), false, &Mat::identity());
        b.generate(half, 8, &grid(), false, &Mat::identity());
        assert_eq!(a.position, b.position);
        assert_eq!(a.count(), 64 * 8 / 2);
    }
}
