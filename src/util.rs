use crate::math::*;
use std::ops::Range;

/// Checks that `df` is the gradient of `f` on random points of `domain`, by comparing a
/// centered finite difference along a random direction. Returns the worst relative error.
#[cfg(test)]
pub fn diff_test<F, DF>(f: F, df: DF, domain: Range<TV>, eps: T) -> T
where
    F: Fn(TV) -> T,
    DF: Fn(TV) -> TV,
{
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(42);
    let mut worst: T = 0.;

    for _ in 0..1000 {
        let r: TV = rng.gen::<[T; 3]>().into();
        let x0 = domain.start + r.component_mul(&domain.size());
        let dir: TV = rng.gen::<[T; 3]>().into();
        let dx = (2. * dir - TV::ones()) * eps;

        let u = (f(x0 + dx) - f(x0 - dx)) / 2.;
        let v = df(x0).dot(&dx);

        let err = (u - v).abs();
        let scale = T::max(u.abs().max(v.abs()), eps);
        worst = worst.max(err / scale);
    }

    worst
}

pub trait RangeExt {
    fn size(&self) -> TV;

    fn center(&self) -> TV;

    fn contains_point(&self, x: &TV) -> bool;

    fn clamp_point(&self, x: &TV) -> TV;
}

impl RangeExt for Range<TV> {
    fn size(&self) -> TV {
        self.end - self.start
    }

    fn center(&self) -> TV {
        0.5 * (self.start + self.end)
    }

    fn contains_point(&self, x: &TV) -> bool {
        self.start.all_lt(x) && self.end.all_gt(x)
    }

    fn clamp_point(&self, x: &TV) -> TV {
        x.zip_zip_map(&self.start, &self.end, |v, lo, hi| v.max(lo).min(hi))
    }
}

pub trait VecExt {
    fn all_lt(&self, other: &Self) -> bool;

    fn all_gt(&self, other: &Self) -> bool;

    fn component_max(&self, other: &Self) -> Self;

    fn ones() -> Self;
}

impl VecExt for TV {
    fn all_lt(&self, other: &Self) -> bool {
        self.x < other.x && self.y < other.y && self.z < other.z
    }

    fn all_gt(&self, other: &Self) -> bool {
        self.x > other.x && self.y > other.y && self.z > other.z
    }

    fn component_max(&self, other: &Self) -> Self {
        self.zip_map(other, |a, b| a.max(b))
    }

    fn ones() -> Self {
        Self::from_element(1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_test() {
        let err = diff_test(
            |x| x.x.sin() + x.y * x.y + x.z.exp(),
            |x| TV::new(x.x.cos(), 2. * x.y, x.z.exp()),
            TV::from_element(-2.)..TV::from_element(2.),
            1e-6,
        );
        assert!(err < 1e-4, "{}", err);

        let err = diff_test(
            |x| x.x * x.x,
            |x| TV::new(3. * x.x, 0., 0.),
            TV::from_element(1.)..TV::from_element(2.),
            1e-6,
        );
        assert!(err > 0.1);
    }
}
