//! Second-order cone primitives on 6-vectors: component 0 is the normal part, components 1..6
//! the tangential part.

use crate::math::*;
use serde::{Deserialize, Serialize};

pub fn tangent(x: &Vec6) -> na::SVector<T, 5> {
    x.fixed_rows::<5>(1).into_owned()
}

/// Projection onto the friction cone `{ |x_T| <= mu x_N }`.
pub fn project_on_cone(x: &Vec6, mu: T) -> Vec6 {
    let n = x[0];
    let t = tangential_norm(x);

    if t <= mu * n {
        return *x;
    }
    if mu * t + n <= 0. {
        return Vec6::zeros();
    }

    let alpha = (n + mu * t) / (1. + mu * mu);
    let mut out = Vec6::zeros();
    out[0] = alpha;
    if t > 0. {
        let scale = alpha * mu / t;
        out.fixed_rows_mut::<5>(1).copy_from(&(tangent(x) * scale));
    }
    out
}

/// Whether `x` lies in the friction cone, up to `tol`.
pub fn in_cone(x: &Vec6, mu: T, tol: T) -> bool {
    x[0] >= -tol && tangential_norm(x) <= mu * x[0] + tol
}

/// Whether `y` lies in the dual cone `{ mu |y_T| <= y_N }`, up to `tol`.
pub fn in_dual_cone(y: &Vec6, mu: T, tol: T) -> bool {
    mu * tangential_norm(y) <= y[0] + tol
}

/// De Saxce change of variable `y + mu |y_T| e_N`.
pub fn de_saxce(y: &Vec6, mu: T) -> Vec6 {
    let mut out = *y;
    out[0] += mu * tangential_norm(y);
    out
}

/// Complementarity function used to measure how far an iterate is from a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplementarityFunction {
    /// `x - proj_K(x - y)`, the natural residual.
    Projection,
    /// Fischer-Burmeister function on the rescaled Lorentz cone.
    FischerBurmeister,
}

impl Default for ComplementarityFunction {
    fn default() -> Self {
        ComplementarityFunction::Projection
    }
}

impl ComplementarityFunction {
    /// Residual vector of the contact with impulse `x` and (De Saxce modified) velocity `y`.
    pub fn eval(self, x: &Vec6, y: &Vec6, mu: T) -> Vec6 {
        match self {
            ComplementarityFunction::Projection => x - project_on_cone(&(x - y), mu),
            ComplementarityFunction::FischerBurmeister => fischer_burmeister(x, y, mu),
        }
    }
}

/// Jordan product on the Lorentz cone.
fn jordan(a: &Vec6, b: &Vec6) -> Vec6 {
    let mut out = Vec6::zeros();
    out[0] = a.dot(b);
    let t = tangent(b) * a[0] + tangent(a) * b[0];
    out.fixed_rows_mut::<5>(1).copy_from(&t);
    out
}

/// Square root in the Jordan algebra of the Lorentz cone, through the spectral decomposition.
fn jordan_sqrt(v: &Vec6) -> Vec6 {
    let t = tangential_norm(v);
    let dir = if t > 1e-14 {
        tangent(v) / t
    } else {
        na::SVector::<T, 5>::zeros()
    };
    let l1 = (v[0] - t).max(0.).sqrt();
    let l2 = (v[0] + t).max(0.).sqrt();

    let mut out = Vec6::zeros();
    out[0] = 0.5 * (l1 + l2);
    out.fixed_rows_mut::<5>(1).copy_from(&(dir * (0.5 * (l2 - l1))));
    out
}

/// `a + b - sqrt(a o a + b o b)` with `a = (mu x_N, x_T)` and `b = (y_N / mu, y_T)`, which map
/// the friction cone and its dual onto the unit Lorentz cone.
fn fischer_burmeister(x: &Vec6, y: &Vec6, mu: T) -> Vec6 {
    if mu <= 0. {
        // Frictionless: only the normal components are constrained.
        let (a, b) = (x[0], y[0]);
        let mut out = Vec6::zeros();
        out[0] = a + b - (a * a + b * b).sqrt();
        return out;
    }
    let mut a = *x;
    a[0] *= mu;
    let mut b = *y;
    b[0] /= mu;
    a + b - jordan_sqrt(&(jordan(&a, &a) + jordan(&b, &b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vec6(v: [T; 6]) -> Vec6 {
        Vec6::from_row_slice(&v)
    }

    #[test]
    fn projection_cases() {
        let inside = vec6([1., 0.1, 0., 0., 0., 0.]);
        assert_eq!(project_on_cone(&inside, 0.5), inside);

        let polar = vec6([-1., 0.1, 0., 0., 0., 0.]);
        assert_eq!(project_on_cone(&polar, 0.5), Vec6::zeros());

        let side = vec6([0., 1., 0., 0., 0., 0.]);
        let p = project_on_cone(&side, 1.);
        assert!((p - vec6([0.5, 0.5, 0., 0., 0., 0.])).norm() < 1e-12);

        // frictionless cone is the normal half-line
        let p = project_on_cone(&vec6([2., 1., 1., 0., 0., 0.]), 0.);
        assert_eq!(p, vec6([2., 0., 0., 0., 0., 0.]));
    }

    proptest! {
        #[test]
        fn projection_is_idempotent_and_feasible(v in proptest::array::uniform6(-5.0f64..5.), mu in 0.0f64..2.) {
            let x = Vec6::from_row_slice(&v);
            let p = project_on_cone(&x, mu);
            prop_assert!(in_cone(&p, mu, 1e-10));
            prop_assert!((project_on_cone(&p, mu) - p).norm() < 1e-10);
            // the difference lies in the polar cone, orthogonal to the projection
            prop_assert!((x - p).dot(&p).abs() < 1e-9 * (1. + x.norm_squared()));
        }

        #[test]
        fn residuals_vanish_at_solutions(n in 0.1f64..3., t in 0.0f64..1., mu in 0.1f64..1.5) {
            // sliding contact: x on the boundary, y tangent opposite to x_T
            let x = vec6([n, mu * n, 0., 0., 0., 0.]);
            let y = de_saxce(&vec6([0., -t, 0., 0., 0., 0.]), mu);
            for f in [ComplementarityFunction::Projection, ComplementarityFunction::FischerBurmeister].iter() {
                prop_assert!(f.eval(&x, &y, mu).norm() < 1e-7, "{:?}", f);
            }
        }
    }

    #[test]
    fn residuals_detect_violations() {
        let x = vec6([1., 0., 0., 0., 0., 0.]);
        let y = vec6([1., 0., 0., 0., 0., 0.]);
        for f in [ComplementarityFunction::Projection, ComplementarityFunction::FischerBurmeister].iter() {
            assert!(f.eval(&x, &y, 0.5).norm() > 0.1, "{:?}", f);
        }
    }
}
