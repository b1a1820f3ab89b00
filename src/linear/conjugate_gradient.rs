use crate::math::*;
use rayon::prelude::*;

/// A symmetric positive (semi-)definite operator on nodal vectors.
pub trait KrylovSystem: Sync {
    fn apply(&self, x: &[TV]) -> Vec<TV>;

    /// Approximate inverse of the operator. Identity by default.
    fn precondition(&self, r: &[TV]) -> Vec<TV> {
        r.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgReport {
    pub iterations: usize,
    /// Max-norm of the final residual.
    pub residual: T,
    pub converged: bool,
}

pub(crate) fn dot(a: &[TV], b: &[TV]) -> T {
    a.par_iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

pub(crate) fn max_norm(a: &[TV]) -> T {
    a.par_iter().map(|x| x.amax()).reduce(|| 0., T::max)
}

/// Preconditioned conjugate gradient, starting from the current value of `x`.
#[allow(non_snake_case)]
pub fn conjugate_gradient<S: KrylovSystem>(
    A: &S,
    b: &[TV],
    x: &mut [TV],
    tol: T,
    max_iterations: usize,
) -> CgReport {
    let Ax = A.apply(x);
    let mut r: Vec<TV> = b.par_iter().zip(&Ax).map(|(b, a)| b - a).collect();
    let mut z = A.precondition(&r);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);

    let mut residual = max_norm(&r);
    let mut iterations = 0;
    while residual > tol && iterations < max_iterations {
        let s = A.apply(&p);
        let ps = dot(&p, &s);
        if ps <= 0. {
            break;
        }
        let alpha = rz / ps; // step length
        x.par_iter_mut().zip(&p).for_each(|(x, p)| *x += alpha * p);
        r.par_iter_mut().zip(&s).for_each(|(r, s)| *r -= alpha * s);

        residual = max_norm(&r);
        iterations += 1;
        if residual <= tol {
            break;
        }

        z = A.precondition(&r);
        let rz_next = dot(&r, &z);
        let beta = rz_next / rz; // improvement this step
        rz = rz_next;
        p.par_iter_mut().zip(&z).for_each(|(p, z)| *p = z + beta * *p);
    }

    CgReport {
        iterations,
        residual,
        converged: residual <= tol,
    }
}
