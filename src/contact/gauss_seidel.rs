use super::cone::{de_saxce, in_cone, in_dual_cone, project_on_cone};
use super::{DelassusOperator, InnerSolver, Problem, SolveContext, SolveStatus, SolverReport};
use crate::math::*;

const LOCAL_ITERATIONS: usize = 200;
const LOCAL_TOL: T = 1e-12;

/// Block Gauss-Seidel: sweeps over the contacts, solving each one exactly given the others.
pub struct GaussSeidel;

impl<D: DelassusOperator> InnerSolver<D> for GaussSeidel {
    fn solve(
        &self,
        w: &D,
        problem: &Problem,
        x: &mut [Vec6],
        ctx: &mut SolveContext,
    ) -> SolverReport {
        let n = w.n_contacts();
        let diagonal: Vec<Mat6> = (0..n).map(|i| w.diagonal_block(i)).collect();
        let lmax: Vec<T> = diagonal
            .iter()
            .map(|d| d.symmetric_eigenvalues().max())
            .collect();

        let mut cache = w.init_cache(x);
        let mut residual = T::INFINITY;
        for iteration in 1..=ctx.options.max_iterations {
            for i in 0..n {
                // velocity of contact i without its own contribution
                let r = w.row_product(&cache, x, i) - diagonal[i] * x[i] + problem.bias[i];
                let xi = solve_local(
                    &diagonal[i],
                    lmax[i],
                    &r,
                    problem.mu[i],
                    problem.de_saxce,
                    &x[i],
                );
                let delta = xi - x[i];
                if delta.norm_squared() > 0. {
                    x[i] = xi;
                    w.update_cache(&mut cache, i, &delta);
                }
            }

            residual = ctx.residual(w, problem, x);
            if let Some(status) = ctx.checkpoint(iteration, residual, w, problem, x) {
                return ctx.report(status, iteration, residual, w, problem, x);
            }
        }
        let iterations = ctx.options.max_iterations;
        ctx.report(
            SolveStatus::BudgetExhausted,
            iterations,
            residual,
            w,
            problem,
            x,
        )
    }
}

/// Solves the single-contact problem `x in K, y = W x + r, x . y = 0, y in K*`.
pub(crate) fn solve_local(
    w: &Mat6,
    lmax: T,
    r: &Vec6,
    mu: T,
    shift: bool,
    guess: &Vec6,
) -> Vec6 {
    if lmax <= 0. {
        return Vec6::zeros();
    }
    let velocity = |y: Vec6| if shift { de_saxce(&y, mu) } else { y };

    // separating
    if in_dual_cone(&velocity(*r), mu, 0.) {
        return Vec6::zeros();
    }

    // sticking
    if let Some(chol) = w.cholesky() {
        let x = -chol.solve(r);
        if in_cone(&x, mu, LOCAL_TOL * x.norm()) {
            return x;
        }
    }

    // sliding
    let step = 1. / lmax;
    let mut x = project_on_cone(guess, mu);
    for _ in 0..LOCAL_ITERATIONS {
        let y = velocity(w * x + r);
        let next = project_on_cone(&(x - step * y), mu);
        let done = (next - x).norm() <= LOCAL_TOL * (1. + x.norm());
        x = next;
        if done {
            break;
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::cone::ComplementarityFunction;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_spd(seed: u64) -> Mat6 {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = Mat6::from_fn(|_, _| rng.gen_range(-0.3..0.3));
        Mat6::identity() + a * a.transpose()
    }

    #[test]
    fn local_cases() {
        let w = Mat6::identity();
        // moving apart
        let r = Vec6::new(1., 0.2, 0., 0., 0., 0.);
        assert_eq!(solve_local(&w, 1., &r, 0.5, true, &Vec6::zeros()), Vec6::zeros());

        // pressed in, no tangential motion
        let r = Vec6::new(-1., 0., 0., 0., 0., 0.);
        let x = solve_local(&w, 1., &r, 0.5, true, &Vec6::zeros());
        assert!((x - Vec6::new(1., 0., 0., 0., 0., 0.)).norm() < 1e-12);

        // pressed in while sliding fast: impulse on the cone boundary, against the motion
        let r = Vec6::new(-1., 3., 0., 0., 0., 0.);
        let x = solve_local(&w, 1., &r, 0.5, true, &Vec6::zeros());
        assert!((x[1] + 0.5 * x[0]).abs() < 1e-8, "{:?}", x);
        assert!(x[0] > 0.);
    }

    proptest! {
        #[test]
        fn local_solutions_satisfy_complementarity(
            seed in 0u64..1000,
            v in proptest::array::uniform6(-2.0f64..2.),
            mu in 0.0f64..0.5,
        ) {
            let w = random_spd(seed);
            let lmax = w.symmetric_eigenvalues().max();
            let r = Vec6::from_row_slice(&v);
            let x = solve_local(&w, lmax, &r, mu, true, &Vec6::zeros());
            let y = de_saxce(&(w * x + r), mu);
            prop_assert!(in_cone(&x, mu, 1e-8));
            let res = ComplementarityFunction::Projection.eval(&x, &y, mu).norm();
            prop_assert!(res < 1e-6, "residual {}", res);
        }
    }
}
