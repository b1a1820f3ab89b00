use super::cone::project_on_cone;
use super::{
    lipschitz, DelassusOperator, InnerSolver, Problem, SolveContext, SolveStatus, SolverReport,
};
use crate::math::*;
use rayon::prelude::*;

/// Largest step of the spectral variant, relative to `1 / L`.
const MAX_SPECTRAL_RATIO: T = 4.;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgVariant {
    /// Fixed step `1 / L`.
    Plain,
    /// Polak-Ribiere directions, reset whenever they stop descending.
    Conjugated,
    /// Nesterov momentum with adaptive restart.
    Accelerated,
    /// Barzilai-Borwein steps.
    Spectral,
}

/// Projected gradient descent on the impulses, the De Saxce term being re-evaluated at every
/// iterate.
pub struct ProjectedGradient {
    pub variant: PgVariant,
}

impl ProjectedGradient {
    pub fn new(variant: PgVariant) -> Self {
        ProjectedGradient { variant }
    }
}

fn dot(a: &[Vec6], b: &[Vec6]) -> T {
    a.par_iter().zip(b).map(|(a, b)| a.dot(b)).sum()
}

fn sub(a: &[Vec6], b: &[Vec6]) -> Vec<Vec6> {
    a.par_iter().zip(b).map(|(a, b)| a - b).collect()
}

/// `proj_K(x + alpha d)`
fn descend(x: &[Vec6], d: &[Vec6], alpha: T, mu: &[T]) -> Vec<Vec6> {
    x.par_iter()
        .zip(d)
        .zip(mu)
        .map(|((x, d), &mu)| project_on_cone(&(x + alpha * d), mu))
        .collect()
}

/// Contact velocities of the iterate, which play the role of the gradient.
fn gradient<D: DelassusOperator>(w: &D, problem: &Problem, x: &[Vec6]) -> Vec<Vec6> {
    let wx = w.apply(x);
    wx.par_iter()
        .enumerate()
        .map(|(i, y)| problem.velocity(y, i))
        .collect()
}

impl<D: DelassusOperator> InnerSolver<D> for ProjectedGradient {
    fn solve(
        &self,
        w: &D,
        problem: &Problem,
        x: &mut [Vec6],
        ctx: &mut SolveContext,
    ) -> SolverReport {
        let n = w.n_contacts();
        let l = lipschitz(w) * 1.05;
        if l <= 0. {
            x.iter_mut().for_each(|x| *x = Vec6::zeros());
            let residual = ctx.residual(w, problem, x);
            return ctx.report(SolveStatus::Converged, 0, residual, w, problem, x);
        }
        let step = 1. / l;

        x.par_iter_mut()
            .zip(problem.mu)
            .for_each(|(x, &mu)| *x = project_on_cone(x, mu));

        // variant state
        let mut previous: Option<(Vec<Vec6>, Vec<Vec6>)> = None;
        let mut direction = vec![Vec6::zeros(); n];
        let mut momentum = x.to_vec();
        let mut theta: T = 1.;

        let mut residual = T::INFINITY;
        for iteration in 1..=ctx.options.max_iterations {
            let next = match self.variant {
                PgVariant::Plain => {
                    let g = gradient(w, problem, x);
                    descend(x, &g, -step, problem.mu)
                }
                PgVariant::Spectral => {
                    let g = gradient(w, problem, x);
                    let alpha = match &previous {
                        Some((xp, gp)) => {
                            let s = sub(x, xp);
                            let sy = dot(&s, &sub(&g, gp));
                            if sy > 0. {
                                (dot(&s, &s) / sy).max(step).min(MAX_SPECTRAL_RATIO * step)
                            } else {
                                step
                            }
                        }
                        None => step,
                    };
                    let next = descend(x, &g, -alpha, problem.mu);
                    previous = Some((x.to_vec(), g));
                    next
                }
                PgVariant::Conjugated => {
                    let g = gradient(w, problem, x);
                    let beta = match &previous {
                        Some((_, gp)) => {
                            let norm = dot(gp, gp);
                            if norm > 0. {
                                ((dot(&g, &g) - dot(&g, gp)) / norm).max(0.)
                            } else {
                                0.
                            }
                        }
                        None => 0.,
                    };
                    direction
                        .par_iter_mut()
                        .zip(&g)
                        .for_each(|(d, g)| *d = -g + beta * *d);
                    if dot(&direction, &g) >= 0. {
                        direction.par_iter_mut().zip(&g).for_each(|(d, g)| *d = -g);
                    }
                    let next = descend(x, &direction, step, problem.mu);
                    previous = Some((Vec::new(), g));
                    next
                }
                PgVariant::Accelerated => {
                    let g = gradient(w, problem, &momentum);
                    let next = descend(&momentum, &g, -step, problem.mu);
                    let change = sub(&next, x);
                    if dot(&g, &change) > 0. {
                        theta = 1.;
                        momentum.copy_from_slice(&next);
                    } else {
                        let theta_next = 0.5 * (1. + (1. + 4. * theta * theta).sqrt());
                        let beta = (theta - 1.) / theta_next;
                        momentum
                            .par_iter_mut()
                            .zip(&next)
                            .zip(&change)
                            .for_each(|((z, x), dx)| *z = x + beta * dx);
                        theta = theta_next;
                    }
                    next
                }
            };
            x.copy_from_slice(&next);

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
