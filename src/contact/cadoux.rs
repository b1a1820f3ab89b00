//! Cadoux fixed point: the De Saxce shift is frozen at the current velocities, which leaves a
//! convex cone problem for the inner solver, and then updated from its solution.

use super::{
    ComplementarityFunction, DelassusOperator, InnerSolver, Problem, SolveContext, SolveStatus,
    SolverReport,
};
use crate::math::*;
use rayon::prelude::*;

pub(super) fn solve<D: DelassusOperator>(
    w: &D,
    bias: &[Vec6],
    mu: &[T],
    x: &mut [Vec6],
    inner: &dyn InnerSolver<D>,
    ctx: &mut SolveContext,
) -> SolverReport {
    let full = Problem {
        bias,
        mu,
        de_saxce: true,
    };
    let max_outer = ctx.options.max_outer_iterations.max(1);
    let norm = ctx.options.norm;

    let mut iterations = 0;
    let mut previous = T::INFINITY;
    let mut report = ctx.report(SolveStatus::BudgetExhausted, 0, previous, w, &full, x);
    for outer in 1..=max_outer {
        let wx = w.apply(x);
        let shifted: Vec<Vec6> = (0..x.len())
            .into_par_iter()
            .map(|i| {
                let y = wx[i] + bias[i];
                let mut b = bias[i];
                b[0] += mu[i] * tangential_norm(&y);
                b
            })
            .collect();
        let frozen = Problem {
            bias: &shifted,
            mu,
            de_saxce: false,
        };

        let inner_report = inner.solve(w, &frozen, x, ctx);
        iterations += inner_report.iterations;

        let residual = full.residual(w, x, ComplementarityFunction::Projection, norm);
        report = ctx.report(inner_report.status, iterations, residual, w, &full, x);
        report.outer_iterations = outer;

        if inner_report.status == SolveStatus::TimedOut {
            return report;
        }
        if residual < ctx.options.tolerance {
            report.status = SolveStatus::Converged;
            return report;
        }
        if residual >= previous {
            // stalled
            report.status = SolveStatus::BudgetExhausted;
            return report;
        }
        previous = residual;
    }
    report.status = SolveStatus::BudgetExhausted;
    report
}
