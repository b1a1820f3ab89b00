//! Coulomb friction with cohesion, as a second-order cone complementarity problem.
//!
//! For every contact `i`, find an impulse `x_i` in the friction cone `K_mu` such that the
//! relative velocity `y_i = (W x + b)_i`, shifted by `mu |y_T| e_N` (De Saxce), lies in the dual
//! cone and is orthogonal to `x_i`.

mod cadoux;
pub mod cone;
mod delassus;
mod gauss_seidel;
mod projected_gradient;

pub use cone::ComplementarityFunction;
pub use delassus::{
    AssembledDelassus, BodyContacts, ContactOperators, DelassusOperator, ProductCache,
    ProductDelassus,
};
pub use gauss_seidel::GaussSeidel;
pub use projected_gradient::{PgVariant, ProjectedGradient};

use crate::math::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    GaussSeidel,
    ProjectedGradient,
    ConjugatedProjectedGradient,
    AcceleratedProjectedGradient,
    SpectralProjectedGradient,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::GaussSeidel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualNorm {
    /// Largest per-contact residual.
    Max,
    /// `sqrt(sum_i r_i . W_ii r_i)`
    Energy,
}

impl Default for ResidualNorm {
    fn default() -> Self {
        ResidualNorm::Max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub algorithm: Algorithm,
    /// Apply `W` through its factors instead of assembling it.
    pub matrix_free: bool,
    pub max_iterations: usize,
    pub max_outer_iterations: usize,
    pub tolerance: T,
    pub norm: ResidualNorm,
    /// Also evaluate the residual with this function, for comparisons.
    pub alt_function: Option<ComplementarityFunction>,
    /// Wall-clock budget in seconds.
    pub timeout: Option<f64>,
    pub de_saxce: bool,
    pub cadoux: bool,
    /// Report to the observer every this many iterations, never if zero.
    pub stats_cadence: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            algorithm: Algorithm::default(),
            matrix_free: false,
            max_iterations: 250,
            max_outer_iterations: 15,
            tolerance: 1e-6,
            norm: ResidualNorm::default(),
            alt_function: None,
            timeout: None,
            de_saxce: true,
            cadoux: false,
            stats_cadence: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    /// Out of iterations; the result is the last iterate.
    BudgetExhausted,
    /// Out of wall-clock time; the result is the last iterate.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverReport {
    pub status: SolveStatus,
    pub iterations: usize,
    pub residual: T,
    pub alt_residual: Option<T>,
    pub elapsed: Duration,
    pub outer_iterations: usize,
}

impl SolverReport {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub iteration: usize,
    pub residual: T,
    pub alt_residual: Option<T>,
    pub elapsed: Duration,
}

/// Receives solver progress at the configured cadence.
pub trait Observer {
    fn observe(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> Observer for F {
    fn observe(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Records every progress report.
#[derive(Debug, Clone, Default)]
pub struct SolverStats {
    pub entries: Vec<Progress>,
}

impl Observer for SolverStats {
    fn observe(&mut self, progress: &Progress) {
        self.entries.push(*progress);
    }
}

/// Ignores progress reports.
pub struct NoObserver;

impl Observer for NoObserver {
    fn observe(&mut self, _progress: &Progress) {}
}

/// Right-hand side of one complementarity problem.
#[derive(Debug, Clone, Copy)]
pub struct Problem<'a> {
    pub bias: &'a [Vec6],
    pub mu: &'a [T],
    /// Whether the velocity is shifted by `mu |y_T| e_N`.
    pub de_saxce: bool,
}

impl<'a> Problem<'a> {
    /// `(W x + b)_i`, De Saxce shifted if enabled.
    pub fn velocity(&self, wx: &Vec6, i: usize) -> Vec6 {
        let y = wx + self.bias[i];
        if self.de_saxce {
            cone::de_saxce(&y, self.mu[i])
        } else {
            y
        }
    }

    pub fn residual<D: DelassusOperator>(
        &self,
        w: &D,
        x: &[Vec6],
        function: ComplementarityFunction,
        norm: ResidualNorm,
    ) -> T {
        let wx = w.apply(x);
        let local = (0..x.len()).into_par_iter().map(|i| {
            let r = function.eval(&x[i], &self.velocity(&wx[i], i), self.mu[i]);
            match norm {
                ResidualNorm::Max => r.norm(),
                ResidualNorm::Energy => r.dot(&(w.diagonal_block(i) * r)).max(0.),
            }
        });
        match norm {
            ResidualNorm::Max => local.reduce(|| 0., T::max),
            ResidualNorm::Energy => local.sum::<T>().sqrt(),
        }
    }
}

/// Shared state of one solve: options, clock, observer and iteration bookkeeping.
pub struct SolveContext<'o> {
    pub options: SolverOptions,
    start: Instant,
    observer: &'o mut dyn Observer,
}

impl<'o> SolveContext<'o> {
    pub fn new(options: &SolverOptions, observer: &'o mut dyn Observer) -> Self {
        SolveContext {
            options: options.clone(),
            start: Instant::now(),
            observer,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn timed_out(&self) -> bool {
        self.options
            .timeout
            .map_or(false, |t| self.elapsed().as_secs_f64() > t)
    }

    pub fn residual<D: DelassusOperator>(&self, w: &D, problem: &Problem, x: &[Vec6]) -> T {
        problem.residual(w, x, ComplementarityFunction::Projection, self.options.norm)
    }

    /// Reports progress and decides whether to stop after `iteration`.
    pub fn checkpoint<D: DelassusOperator>(
        &mut self,
        iteration: usize,
        residual: T,
        w: &D,
        problem: &Problem,
        x: &[Vec6],
    ) -> Option<SolveStatus> {
        let cadence = self.options.stats_cadence;
        if cadence > 0 && iteration % cadence == 0 {
            let alt_residual = self
                .options
                .alt_function
                .map(|f| problem.residual(w, x, f, self.options.norm));
            self.observer.observe(&Progress {
                iteration,
                residual,
                alt_residual,
                elapsed: self.elapsed(),
            });
        }

        if residual < self.options.tolerance {
            Some(SolveStatus::Converged)
        } else if self.timed_out() {
            Some(SolveStatus::TimedOut)
        } else {
            None
        }
    }

    pub fn report<D: DelassusOperator>(
        &self,
        status: SolveStatus,
        iterations: usize,
        residual: T,
        w: &D,
        problem: &Problem,
        x: &[Vec6],
    ) -> SolverReport {
        SolverReport {
            status,
            iterations,
            residual,
            alt_residual: self
                .options
                .alt_function
                .map(|f| problem.residual(w, x, f, self.options.norm)),
            elapsed: self.elapsed(),
            outer_iterations: 0,
        }
    }
}

/// One algorithm solving a complementarity problem for a fixed `W`.
pub trait InnerSolver<D: DelassusOperator> {
    fn solve(&self, w: &D, problem: &Problem, x: &mut [Vec6], ctx: &mut SolveContext)
        -> SolverReport;
}

/// The solver implementing `algorithm`.
pub fn strategy<D: DelassusOperator>(algorithm: Algorithm) -> Box<dyn InnerSolver<D>> {
    match algorithm {
        Algorithm::GaussSeidel => Box::new(GaussSeidel),
        Algorithm::ProjectedGradient => Box::new(ProjectedGradient::new(PgVariant::Plain)),
        Algorithm::ConjugatedProjectedGradient => {
            Box::new(ProjectedGradient::new(PgVariant::Conjugated))
        }
        Algorithm::AcceleratedProjectedGradient => {
            Box::new(ProjectedGradient::new(PgVariant::Accelerated))
        }
        Algorithm::SpectralProjectedGradient => {
            Box::new(ProjectedGradient::new(PgVariant::Spectral))
        }
    }
}

/// Solves for `x`, starting from its current value.
pub fn solve<D: DelassusOperator>(
    w: &D,
    bias: &[Vec6],
    mu: &[T],
    x: &mut [Vec6],
    options: &SolverOptions,
    observer: &mut dyn Observer,
) -> SolverReport {
    let mut ctx = SolveContext::new(options, observer);
    let inner = strategy::<D>(options.algorithm);

    if w.n_contacts() == 0 {
        let problem = Problem {
            bias,
            mu,
            de_saxce: options.de_saxce,
        };
        return ctx.report(SolveStatus::Converged, 0, 0., w, &problem, x);
    }

    if options.cadoux {
        cadoux::solve(w, bias, mu, x, inner.as_ref(), &mut ctx)
    } else {
        let problem = Problem {
            bias,
            mu,
            de_saxce: options.de_saxce,
        };
        inner.solve(w, &problem, x, &mut ctx)
    }
}

/// Largest eigenvalue of `W`, by power iteration.
pub(crate) fn lipschitz<D: DelassusOperator>(w: &D) -> T {
    let n = w.n_contacts();
    let mut v = vec![Vec6::from_element(1.); n];
    let mut lambda = 0.;
    for _ in 0..30 {
        let wv = w.apply(&v);
        let norm = wv.par_iter().map(|x| x.norm_squared()).sum::<T>().sqrt();
        if norm <= T::MIN_POSITIVE {
            return 0.;
        }
        let vnorm = v.par_iter().map(|x| x.norm_squared()).sum::<T>().sqrt();
        lambda = norm / vnorm;
        v = wv.into_iter().map(|x| x / norm).collect();
    }
    lambda
}

#[cfg(test)]
mod tests {
    use super::delassus::tests::well_conditioned_operators;
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn setup(seed: u64) -> (ContactOperators, Vec<Vec6>, Vec<T>) {
        let ops = well_conditioned_operators(seed, 12, 4);
        let mut rng = StdRng::seed_from_u64(seed + 100);
        let bias = (0..16)
            .map(|_| Vec6::from_fn(|_, _| rng.gen_range(-1.0..1.0)))
            .collect();
        let mu = (0..16).map(|_| rng.gen_range(0.0..0.6)).collect();
        (ops, bias, mu)
    }

    fn check_solution<D: DelassusOperator>(w: &D, bias: &[Vec6], mu: &[T], x: &[Vec6], tol: T) {
        let problem = Problem {
            bias,
            mu,
            de_saxce: true,
        };
        let r = problem.residual(w, x, ComplementarityFunction::Projection, ResidualNorm::Max);
        assert!(r < tol, "residual {}", r);
        for (xi, &m) in x.iter().zip(mu) {
            assert!(cone::in_cone(xi, m, 1e-8), "{:?} mu {}", xi, m);
        }
    }

    #[test]
    fn every_algorithm_finds_a_feasible_solution() {
        let (ops, bias, mu) = setup(5);
        let assembled = AssembledDelassus::new(&ops);
        let product = ProductDelassus::new(&ops);

        let algorithms = [Algorithm::GaussSeidel, Algorithm::AcceleratedProjectedGradient];
        for &algorithm in algorithms.iter() {
            for &cadoux in [false, true].iter() {
                let options = SolverOptions {
                    algorithm,
                    cadoux,
                    max_iterations: 5000,
                    max_outer_iterations: 30,
                    tolerance: 1e-8,
                    ..Default::default()
                };

                let mut x = vec![Vec6::zeros(); 16];
                let report = solve(&assembled, &bias, &mu, &mut x, &options, &mut NoObserver);
                assert!(report.converged(), "{:?} {:?}", algorithm, report);
                check_solution(&assembled, &bias, &mu, &x, 1e-6);

                let mut y = vec![Vec6::zeros(); 16];
                let report = solve(&product, &bias, &mu, &mut y, &options, &mut NoObserver);
                assert!(report.converged(), "{:?} {:?}", algorithm, report);
                check_solution(&product, &bias, &mu, &y, 1e-6);
            }
        }
    }

    #[test]
    fn gradient_variants_stay_feasible_and_progress() {
        let (ops, bias, mu) = setup(6);
        let w = AssembledDelassus::new(&ops);
        let initial = Problem {
            bias: &bias,
            mu: &mu,
            de_saxce: true,
        }
        .residual(
            &w,
            &vec![Vec6::zeros(); 16],
            ComplementarityFunction::Projection,
            ResidualNorm::Max,
        );
        for &algorithm in [
            Algorithm::ProjectedGradient,
            Algorithm::ConjugatedProjectedGradient,
            Algorithm::SpectralProjectedGradient,
        ]
        .iter()
        {
            let options = SolverOptions {
                algorithm,
                max_iterations: 20,
                tolerance: 1e-14,
                ..Default::default()
            };
            let mut x = vec![Vec6::zeros(); 16];
            let report = solve(&w, &bias, &mu, &mut x, &options, &mut NoObserver);
            assert_eq!(report.status, SolveStatus::BudgetExhausted);
            assert_eq!(report.iterations, 20);
            assert!(report.residual < initial, "{:?} {:?}", algorithm, report);
            for (xi, &m) in x.iter().zip(&mu) {
                assert!(cone::in_cone(xi, m, 1e-10));
            }
        }
    }

    #[test]
    fn observer_sees_cadence() {
        let (ops, bias, mu) = setup(7);
        let w = AssembledDelassus::new(&ops);
        let options = SolverOptions {
            max_iterations: 10,
            tolerance: 0.,
            stats_cadence: 2,
            alt_function: Some(ComplementarityFunction::FischerBurmeister),
            ..Default::default()
        };
        let mut stats = SolverStats::default();
        let mut x = vec![Vec6::zeros(); 16];
        let report = solve(&w, &bias, &mu, &mut x, &options, &mut stats);
        assert_eq!(report.iterations, 10);
        assert!(report.alt_residual.is_some());
        let iterations: Vec<usize> = stats.entries.iter().map(|p| p.iteration).collect();
        assert_eq!(iterations, vec![2, 4, 6, 8, 10]);
        assert!(stats.entries.iter().all(|p| p.alt_residual.is_some()));
    }

    #[test]
    fn zero_timeout_stops_immediately() {
        let (ops, bias, mu) = setup(8);
        let w = ProductDelassus::new(&ops);
        let options = SolverOptions {
            timeout: Some(0.),
            tolerance: 0.,
            ..Default::default()
        };
        let mut x = vec![Vec6::zeros(); 16];
        let report = solve(&w, &bias, &mu, &mut x, &options, &mut NoObserver);
        assert_eq!(report.status, SolveStatus::TimedOut);
        assert_eq!(report.iterations, 1);
    }
}
