//! Linear solvers: conjugate gradient for the momentum balance, projected Gauss-Seidel for the
//! volume-exclusion complementarity problem.

mod conjugate_gradient;
mod lcp;

pub use conjugate_gradient::{conjugate_gradient, CgReport, KrylovSystem};
pub(crate) use conjugate_gradient::{dot, max_norm};
pub use lcp::{lcp_residual, projected_gauss_seidel, LcpReport};
