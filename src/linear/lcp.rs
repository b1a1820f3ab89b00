use crate::math::*;
use nalgebra_sparse::CsrMatrix;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LcpReport {
    pub iterations: usize,
    pub residual: T,
}

/// Complementarity residual `max_i |min(p_i, (W p + b)_i)|`.
pub fn lcp_residual(w: &CsrMatrix<T>, b: &[T], p: &[T]) -> T {
    (0..b.len())
        .map(|i| {
            let row = w.row(i);
            let y: T = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&k, v)| v * p[k])
                .sum::<T>()
                + b[i];
            p[i].min(y).abs()
        })
        .fold(0., T::max)
}

/// Solves `p >= 0, W p + b >= 0, p . (W p + b) = 0` by projected Gauss-Seidel, starting from
/// the current value of `p`.
pub fn projected_gauss_seidel(
    w: &CsrMatrix<T>,
    b: &[T],
    p: &mut [T],
    tol: T,
    max_iterations: usize,
) -> LcpReport {
    let mut residual = lcp_residual(w, b, p);
    let mut iterations = 0;

    while residual > tol && iterations < max_iterations {
        for i in 0..b.len() {
            let row = w.row(i);
            let mut diag = 0.;
            let mut y = b[i];
            for (&k, &v) in row.col_indices().iter().zip(row.values()) {
                if k == i {
                    diag = v;
                }
                y += v * p[k];
            }
            if diag > 0. {
                p[i] = (p[i] - y / diag).max(0.);
            }
        }
        iterations += 1;
        residual = lcp_residual(w, b, p);
    }

    LcpReport {
        iterations,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn matrix(entries: &[(usize, usize, T)], n: usize) -> CsrMatrix<T> {
        let mut coo = CooMatrix::new(n, n);
        for &(i, j, v) in entries {
            coo.push(i, j, v);
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn diagonal_lcp() {
        let w = matrix(&[(0, 0, 1.), (1, 1, 2.)], 2);
        let mut p = vec![0.; 2];
        let report = projected_gauss_seidel(&w, &[-1., 2.], &mut p, 1e-12, 10);
        assert!(report.residual < 1e-12);
        assert_eq!(p, vec![1., 0.]);
    }

    #[test]
    fn coupled_lcp() {
        let w = matrix(&[(0, 0, 2.), (0, 1, -1.), (1, 0, -1.), (1, 1, 2.), (2, 2, 1.)], 3);
        let b = [-1., -1., 3.];
        let mut p = vec![0.; 3];
        let report = projected_gauss_seidel(&w, &b, &mut p, 1e-10, 200);
        assert!(report.residual < 1e-10, "{:?}", report);
        assert!((p[0] - 1.).abs() < 1e-9);
        assert!((p[1] - 1.).abs() < 1e-9);
        assert_eq!(p[2], 0.);
    }
}
