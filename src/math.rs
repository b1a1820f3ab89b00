//! Scalar, vector and tensor aliases shared by the whole crate.
//!
//! Symmetric tensors are stored as 6-vectors in an orthonormal basis (with respect to the
//! Frobenius inner product), so that `a.dot(&b) == A : B`. The first component is the spherical
//! part `tr(A) / sqrt(3)`, which plays the role of the "normal" component in the friction cone;
//! the remaining five are deviatoric ("tangential"). Skew tensors are stored as their axial
//! vector.

pub const DIM: usize = 3;
pub const SD: usize = 6;

pub type Dim = na::Const<DIM>;

pub type T = f64;
pub type TV = na::SVector<T, DIM>;
pub type IV = na::SVector<isize, DIM>;
pub type UV = na::SVector<usize, DIM>;

pub type Mat = na::SMatrix<T, DIM, DIM>;

pub type Vec6 = na::SVector<T, SD>;
pub type Mat6 = na::SMatrix<T, SD, SD>;
pub type Mat63 = na::SMatrix<T, SD, DIM>;
pub type Mat36 = na::SMatrix<T, DIM, SD>;

/// Node indices touched by one location. Eight is enough for a trilinear hexahedron.
pub type NodeList = smallvec::SmallVec<[usize; 8]>;

const SQRT_2: T = std::f64::consts::SQRT_2;
const SQRT_3: T = 1.732_050_807_568_877_2;
const SQRT_6: T = 2.449_489_742_783_178;

/// Maps the symmetric part of `m` to its 6-vector representation.
pub fn tensor_to_vec6(m: &Mat) -> Vec6 {
    let s = 0.5 * (m + m.transpose());
    Vec6::new(
        s.trace() / SQRT_3,
        (s[(0, 0)] - s[(1, 1)]) / SQRT_2,
        (2. * s[(2, 2)] - s[(0, 0)] - s[(1, 1)]) / SQRT_6,
        SQRT_2 * s[(0, 1)],
        SQRT_2 * s[(0, 2)],
        SQRT_2 * s[(1, 2)],
    )
}

/// Inverse of [`tensor_to_vec6`].
pub fn vec6_to_tensor(v: &Vec6) -> Mat {
    let sph = v[0] / SQRT_3;
    let d0 = sph + v[1] / SQRT_2 - v[2] / SQRT_6;
    let d1 = sph - v[1] / SQRT_2 - v[2] / SQRT_6;
    let d2 = sph + 2. * v[2] / SQRT_6;
    let xy = v[3] / SQRT_2;
    let xz = v[4] / SQRT_2;
    let yz = v[5] / SQRT_2;
    Mat::new(d0, xy, xz, xy, d1, yz, xz, yz, d2)
}

/// Axial vector of the skew-symmetric part of `m`.
pub fn skew_to_vec3(m: &Mat) -> TV {
    let k = 0.5 * (m - m.transpose());
    TV::new(k[(2, 1)], k[(0, 2)], k[(1, 0)])
}

/// The matrix `[v]x` such that `[v]x w == v.cross(&w)`.
pub fn cross_matrix(v: &TV) -> Mat {
    Mat::new(0., -v.z, v.y, v.z, 0., -v.x, -v.y, v.x, 0.)
}

/// Linear map `u -> vec6(sym(u gᵀ))`, the symmetric gradient contribution of a node whose
/// shape function has gradient `g`.
pub fn sym_block(g: &TV) -> Mat63 {
    let mut block = Mat63::zeros();
    for a in 0..DIM {
        let col = tensor_to_vec6(&(TV::ith(a, 1.) * g.transpose()));
        block.set_column(a, &col);
    }
    block
}

/// Linear map `u -> axial(skew(u gᵀ))`.
pub fn skew_block(g: &TV) -> Mat {
    let mut block = Mat::zeros();
    for a in 0..DIM {
        let col = skew_to_vec3(&(TV::ith(a, 1.) * g.transpose()));
        block.set_column(a, &col);
    }
    block
}

/// The 6x6 matrix of the linear map `S -> A S B` restricted to symmetric tensors, where the
/// result is symmetrized. With `A == B == F` this is a congruence.
pub fn congruence_matrix(f: &Mat) -> Mat6 {
    let mut out = Mat6::zeros();
    for k in 0..SD {
        let basis = vec6_to_tensor(&Vec6::ith(k, 1.));
        out.set_column(k, &tensor_to_vec6(&(f * basis * f.transpose())));
    }
    out
}

/// Norm of the deviatoric ("tangential") part of a 6-vector.
pub fn tangential_norm(v: &Vec6) -> T {
    (v.norm_squared() - v[0] * v[0]).max(0.).sqrt()
}

/// Smooth Hermite step from 0 at `edge0` to 1 at `edge1`.
pub fn smoothstep(edge0: T, edge1: T, x: T) -> T {
    if edge1 <= edge0 {
        return if x >= edge1 { 1. } else { 0. };
    }
    let t = ((x - edge0) / (edge1 - edge0)).max(0.).min(1.);
    t * t * (3. - 2. * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sym(m: Mat) -> Mat {
        0.5 * (m + m.transpose())
    }

    proptest! {
        #[test]
        fn vec6_is_isometric(a in proptest::array::uniform9(-10.0f64..10.), b in proptest::array::uniform9(-10.0f64..10.)) {
            let a = sym(Mat::from_row_slice(&a));
            let b = sym(Mat::from_row_slice(&b));
            let lhs = tensor_to_vec6(&a).dot(&tensor_to_vec6(&b));
            let rhs = a.component_mul(&b).sum();
            prop_assert!((lhs - rhs).abs() < 1e-9 * (1. + rhs.abs()));
            prop_assert!((vec6_to_tensor(&tensor_to_vec6(&a)) - a).norm() < 1e-9);
        }
    }

    #[test]
    fn normal_component_is_scaled_trace() {
        let v = tensor_to_vec6(&Mat::identity());
        assert!((v[0] - SQRT_3).abs() < 1e-12);
        assert!(tangential_norm(&v) < 1e-12);
    }

    #[test]
    fn skew_blocks_match_cross_products() {
        let w = TV::new(0.3, -1.2, 2.);
        assert!((skew_to_vec3(&cross_matrix(&w)) - w).norm() < 1e-12);

        let g = TV::new(1., 2., 3.);
        let u = TV::new(-0.5, 0.25, 4.);
        let grad = u * g.transpose();
        assert!((skew_block(&g) * u - skew_to_vec3(&grad)).norm() < 1e-12);
        assert!((sym_block(&g) * u - tensor_to_vec6(&grad)).norm() < 1e-12);
    }

    #[test]
    fn identity_congruence_is_identity() {
        assert!((congruence_matrix(&Mat::identity()) - Mat6::identity()).norm() < 1e-12);
    }
}
