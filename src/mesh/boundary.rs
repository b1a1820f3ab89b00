//! Boundary conditions on the domain faces, and the projectors they induce on velocities and
//! stresses.

use crate::math::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryType {
    Interior,
    /// No motion at all
    Stick,
    /// No motion along the normal
    Slip,
    /// Motion along the normal only
    Normal,
    /// Traction-free
    Free,
    /// Motion along a single direction only (stored in `BoundaryInfo::normal`)
    Corner,
}

impl BoundaryType {
    /// Parses a face type. Unknown names fall back to `Stick`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "stick" => BoundaryType::Stick,
            "slip" => BoundaryType::Slip,
            "normal" => BoundaryType::Normal,
            "free" => BoundaryType::Free,
            "interior" => BoundaryType::Interior,
            other => {
                tracing::warn!("Unknown boundary type {:?}, using stick", other);
                BoundaryType::Stick
            }
        }
    }
}

/// Boundary condition of a single node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryInfo {
    pub bc: BoundaryType,
    /// Outward normal of the face, or free direction for `Corner`.
    pub normal: TV,
}

const PARALLEL_TOL: T = 1e-6;

impl BoundaryInfo {
    pub const INTERIOR: BoundaryInfo = BoundaryInfo {
        bc: BoundaryType::Interior,
        normal: TV::new(0., 0., 0.),
    };

    pub const STICK: BoundaryInfo = BoundaryInfo {
        bc: BoundaryType::Stick,
        normal: TV::new(0., 0., 0.),
    };

    pub fn new(bc: BoundaryType, normal: TV) -> Self {
        BoundaryInfo { bc, normal }
    }

    /// Combines the constraints of two faces meeting at the same node. The result does not
    /// depend on the order of the arguments.
    pub fn combine(&self, other: &BoundaryInfo) -> BoundaryInfo {
        use BoundaryType::*;

        match (self.bc, other.bc) {
            (Interior, _) => return *other,
            (_, Interior) => return *self,
            (Stick, _) | (_, Stick) => return Self::STICK,
            // A free face adds no kinematic constraint, but keeps its stress constraint when
            // alone.
            (Free, Free) => {
                return if is_parallel(&self.normal, &other.normal) {
                    *self
                } else {
                    BoundaryInfo::new(Free, TV::zeros())
                }
            }
            (Free, _) => return *other,
            (_, Free) => return *self,
            _ => (),
        }

        let dot = self.normal.dot(&other.normal);
        let parallel = (dot.abs() - 1.).abs() < PARALLEL_TOL;
        let orthogonal = dot.abs() < PARALLEL_TOL;

        match (self.bc, other.bc) {
            (a, b) if a == b && parallel => *self,
            // same free direction, the normal face keeps its stress constraint
            (Normal, Corner) if parallel => *self,
            (Corner, Normal) if parallel => *other,
            (Slip, Slip) if orthogonal => {
                let free = self.normal.cross(&other.normal).normalize();
                BoundaryInfo::new(Corner, canonical(free))
            }
            // the free direction of one lies in the plane of the other
            (Normal, Slip) | (Corner, Slip) if orthogonal => *self,
            (Slip, Normal) | (Slip, Corner) if orthogonal => *other,
            _ => Self::STICK,
        }
    }

    /// Projector onto the admissible velocities.
    pub fn velocity_projector(&self) -> Mat {
        let n = &self.normal;
        match self.bc {
            BoundaryType::Interior | BoundaryType::Free => Mat::identity(),
            BoundaryType::Stick => Mat::zeros(),
            BoundaryType::Slip => Mat::identity() - n * n.transpose(),
            BoundaryType::Normal | BoundaryType::Corner => n * n.transpose(),
        }
    }

    /// Projector onto the admissible stresses.
    ///
    /// A free face carries no traction, a slip face no tangential traction and a normal face
    /// no normal traction.
    pub fn stress_projector(&self) -> Mat6 {
        let n = &self.normal;
        if n.norm_squared() < 0.5 {
            return Mat6::identity();
        }
        match self.bc {
            BoundaryType::Free => {
                let tangent = Mat::identity() - n * n.transpose();
                congruence_matrix(&tangent)
            }
            BoundaryType::Normal => remove_tractions(n, &[*n]),
            BoundaryType::Slip => {
                let (t1, t2) = tangent_basis(n);
                remove_tractions(n, &[t1, t2])
            }
            _ => Mat6::identity(),
        }
    }
}

/// Projector onto the stresses `tau` with `t . (tau n) == 0` for each `t` of `directions`.
/// The directions must be orthonormal, and either all orthogonal to `n` or `n` itself.
fn remove_tractions(n: &TV, directions: &[TV]) -> Mat6 {
    let mut proj = Mat6::identity();
    for t in directions {
        // t . (tau n) is the Frobenius product of tau with sym(t n^T)
        let c = tensor_to_vec6(&(0.5 * (t * n.transpose() + n * t.transpose())));
        proj -= c * c.transpose() / c.norm_squared();
    }
    proj
}

fn tangent_basis(n: &TV) -> (TV, TV) {
    let k = n.iamin();
    let t1 = n.cross(&TV::ith(k, 1.)).normalize();
    (t1, n.cross(&t1))
}

fn is_parallel(a: &TV, b: &TV) -> bool {
    (a.dot(b).abs() - 1.).abs() < PARALLEL_TOL
}

/// Sign convention for directions, so that combining faces in any order gives the same result.
fn canonical(v: TV) -> TV {
    let k = v.iamax();
    if v[k] < 0. {
        -v
    } else {
        v
    }
}

/// The six faces of the box domain, with their outward normals.
pub const FACES: [(&str, usize, bool); 6] = [
    ("left", 0, false),
    ("right", 0, true),
    ("bottom", 1, false),
    ("top", 1, true),
    ("back", 2, false),
    ("front", 2, true),
];

/// Maps named domain faces to boundary types. Faces that are not listed are `Stick`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryMapper {
    pub faces: HashMap<String, BoundaryType>,
}

impl BoundaryMapper {
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut faces = HashMap::new();
        for (face, ty) in names {
            if !FACES.iter().any(|(name, _, _)| name == face) {
                tracing::warn!("Unknown boundary face {:?} ignored", face);
                continue;
            }
            faces.insert(face.clone(), BoundaryType::from_name(ty));
        }
        BoundaryMapper { faces }
    }

    pub fn face(&self, name: &str) -> BoundaryType {
        self.faces.get(name).copied().unwrap_or(BoundaryType::Stick)
    }

    /// Combines the conditions of every face the node lies on. `on_face(axis, upper)` tells
    /// whether the node lies on the corresponding face.
    pub fn classify<F: Fn(usize, bool) -> bool>(&self, on_face: F) -> BoundaryInfo {
        FACES
            .iter()
            .filter(|(_, axis, upper)| on_face(*axis, *upper))
            .fold(BoundaryInfo::INTERIOR, |info, (name, axis, upper)| {
                let sign = if *upper { 1. } else { -1. };
                let face = BoundaryInfo::new(self.face(name), TV::ith(*axis, sign));
                info.combine(&face)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BoundaryType::*;

    fn mapper(pairs: &[(&str, &str)]) -> BoundaryMapper {
        let owned = pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect::<Vec<_>>();
        BoundaryMapper::from_names(owned.iter().map(|(a, b)| (a, b)))
    }

    #[test]
    fn stick_projector_is_idempotent_zero() {
        let p = BoundaryInfo::STICK.velocity_projector();
        let v = TV::new(1., -2., 3.);
        let once = p * v;
        let twice = p * once;
        assert_eq!(once, TV::zeros());
        assert_eq!(twice, once);
    }

    #[test]
    fn free_projector_is_identity() {
        let free = BoundaryInfo::new(Free, TV::new(0., 1., 0.));
        let v = TV::new(1., -2., 3.);
        assert_eq!(free.velocity_projector() * v, v);
    }

    #[test]
    fn projectors_are_idempotent() {
        let n = TV::new(0., 0., 1.);
        for bc in [Slip, Normal, Corner, Stick, Interior, Free].iter() {
            let p = BoundaryInfo::new(*bc, n).velocity_projector();
            assert!((p * p - p).norm() < 1e-12, "{:?}", bc);
            let s = BoundaryInfo::new(*bc, n).stress_projector();
            assert!((s * s - s).norm() < 1e-12, "{:?}", bc);
        }
    }

    #[test]
    fn combination_rules() {
        let x = TV::new(1., 0., 0.);
        let y = TV::new(0., 1., 0.);
        let z = TV::new(0., 0., 1.);

        let slip_x = BoundaryInfo::new(Slip, x);
        let slip_y = BoundaryInfo::new(Slip, y);
        let slip_z = BoundaryInfo::new(Slip, z);

        // equal constraints consolidate
        assert_eq!(slip_x.combine(&BoundaryInfo::new(Slip, -x)), slip_x);

        // orthogonal partial constraints make a corner, in any order
        let corner = slip_x.combine(&slip_z);
        assert_eq!(corner.bc, Corner);
        assert_eq!(corner.normal, y);
        assert_eq!(slip_z.combine(&slip_x), corner);

        // three orthogonal slips leave nothing free
        assert_eq!(corner.combine(&slip_y).bc, Stick);

        // a normal face keeps its constraint along an orthogonal slip face
        let normal_y = BoundaryInfo::new(Normal, y);
        assert_eq!(BoundaryInfo::new(Slip, -x).combine(&normal_y), normal_y);
        assert_eq!(normal_y.combine(&slip_x), normal_y);
        let v = TV::new(1., 2., 3.);
        assert_eq!(slip_x.combine(&normal_y).velocity_projector() * v, TV::new(0., 2., 0.));

        // a corner and a normal face sharing their direction keep it
        let corner_y = BoundaryInfo::new(Corner, y);
        let normal_neg_y = BoundaryInfo::new(Normal, -y);
        assert_eq!(corner_y.combine(&normal_neg_y), normal_neg_y);
        assert_eq!(normal_neg_y.combine(&corner_y), normal_neg_y);

        // incompatible constraints degrade to stick
        assert_eq!(BoundaryInfo::new(Normal, x).combine(&normal_y).bc, Stick);
        assert_eq!(corner_y.combine(&BoundaryInfo::new(Normal, z)).bc, Stick);
        assert_eq!(slip_y.combine(&normal_y).bc, Stick);

        // interior and free are neutral
        assert_eq!(BoundaryInfo::INTERIOR.combine(&slip_x), slip_x);
        assert_eq!(BoundaryInfo::new(Free, y).combine(&slip_x), slip_x);
    }

    fn traction(tau: &Vec6, n: &TV) -> TV {
        vec6_to_tensor(tau) * n
    }

    #[test]
    fn face_stress_projectors_remove_tractions() {
        let n = TV::new(0., 1., 0.);
        let tau = Vec6::new(1., -0.5, 0.3, 0.7, -0.2, 0.4);
        let t = traction(&tau, &n);
        assert!(t.x.abs() > 0.1 && t.y.abs() > 0.1 && t.z.abs() > 0.1);

        // slip keeps the normal traction only
        let slipped = BoundaryInfo::new(Slip, n).stress_projector() * tau;
        let ts = traction(&slipped, &n);
        assert!(ts.x.abs() < 1e-12 && ts.z.abs() < 1e-12);
        assert!((ts.y - t.y).abs() < 1e-12);

        // normal keeps the tangential traction only
        let normal = BoundaryInfo::new(Normal, n).stress_projector() * tau;
        let tn = traction(&normal, &n);
        assert!(tn.y.abs() < 1e-12);
        assert!((tn.x - t.x).abs() < 1e-12 && (tn.z - t.z).abs() < 1e-12);

        // free keeps none of it
        let free = BoundaryInfo::new(Free, n).stress_projector() * tau;
        assert!(traction(&free, &n).norm() < 1e-12);

        // skewed normals too
        let m = TV::new(1., 2., -1.).normalize();
        let slipped = BoundaryInfo::new(Slip, m).stress_projector() * tau;
        let ts = traction(&slipped, &m);
        assert!((ts - m * m.dot(&ts)).norm() < 1e-12);
    }

    #[test]
    fn unknown_faces_default_to_stick() {
        let m = mapper(&[("left", "slip"), ("bottom", "free"), ("nowhere", "slip"), ("top", "bogus")]);
        assert_eq!(m.face("left"), Slip);
        assert_eq!(m.face("bottom"), Free);
        assert_eq!(m.face("top"), Stick);
        assert_eq!(m.face("right"), Stick);
        assert!(!m.faces.contains_key("nowhere"));
    }

    #[test]
    fn classify_node_on_edge() {
        let m = mapper(&[("left", "slip"), ("back", "slip"), ("bottom", "stick")]);
        let edge = m.classify(|axis, upper| !upper && (axis == 0 || axis == 2));
        assert_eq!(edge.bc, Corner);
        assert_eq!(edge.normal, TV::new(0., 1., 0.));

        let bottom_corner = m.classify(|_, upper| !upper);
        assert_eq!(bottom_corner.bc, Stick);

        let inside = m.classify(|_, _| false);
        assert_eq!(inside.bc, Interior);
    }
}
