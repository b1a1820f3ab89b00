use crate::math::*;
use crate::util::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// An object represented implicitly by a signed distance field, negative inside.
pub trait ImplicitObject: Send + Sync {
    fn signed_distance(&self, x: &TV) -> T;

    /// Outward unit normal, the gradient of the signed distance.
    fn normal(&self, x: &TV) -> TV;

    /// Volume and inertia tensor (about the centroid) for unit density, or `None` for
    /// unbounded objects.
    fn mass_properties(&self) -> Option<(T, Mat)>;
}

impl ImplicitObject for Range<TV> {
    /// Credit to Ingilo Quielez.
    /// https://iquilezles.org/www/articles/distfunctions/distfunctions.htm
    fn signed_distance(&self, x: &TV) -> T {
        let p = x - self.center();
        let q = p.abs() - 0.5 * self.size();
        q.map(|x| x.max(0.0)).magnitude() + T::min(q.max(), 0.0)
    }

    /// See PhysBAM Public_Library/Core/Math_Tools/RANGE.cpp for source.
    fn normal(&self, x: &TV) -> TV {
        let min_dists = self.start - x;
        let max_dists = x - self.end;

        if self.contains_point(x) {
            let phi = min_dists.component_max(&max_dists);
            let axis = phi.imax();
            let sign = if max_dists[axis] >= min_dists[axis] { 1. } else { -1. };
            TV::ith(axis, sign)
        } else {
            min_dists
                .zip_map(&max_dists, |min, max| {
                    if max > min && max > 0. {
                        max
                    } else if min > 0. {
                        -min
                    } else {
                        0.
                    }
                })
                .normalize()
        }
    }

    fn mass_properties(&self) -> Option<(T, Mat)> {
        let s = self.size();
        let volume = s.product();
        let sq = s.component_mul(&s);
        let inertia = TV::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y) * (volume / 12.);
        Some((volume, Mat::from_diagonal(&inertia)))
    }
}

pub struct Sphere {
    pub center: TV,
    pub radius: T,
}

impl ImplicitObject for Sphere {
    fn signed_distance(&self, x: &TV) -> T {
        (x - self.center).magnitude() - self.radius
    }

    fn normal(&self, x: &TV) -> TV {
        (x - self.center)
            .try_normalize(T::EPSILON)
            .unwrap_or_else(|| TV::y())
    }

    fn mass_properties(&self) -> Option<(T, Mat)> {
        let r = self.radius;
        let volume = 4. / 3. * std::f64::consts::PI * r * r * r;
        Some((volume, Mat::identity() * (0.4 * volume * r * r)))
    }
}

/// The half-space below a plane.
pub struct Plane {
    pub point: TV,
    /// Outward unit normal.
    pub normal: TV,
}

impl ImplicitObject for Plane {
    fn signed_distance(&self, x: &TV) -> T {
        (x - self.point).dot(&self.normal)
    }

    fn normal(&self, _x: &TV) -> TV {
        self.normal
    }

    fn mass_properties(&self) -> Option<(T, Mat)> {
        None
    }
}

pub struct Invert<O>(pub O);

impl<O: ImplicitObject> ImplicitObject for Invert<O> {
    fn signed_distance(&self, x: &TV) -> T {
        -self.0.signed_distance(x)
    }

    fn normal(&self, x: &TV) -> TV {
        -self.0.normal(x)
    }

    fn mass_properties(&self) -> Option<(T, Mat)> {
        None
    }
}

/// Serializable description of a body shape, in the body's local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeDesc {
    Sphere { radius: T },
    Box { half_extents: TV },
    Plane { normal: TV },
}

impl ShapeDesc {
    pub fn build(&self, inverted: bool) -> Box<dyn ImplicitObject> {
        match (self, inverted) {
            (ShapeDesc::Sphere { radius }, false) => Box::new(sphere(*radius)),
            (ShapeDesc::Sphere { radius }, true) => Box::new(Invert(sphere(*radius))),
            (ShapeDesc::Box { half_extents }, false) => Box::new(-half_extents..*half_extents),
            (ShapeDesc::Box { half_extents }, true) => {
                Box::new(Invert(-half_extents..*half_extents))
            }
            (ShapeDesc::Plane { normal }, false) => Box::new(plane(normal)),
            (ShapeDesc::Plane { normal }, true) => Box::new(Invert(plane(normal))),
        }
    }
}

fn sphere(radius: T) -> Sphere {
    Sphere {
        center: TV::zeros(),
        radius,
    }
}

fn plane(normal: &TV) -> Plane {
    Plane {
        point: TV::zeros(),
        normal: normal.try_normalize(T::EPSILON).unwrap_or_else(TV::y),
    }
}
