//! Rigid bodies immersed in the granular phase: their level sets, their dynamics, and the
//! per-step coupling records built from them.

mod coupling;

pub use coupling::RigidBodyData;

use crate::collisions::{ImplicitObject, ShapeDesc};
use crate::math::*;
use serde::{Deserialize, Serialize};

/// Inverse inertia blocks smaller than this make a body kinematic.
const KINEMATIC_TOL: T = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    pub shape: ShapeDesc,
    /// Material fills the inside of the shape and the body the outside.
    pub inverted: bool,
    pub origin: TV,
    /// Scaled rotation axis.
    pub rotation: TV,
    pub scale: T,
    pub velocity: TV,
    pub angular_velocity: TV,
    /// `None` makes the body kinematic.
    pub density: Option<T>,
}

impl Default for BodyConfig {
    fn default() -> Self {
        BodyConfig {
            shape: ShapeDesc::Sphere { radius: 0.1 },
            inverted: false,
            origin: TV::zeros(),
            rotation: TV::zeros(),
            scale: 1.,
            velocity: TV::zeros(),
            angular_velocity: TV::zeros(),
            density: None,
        }
    }
}

/// A posed implicit shape.
pub struct LevelSet {
    shape: Box<dyn ImplicitObject>,
    pub origin: TV,
    pub rotation: na::UnitQuaternion<T>,
    pub scale: T,
    /// Mass and local inertia tensor, `None` for infinite mass.
    mass: Option<(T, Mat)>,
}

impl std::fmt::Debug for LevelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelSet")
            .field("origin", &self.origin)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("mass", &self.mass)
            .finish()
    }
}

impl LevelSet {
    pub fn new(shape: Box<dyn ImplicitObject>, origin: TV, scale: T) -> Self {
        LevelSet {
            shape,
            origin,
            rotation: na::UnitQuaternion::identity(),
            scale,
            mass: None,
        }
    }

    pub fn from_config(config: &BodyConfig) -> Self {
        let shape = config.shape.build(config.inverted);
        let mass = match (config.density, shape.mass_properties()) {
            (Some(density), Some((volume, inertia))) => {
                let s3 = config.scale.powi(3);
                Some((density * volume * s3, inertia * density * s3 * config.scale.powi(2)))
            }
            _ => None,
        };
        LevelSet {
            shape,
            origin: config.origin,
            rotation: na::UnitQuaternion::from_scaled_axis(config.rotation),
            scale: config.scale,
            mass,
        }
    }

    fn to_local(&self, x: &TV) -> TV {
        self.rotation.inverse_transform_vector(&(x - self.origin)) / self.scale
    }

    pub fn signed_distance(&self, x: &TV) -> T {
        self.shape.signed_distance(&self.to_local(x)) * self.scale
    }

    pub fn normal(&self, x: &TV) -> TV {
        self.rotation * self.shape.normal(&self.to_local(x))
    }

    /// Ramp from 1 on (and inside) the surface to 0 at distance `band` outside.
    pub fn volume_fraction(&self, x: &TV, band: T) -> T {
        (1. - self.signed_distance(x) / band).max(0.).min(1.)
    }

    /// Gradient of [`LevelSet::volume_fraction`].
    pub fn fraction_gradient(&self, x: &TV, band: T) -> TV {
        let d = self.signed_distance(x);
        if d > 0. && d < band {
            -self.normal(x) / band
        } else {
            TV::zeros()
        }
    }

    /// Inverse of the 6x6 mass matrix acting on (linear, angular) velocities, in world frame.
    pub fn inverse_inertia(&self) -> Mat6 {
        let mut out = Mat6::zeros();
        if let Some((mass, inertia)) = &self.mass {
            out.fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(Mat::identity() / *mass));
            let r = self.rotation.to_rotation_matrix();
            if let Some(inv) = inertia.try_inverse() {
                out.fixed_view_mut::<3, 3>(3, 3)
                    .copy_from(&(r.matrix() * inv * r.matrix().transpose()));
            }
        }
        out
    }
}

/// A rigid body with its velocities and the contact stresses of the previous solve.
#[derive(Debug)]
pub struct RigidBody {
    pub level_set: LevelSet,
    pub velocity: TV,
    pub angular_velocity: TV,
    /// Contact stresses per global dual node, used to warm-start the next solve.
    pub stresses: Vec<Vec6>,
}

impl RigidBody {
    pub fn new(level_set: LevelSet) -> Self {
        RigidBody {
            level_set,
            velocity: TV::zeros(),
            angular_velocity: TV::zeros(),
            stresses: Vec::new(),
        }
    }

    pub fn from_config(config: &BodyConfig) -> Self {
        RigidBody {
            velocity: config.velocity,
            angular_velocity: config.angular_velocity,
            ..Self::new(LevelSet::from_config(config))
        }
    }

    pub fn twist(&self) -> Vec6 {
        let mut v = Vec6::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.velocity);
        v.fixed_rows_mut::<3>(3).copy_from(&self.angular_velocity);
        v
    }

    pub fn set_twist(&mut self, v: &Vec6) {
        self.velocity = v.fixed_rows::<3>(0).into_owned();
        self.angular_velocity = v.fixed_rows::<3>(3).into_owned();
    }

    /// Bodies with a negligible inverse inertia only constrain the material.
    pub fn is_kinematic(&self) -> bool {
        self.level_set.inverse_inertia().amax() < KINEMATIC_TOL
    }

    /// Adds gravity to the velocity of dynamic bodies.
    pub fn predict_velocity(&mut self, dt: T, gravity: &TV) {
        if !self.is_kinematic() {
            self.velocity += dt * gravity;
        }
    }

    /// Moves the body with its current velocities.
    pub fn integrate(&mut self, dt: T) {
        let ls = &mut self.level_set;
        ls.origin += dt * self.velocity;
        ls.rotation = na::UnitQuaternion::from_scaled_axis(dt * self.angular_velocity) * ls.rotation;
    }

    pub fn resize_stresses(&mut self, dual_nodes: usize) {
        self.stresses.resize(dual_nodes, Vec6::zeros());
    }
}
