use crate::math::*;
use crate::mesh::Grid;
use crate::particles::Particles;
use crate::util::RangeExt;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Where the material starts, as a density predicate sampled by [`Particles::generate`].
pub trait InitialCondition: Sync {
    /// Material density at `x`, in `[0, 1]`.
    fn density(&self, x: &TV) -> T;

    /// Seeds `particles` with this condition, returning how many were added.
    fn add_particles(
        &self,
        particles: &mut Particles,
        grid: &Grid,
        samples_per_cell: usize,
        orientation: &Mat,
    ) -> usize {
        particles.generate(|x| self.density(x), samples_per_cell, grid, true, orientation)
    }
}

pub struct Block {
    pub size: Range<TV>,
}

impl Default for Block {
    fn default() -> Self {
        Block {
            size: TV::from_element(0.25)..TV::from_element(0.75),
        }
    }
}

impl InitialCondition for Block {
    fn density(&self, x: &TV) -> T {
        if self.size.contains_point(x) {
            1.
        } else {
            0.
        }
    }
}

pub struct Sphere {
    pub center: TV,
    pub radius: T,
}

impl Default for Sphere {
    fn default() -> Self {
        Sphere {
            center: TV::from_element(0.5),
            radius: 0.25,
        }
    }
}

impl InitialCondition for Sphere {
    fn density(&self, x: &TV) -> T {
        if (x - self.center).norm_squared() < self.radius * self.radius {
            1.
        } else {
            0.
        }
    }
}

/// Initial condition selected by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Scenario {
    Empty,
    Block { min: TV, max: TV },
    Sphere { center: TV, radius: T },
}

impl Default for Scenario {
    fn default() -> Self {
        Scenario::Block {
            min: TV::from_element(0.25),
            max: TV::from_element(0.75),
        }
    }
}

impl Scenario {
    pub fn build(&self) -> Option<Box<dyn InitialCondition>> {
        match self {
            Scenario::Empty => None,
            Scenario::Block { min, max } => Some(Box::new(Block { size: *min..*max })),
            Scenario::Sphere { center, radius } => Some(Box::new(Sphere {
                center: *center,
                radius: *radius,
            })),
        }
    }

    /// Seeds `particles`, moving with `velocity`.
    pub fn populate(
        &self,
        particles: &mut Particles,
        grid: &Grid,
        samples_per_cell: usize,
        velocity: &TV,
    ) -> usize {
        let before = particles.count();
        let added = match self.build() {
            Some(condition) => condition.add_particles(
                particles,
                grid,
                samples_per_cell,
                &(Mat::identity() / DIM as T),
            ),
            None => 0,
        };
        particles.velocity[before..]
            .iter_mut()
            .for_each(|v| *v = *velocity);
        added
    }
}
