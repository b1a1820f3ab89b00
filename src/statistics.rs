use crate::math::*;
use crate::particles::Particles;
use itertools::izip;
use serde::Serialize;

/// Conserved quantities of a particle set (unit density, so mass is volume).
pub trait SimulationStatistics {
    fn total_volume(&self) -> T;
    fn total_linear_momentum(&self) -> TV;
    fn total_angular_momentum(&self) -> TV;
    fn total_energy(&self) -> T;

    fn summary(&self) -> Summary {
        Summary {
            volume: self.total_volume(),
            linear_momentum: self.total_linear_momentum(),
            angular_momentum: self.total_angular_momentum(),
            energy: self.total_energy(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub volume: T,
    pub linear_momentum: TV,
    pub angular_momentum: TV,
    pub energy: T,
}

impl SimulationStatistics for Particles {
    fn total_volume(&self) -> T {
        self.volume.iter().sum()
    }

    fn total_linear_momentum(&self) -> TV {
        self.volume
            .iter()
            .zip(&self.velocity)
            .map(|(&m, v)| m * v)
            .sum()
    }

    fn total_angular_momentum(&self) -> TV {
        izip!(&self.volume, &self.velocity, &self.position)
            .map(|(&m, v, x)| m * x.cross(v))
            .sum()
    }

    /// Kinetic energy.
    fn total_energy(&self) -> T {
        self.volume
            .iter()
            .zip(&self.velocity)
            .map(|(&m, v)| 0.5 * m * v.dot(v))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::Particle;

    #[test]
    fn two_particles() {
        let mut particles = Particles::with_capacity(2);
        let mut a = Particle::new(2., TV::new(1., 0., 0.), Mat::identity());
        a.velocity = TV::new(0., 1., 0.);
        let mut b = Particle::new(1., TV::new(-1., 0., 0.), Mat::identity());
        b.velocity = TV::new(0., -2., 0.);
        particles.push(a);
        particles.push(b);

        let s = particles.summary();
        assert_eq!(s.volume, 3.);
        assert_eq!(s.linear_momentum, TV::zeros());
        assert_eq!(s.angular_momentum, TV::new(0., 0., 4.));
        assert_eq!(s.energy, 3.);
    }
}
