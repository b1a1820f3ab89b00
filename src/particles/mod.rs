//! Lagrangian particle storage.
//!
//! Particles live in parallel dense arrays indexed `0..count()`. The arrays never grow past a
//! fixed capacity: splits that would exceed it are silently dropped. Removal swaps the last
//! particle into the freed slot, so indices are only stable between topology edits; every edit
//! is recorded in [`EventLog`] so that other particle-indexed fields can be replayed.

mod events;
mod generate;
mod split_merge;
mod transfer;

pub use events::{EventLog, TopologyEvent};
pub use split_merge::{SplitMergeParams, SplitMergeStats};
pub use transfer::{DualIntegrals, PrimalIntegrals, TransferScheme};

use crate::math::*;
use serde::{Deserialize, Serialize};

/// A single particle, by value. Used to move particles in and out of the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub volume: T,
    pub position: TV,
    pub velocity: TV,
    /// Covariance of the sample points represented by this particle.
    pub frame: Mat,
    /// Fabric tensor, trace one.
    pub orientation: Mat,
    /// APIC velocity gradient.
    pub affine: Mat,
    pub inertia: T,
    pub cohesion: T,
}

impl Particle {
    pub fn new(volume: T, position: TV, frame: Mat) -> Self {
        Particle {
            volume,
            position,
            velocity: TV::zeros(),
            frame,
            orientation: Mat::identity() / DIM as T,
            affine: Mat::zeros(),
            inertia: 0.,
            cohesion: 1.,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particles {
    capacity: usize,
    pub volume: Vec<T>,
    pub position: Vec<TV>,
    pub velocity: Vec<TV>,
    pub frame: Vec<Mat>,
    pub orientation: Vec<Mat>,
    pub affine: Vec<Mat>,
    pub inertia: Vec<T>,
    pub cohesion: Vec<T>,
    #[serde(skip)]
    pub events: EventLog,
}

impl Particles {
    pub fn with_capacity(capacity: usize) -> Self {
        Particles {
            capacity,
            volume: Vec::with_capacity(capacity),
            position: Vec::with_capacity(capacity),
            velocity: Vec::with_capacity(capacity),
            frame: Vec::with_capacity(capacity),
            orientation: Vec::with_capacity(capacity),
            affine: Vec::with_capacity(capacity),
            inertia: Vec::with_capacity(capacity),
            cohesion: Vec::with_capacity(capacity),
            events: EventLog::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.volume.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    pub fn get(&self, i: usize) -> Particle {
        Particle {
            volume: self.volume[i],
            position: self.position[i],
            velocity: self.velocity[i],
            frame: self.frame[i],
            orientation: self.orientation[i],
            affine: self.affine[i],
            inertia: self.inertia[i],
            cohesion: self.cohesion[i],
        }
    }

    pub fn set(&mut self, i: usize, p: Particle) {
        self.volume[i] = p.volume;
        self.position[i] = p.position;
        self.velocity[i] = p.velocity;
        self.frame[i] = p.frame;
        self.orientation[i] = p.orientation;
        self.affine[i] = p.affine;
        self.inertia[i] = p.inertia;
        self.cohesion[i] = p.cohesion;
    }

    /// Appends a particle, returning its index, or `None` if the store is full.
    /// Does not log anything: this is how scenarios populate the store.
    pub fn push(&mut self, p: Particle) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.volume.push(p.volume);
        self.position.push(p.position);
        self.velocity.push(p.velocity);
        self.frame.push(p.frame);
        self.orientation.push(p.orientation);
        self.affine.push(p.affine);
        self.inertia.push(p.inertia);
        self.cohesion.push(p.cohesion);
        Some(self.count() - 1)
    }

    /// Removes particle `i` by moving the last particle into its slot.
    pub fn remove(&mut self, i: usize) {
        let last = self.count() - 1;
        self.volume.swap_remove(i);
        self.position.swap_remove(i);
        self.velocity.swap_remove(i);
        self.frame.swap_remove(i);
        self.orientation.swap_remove(i);
        self.affine.swap_remove(i);
        self.inertia.swap_remove(i);
        self.cohesion.swap_remove(i);
        self.events.log(TopologyEvent::Remove {
            removed: i,
            replacement: last,
        });
    }

    /// Removes every particle listed in `dead`, returning for each particle index before the
    /// call its index afterwards (or `None` if it was removed).
    pub fn compact(&mut self, dead: &[usize]) -> Vec<Option<usize>> {
        let before = self.count();
        let mut dead = dead.to_vec();
        dead.sort_unstable();
        dead.dedup();

        // Descending order: the last slot is never a pending removal other than the current one.
        let mut slots: Vec<usize> = (0..before).collect();
        for &i in dead.iter().rev() {
            self.remove(i);
            slots.swap_remove(i);
        }

        let mut table = vec![None; before];
        for (now, &was) in slots.iter().enumerate() {
            table[was] = Some(now);
        }
        table
    }

    /// Forgets the events recorded so far, returning them.
    pub fn take_events(&mut self) -> Vec<TopologyEvent> {
        self.events.take()
    }

    pub fn total_volume(&self) -> T {
        self.volume.iter().sum()
    }

    pub fn mean_volume(&self) -> T {
        if self.count() == 0 {
            0.
        } else {
            self.total_volume() / self.count() as T
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn line_of_particles(n: usize, capacity: usize) -> Particles {
        let mut particles = Particles::with_capacity(capacity);
        for i in 0..n {
            let mut p = Particle::new(1. + i as T, TV::new(i as T, 0., 0.), Mat::identity());
            p.velocity = TV::new(0., i as T, 0.);
            particles.push(p);
        }
        particles
    }

    #[test]
    fn push_respects_capacity() {
        let mut particles = line_of_particles(3, 3);
        assert!(particles.is_full());
        assert_eq!(particles.push(Particle::new(1., TV::zeros(), Mat::identity())), None);
        assert_eq!(particles.count(), 3);
    }

    #[test]
    fn remove_swaps_last_and_logs() {
        let mut particles = line_of_particles(4, 10);
        let mut external: Vec<T> = particles.volume.clone();

        particles.remove(1);
        assert_eq!(particles.count(), 3);
        assert_eq!(particles.position[1], TV::new(3., 0., 0.));

        particles.events.replay(&mut external);
        assert_eq!(external, particles.volume);
    }

    #[test]
    fn compact_returns_remap() {
        let mut particles = line_of_particles(6, 10);
        let table = particles.compact(&[4, 1, 4]);
        assert_eq!(particles.count(), 4);

        let log_table = particles.events.remap_table(6);
        assert_eq!(table, log_table);
        assert_eq!(table[1], None);
        assert_eq!(table[4], None);
        for (was, now) in table.iter().enumerate() {
            if let Some(now) = now {
                assert_eq!(particles.position[*now], TV::new(was as T, 0., 0.));
            }
        }
    }
}
