use crate::config::Config;
use crate::math::*;
use crate::mesh::{Grid, ShapeKind};
use crate::particles::{Particles, SplitMergeStats, TopologyEvent};
use crate::phase::Phase;
use crate::rigid::RigidBody;
use crate::statistics::{SimulationStatistics, Summary};
use crate::step::{step, Grids, StepReport};
use serde::Serialize;
use tracing::{debug, info, info_span};

/// Bumped whenever the layout of [`Snapshot`] changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Particles, bodies and grid fields advanced frame by frame.
pub struct Simulation {
    pub config: Config,
    pub grids: Grids,
    pub particles: Particles,
    pub bodies: Vec<RigidBody>,
    pub phase: Phase,
    pub frame: usize,
    /// Topology edits of the last simulated frame.
    pub events: Vec<TopologyEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub split_merge: SplitMergeStats,
    pub steps: Vec<StepReport>,
    pub summary: Option<Summary>,
}

/// Everything needed to inspect or render one frame.
#[derive(Serialize)]
pub struct Snapshot<'a> {
    pub version: u32,
    pub frame: usize,
    pub grid: Grid,
    pub primal_shape: ShapeKind,
    pub dual_shape: ShapeKind,
    pub particles: &'a Particles,
    pub phase: &'a Phase,
    pub bodies: Vec<BodyPose>,
    pub events: &'a [TopologyEvent],
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BodyPose {
    pub origin: TV,
    pub rotation: na::UnitQuaternion<T>,
    pub velocity: TV,
    pub angular_velocity: TV,
}

impl Simulation {
    /// Builds the grids and bodies of `config` and seeds its scenario.
    pub fn new(config: Config) -> Self {
        let grids = Grids::from_config(&config);
        let mut particles = Particles::with_capacity(config.max_particles);
        let added = config.scenario.populate(
            &mut particles,
            &config.grid(),
            config.samples_per_cell,
            &config.initial_velocity,
        );
        particles.take_events();
        info!(particles = added, volume = particles.total_volume(), "seeded scenario");

        let bodies = config.bodies.iter().map(RigidBody::from_config).collect();
        let phase = Phase::new(grids.primal.node_count(), grids.dual.node_count());
        Simulation {
            config,
            grids,
            particles,
            bodies,
            phase,
            frame: 0,
            events: Vec::new(),
        }
    }

    /// Splits and merges the particles once, then runs every substep of a frame.
    pub fn simulate_frame(&mut self) -> FrameReport {
        let _span = info_span!("frame", frame = self.frame).entered();
        let dt = self.config.dt();
        let mut report = FrameReport::default();

        report.split_merge = self
            .particles
            .split_and_merge(self.grids.primal.as_ref(), &self.config.split_merge);
        debug!(
            splits = report.split_merge.splits,
            merges = report.split_merge.merges,
            count = self.particles.count(),
            "split and merge"
        );

        for substep in 0..self.config.substeps {
            let _span = info_span!("substep", substep).entered();
            for body in self.bodies.iter_mut() {
                body.predict_velocity(dt, &self.config.gravity);
            }
            report.steps.push(step(
                &self.config,
                &self.grids,
                &self.particles,
                &mut self.bodies,
                &mut self.phase,
                dt,
            ));
            self.particles.advect(
                self.grids.primal.as_ref(),
                self.grids.dual.as_ref(),
                &self.phase,
                dt,
                &self.config.domain,
                self.config.grain_diameter,
            );
            for body in self.bodies.iter_mut() {
                body.integrate(dt);
            }
        }

        let summary = self.particles.summary();
        info!(
            count = self.particles.count(),
            volume = summary.volume,
            energy = summary.energy,
            momentum = ?summary.linear_momentum,
            "frame done"
        );
        report.summary = Some(summary);
        self.events = self.particles.take_events();
        self.frame += 1;
        report
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            version: SNAPSHOT_VERSION,
            frame: self.frame,
            grid: self.config.grid(),
            primal_shape: self.config.primal_shape,
            dual_shape: self.config.dual_shape,
            particles: &self.particles,
            phase: &self.phase,
            bodies: self
                .bodies
                .iter()
                .map(|b| BodyPose {
                    origin: b.level_set.origin,
                    rotation: b.level_set.rotation,
                    velocity: b.velocity,
                    angular_velocity: b.angular_velocity,
                })
                .collect(),
            events: &self.events,
        }
    }
}
