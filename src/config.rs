use crate::contact::SolverOptions;
use crate::forms::MaterialParams;
use crate::initial_condition::Scenario;
use crate::math::*;
use crate::mesh::{BoundaryMapper, Grid, ShapeKind};
use crate::particles::{SplitMergeParams, TransferScheme};
use crate::rigid::BodyConfig;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

/// Everything a run needs, loadable from JSON. Missing keys take their default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub domain: Range<TV>,
    /// Cells along each axis.
    pub resolution: UV,
    pub primal_shape: ShapeKind,
    pub dual_shape: ShapeKind,

    pub fps: T,
    pub substeps: usize,
    pub frames: usize,
    pub gravity: TV,

    pub mu: T,
    pub mu_dynamic: T,
    pub i0: T,
    pub grain_diameter: T,
    pub cohesion: T,
    pub cohesion_threshold: T,
    pub viscosity: T,
    pub anisotropy: T,

    pub samples_per_cell: usize,
    pub transfer: TransferScheme,
    pub max_particles: usize,
    pub split_merge: SplitMergeParams,

    /// Push material out of over-full nodes before the friction solve.
    pub volume_correction: bool,
    pub max_fraction: T,
    /// Face name (`left`, `right`, `bottom`, `top`, `back`, `front`) to boundary type.
    pub boundary: HashMap<String, String>,
    /// Solve for the frictional stresses inside the material, not only against bodies.
    pub bulk_contact: bool,
    pub bodies: Vec<BodyConfig>,
    pub scenario: Scenario,
    pub initial_velocity: TV,

    pub cg_tolerance: T,
    pub cg_max_iterations: usize,
    pub lcp_tolerance: T,
    pub lcp_max_iterations: usize,
    pub solver: SolverOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            domain: TV::zeros()..TV::from_element(1.),
            resolution: UV::from_element(10),
            primal_shape: ShapeKind::Linear,
            dual_shape: ShapeKind::Linear,
            fps: 60.,
            substeps: 1,
            frames: 100,
            gravity: TV::new(0., -9.81, 0.),
            mu: 0.5,
            mu_dynamic: 0.5,
            i0: 0.3,
            grain_diameter: 1e-3,
            cohesion: 0.,
            cohesion_threshold: 0.,
            viscosity: 0.,
            anisotropy: 0.,
            samples_per_cell: 8,
            transfer: TransferScheme::default(),
            max_particles: 1 << 18,
            split_merge: SplitMergeParams::default(),
            volume_correction: true,
            max_fraction: 1.,
            boundary: HashMap::new(),
            bulk_contact: true,
            bodies: Vec::new(),
            scenario: Scenario::default(),
            initial_velocity: TV::zeros(),
            cg_tolerance: 1e-8,
            cg_max_iterations: 500,
            lcp_tolerance: 1e-8,
            lcp_max_iterations: 200,
            solver: SolverOptions::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        std::fs::read(path)
            .wrap_err_with(|| format!("Failed to read config file: {:?}", path))
            .and_then(|json| Self::from_json(&json))
            .wrap_err_with(|| format!("Invalid config file: {:?}", path))
    }

    pub fn from_json(json: &[u8]) -> eyre::Result<Self> {
        let config: Config =
            serde_json::from_slice(json).wrap_err("Serde failed to deserialize JSON.")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(self.fps > 0., "fps must be positive, got {}", self.fps);
        eyre::ensure!(self.substeps > 0, "substeps must be positive");
        eyre::ensure!(
            self.resolution.iter().all(|&r| r > 0),
            "resolution must be positive, got {:?}",
            self.resolution
        );
        let size = self.domain.end - self.domain.start;
        eyre::ensure!(
            size.iter().all(|&s| s > 0.),
            "domain must have positive extent, got {:?}",
            self.domain
        );
        eyre::ensure!(self.max_fraction > 0., "max_fraction must be positive");
        Ok(())
    }

    /// Length of one substep.
    pub fn dt(&self) -> T {
        1. / (self.fps * self.substeps as T)
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.resolution, self.domain.clone())
    }

    pub fn boundary_mapper(&self) -> BoundaryMapper {
        BoundaryMapper::from_names(self.boundary.iter())
    }

    pub fn material(&self) -> MaterialParams {
        MaterialParams {
            viscosity: self.viscosity,
            mu: self.mu,
            mu_dynamic: self.mu_dynamic,
            i0: self.i0,
            cohesion: self.cohesion,
            cohesion_threshold: self.cohesion_threshold,
            anisotropy: self.anisotropy,
        }
    }
}
