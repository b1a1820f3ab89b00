use crate::math::*;
use serde::{Deserialize, Serialize};

/// Grid-resident fields of the granular phase, on the full (not active-compacted) grids.
/// `velocity` and `geo_proj` live on the primal nodes, everything else on the dual nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase {
    /// Volume fraction
    pub fraction: Vec<T>,
    pub velocity: Vec<TV>,
    /// Displacement from the volume correction.
    pub geo_proj: Vec<TV>,
    /// Contact stresses, in the isotropic basis.
    pub stresses: Vec<Vec6>,
    /// Bulk contact impulses in the basis of the contact problem. Warm start of the next step.
    pub impulses: Vec<Vec6>,
    pub sym_grad: Vec<Vec6>,
    pub spin_grad: Vec<TV>,
}

impl Phase {
    pub fn new(primal_nodes: usize, dual_nodes: usize) -> Self {
        Phase {
            fraction: vec![0.; dual_nodes],
            velocity: vec![TV::zeros(); primal_nodes],
            geo_proj: vec![TV::zeros(); primal_nodes],
            stresses: vec![Vec6::zeros(); dual_nodes],
            impulses: vec![Vec6::zeros(); dual_nodes],
            sym_grad: vec![Vec6::zeros(); dual_nodes],
            spin_grad: vec![TV::zeros(); dual_nodes],
        }
    }

    /// Resizes every field, keeping values of nodes that still exist.
    pub fn resize(&mut self, primal_nodes: usize, dual_nodes: usize) {
        self.fraction.resize(dual_nodes, 0.);
        self.velocity.resize(primal_nodes, TV::zeros());
        self.geo_proj.resize(primal_nodes, TV::zeros());
        self.stresses.resize(dual_nodes, Vec6::zeros());
        self.impulses.resize(dual_nodes, Vec6::zeros());
        self.sym_grad.resize(dual_nodes, Vec6::zeros());
        self.spin_grad.resize(dual_nodes, TV::zeros());
    }
}
