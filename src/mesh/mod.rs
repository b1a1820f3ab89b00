//! Shape-function interface consumed by the core, and the regular-grid backend used by the
//! driver and the tests.
//!
//! The core never looks at the concrete geometry: everything goes through [`ShapeFunction`],
//! so an octree or tetrahedral backend only needs to implement the trait.

pub mod boundary;
pub mod grid;
mod shape;

pub use boundary::{BoundaryInfo, BoundaryMapper, BoundaryType};
pub use grid::Grid;
pub use shape::{ConstantShape, LinearShape};

use crate::math::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A point located inside a mesh cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub cell: usize,
    /// Local coordinates inside the cell, in `[0, 1]^3`.
    pub coords: TV,
}

/// Nodes influencing a location, with their interpolation coefficients.
#[derive(Debug, Clone, Default)]
pub struct Interpolation {
    pub nodes: NodeList,
    pub coeffs: SmallVec<[T; 8]>,
}

/// Gradient of each shape function listed by [`Interpolation`], in the same order.
pub type Derivatives = SmallVec<[TV; 8]>;

/// Quadrature points of a cell: world position and weight.
pub type QuadPoints = SmallVec<[(TV, T); 8]>;

/// Capability interface of a discretization (a mesh together with its shape functions).
pub trait ShapeFunction: Send + Sync {
    /// Number of degrees of freedom (nodes) of this discretization.
    fn node_count(&self) -> usize;

    fn cell_count(&self) -> usize;

    /// Characteristic cell size.
    fn cell_size(&self) -> T;

    fn locate(&self, x: &TV) -> Location;

    /// Nodes whose shape functions are non-zero in the cell of `loc`.
    fn list_nodes(&self, loc: &Location) -> NodeList;

    fn interpolate(&self, loc: &Location) -> Interpolation;

    fn derivatives(&self, loc: &Location) -> Derivatives;

    fn quadrature_points(&self, cell: usize) -> QuadPoints;

    fn cell_center(&self, cell: usize) -> TV;

    fn node_position(&self, node: usize) -> TV;

    /// Integral of each shape function over the domain.
    fn lumped_mass(&self) -> Vec<T>;

    /// Classifies a node with respect to the domain boundary.
    fn boundary_info(&self, node: usize, mapper: &BoundaryMapper) -> BoundaryInfo;

    /// Locates `x` and returns the coefficient of each node in one go.
    fn interpolate_at(&self, x: &TV) -> Interpolation {
        self.interpolate(&self.locate(x))
    }
}

/// Which shape functions to put on top of the regular grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    /// Trilinear, one node per grid vertex.
    Linear,
    /// Piecewise constant, one node per cell.
    Constant,
}

impl Default for ShapeKind {
    fn default() -> Self {
        ShapeKind::Linear
    }
}

impl ShapeKind {
    /// Selects the backend once, at configuration time.
    pub fn build(self, grid: Grid) -> Box<dyn ShapeFunction> {
        match self {
            ShapeKind::Linear => Box::new(LinearShape::new(grid)),
            ShapeKind::Constant => Box::new(ConstantShape::new(grid)),
        }
    }
}

/// Evaluates a nodal field at `x`.
pub fn interpolate_field<S, V>(shape: &S, field: &[V], x: &TV) -> V
where
    S: ShapeFunction + ?Sized,
    V: std::ops::Add<Output = V> + std::ops::Mul<T, Output = V> + Copy + num::Zero,
{
    let itp = shape.interpolate_at(x);
    itp.nodes
        .iter()
        .zip(&itp.coeffs)
        .fold(V::zero(), |acc, (&n, &c)| acc + field[n] * c)
}
