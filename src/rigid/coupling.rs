use super::RigidBody;
use crate::active::Active;
use crate::forms::{assemble, BlockMatrix, NodeWeights, Sample, Space};
use crate::math::*;
use crate::mesh::{Location, ShapeFunction};
use rayon::prelude::*;
use smallvec::smallvec;

/// Per-step coupling record of one rigid body.
#[derive(Debug, Clone)]
pub struct RigidBodyData {
    /// Contact nodes of the body, a subset of the dual grid.
    pub nodes: Active,
    /// Relative velocity, in stress space, of each body node as a function of the active primal
    /// velocities.
    pub jacobian: BlockMatrix<6, 3>,
    /// Maps the body twist to the velocity of each active primal node.
    pub projection: Vec<Mat36>,
    /// `jacobian * projection`, one block per body node.
    pub coupling: Vec<Mat6>,
    /// Body volume fraction integrated against each active dual shape function.
    pub volume: Vec<T>,
    pub inverse_inertia: Mat6,
    pub kinematic: bool,
}

/// Quadrature point of the band, with the outward normal of the material there.
type BandSample = (Sample, TV);

impl RigidBodyData {
    /// Builds the coupling record of `body` for the active material cells of this step.
    ///
    /// A material cell couples with the body when one of its corners is fully inside the body's
    /// volume-fraction ramp and another is not. The Jacobian sums the cell quadrature over the
    /// ramp and a node-centred term at each body node.
    pub fn compute(
        body: &RigidBody,
        primal: &dyn ShapeFunction,
        dual: &dyn ShapeFunction,
        active_primal: &Active,
        active_dual: &Active,
        dual_lumped: &[T],
    ) -> Self {
        let ls = &body.level_set;
        let band = primal.cell_size();

        let boundary_cells: Vec<usize> = active_primal
            .cells
            .par_iter()
            .copied()
            .filter(|&cell| {
                let loc = Location {
                    cell,
                    coords: TV::from_element(0.5),
                };
                let corners = primal.list_nodes(&loc);
                let inside = |&n: &usize| ls.volume_fraction(&primal.node_position(n), band) >= 1.;
                corners.iter().any(inside) && !corners.iter().all(inside)
            })
            .collect();

        let nodes = Active::compute(dual, &boundary_cells);

        // quadrature points of the material cells that see the body
        let band_points: Vec<(TV, T, T)> = active_primal
            .cells
            .par_iter()
            .flat_map_iter(|&cell| primal.quadrature_points(cell).into_iter())
            .filter_map(|(x, w)| {
                let phi = ls.volume_fraction(&x, band);
                if phi > 0. {
                    Some((x, w, phi))
                } else {
                    None
                }
            })
            .collect();

        let mut volume = vec![0.; active_dual.count()];
        for (x, w, phi) in &band_points {
            let itp = NodeWeights::at(dual, active_dual, x);
            for (&i, &c) in itp.nodes.iter().zip(&itp.coeffs) {
                volume[i] += w * c * phi;
            }
        }

        let in_cells = band_points.par_iter().filter_map(|&(x, w, _)| {
            let covered = dual
                .interpolate_at(&x)
                .nodes
                .iter()
                .all(|&n| nodes.local(n).is_some());
            if !covered {
                return None;
            }
            let sample = Sample {
                position: x,
                weight: w,
                primal: NodeWeights::at(primal, active_primal, &x),
                dual: NodeWeights::at(dual, &nodes, &x),
            };
            Some((sample, -ls.fraction_gradient(&x, band)))
        });
        let at_nodes = nodes.rev_indices.par_iter().enumerate().map(|(i, &g)| {
            let x = dual.node_position(g);
            let sample = Sample {
                position: x,
                weight: dual_lumped[g],
                primal: NodeWeights::at(primal, active_primal, &x),
                dual: NodeWeights {
                    nodes: smallvec![i],
                    coeffs: smallvec![1.],
                    grads: smallvec![TV::zeros()],
                },
            };
            (sample, -ls.fraction_gradient(&x, band))
        });
        let (samples, normals): (Vec<Sample>, Vec<TV>) = in_cells
            .chain(at_nodes)
            .filter(|(_, n): &BandSample| n.norm_squared() > 0.)
            .unzip();

        let jacobian = assemble::<6, 3, _>(
            Space::Dual,
            Space::Primal,
            nodes.count(),
            active_primal.count(),
            &samples,
            false,
            |k, a, b| {
                let s = &samples[k];
                sym_block(&normals[k]) * (s.weight * s.dual.coeffs[a] * s.primal.coeffs[b])
            },
        );

        let projection: Vec<Mat36> = active_primal
            .rev_indices
            .par_iter()
            .map(|&n| {
                let r = primal.node_position(n) - ls.origin;
                let mut p = Mat36::zeros();
                p.fixed_view_mut::<3, 3>(0, 0).copy_from(&Mat::identity());
                p.fixed_view_mut::<3, 3>(0, 3).copy_from(&-cross_matrix(&r));
                p
            })
            .collect();

        let coupling: Vec<Mat6> = (0..nodes.count())
            .into_par_iter()
            .map(|i| {
                let (cols, vals) = jacobian.row(i);
                cols.iter()
                    .zip(vals)
                    .fold(Mat6::zeros(), |acc, (&j, b)| acc + b * projection[j])
            })
            .collect();

        RigidBodyData {
            nodes,
            jacobian,
            projection,
            coupling,
            volume,
            inverse_inertia: ls.inverse_inertia(),
            kinematic: body.is_kinematic(),
        }
    }

    pub fn count(&self) -> usize {
        self.nodes.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collisions::ShapeDesc;
    use crate::mesh::{Grid, LinearShape};
    use crate::rigid::{BodyConfig, LevelSet};

    fn setup() -> (LinearShape, Active, RigidBody) {
        let shape = LinearShape::new(Grid::new(UV::new(4, 4, 4), TV::zeros()..TV::from_element(1.)));
        let cells: Vec<usize> = (0..shape.cell_count()).collect();
        let active = Active::compute(&shape, &cells);
        let body = RigidBody::new(LevelSet::from_config(&BodyConfig {
            shape: ShapeDesc::Plane {
                normal: TV::new(0., 1., 0.),
            },
            origin: TV::new(0., 0.1, 0.),
            ..Default::default()
        }));
        (shape, active, body)
    }

    #[test]
    fn plane_couples_with_lowest_cells() {
        let (shape, active, body) = setup();
        let lumped = shape.lumped_mass();
        let data = RigidBodyData::compute(&body, &shape, &shape, &active, &active, &lumped);

        // fraction is 1 below y = 0.1 and reaches 0 at y = 0.35
        assert!(data.kinematic);
        assert!(data.count() > 0);
        assert!(data
            .nodes
            .cells
            .iter()
            .all(|&c| shape.grid.cell_coord(c).y <= 1));
        for (&n, &v) in active.rev_indices.iter().zip(&data.volume) {
            let y = shape.node_position(n).y;
            assert!(v >= 0. && v <= lumped[n] * (1. + 1e-12));
            if y == 0. {
                assert!(v > 0.5 * lumped[n]);
            }
            if y >= 0.75 {
                assert_eq!(v, 0.);
            }
        }
    }

    #[test]
    fn rigid_motion_has_no_relative_velocity() {
        let (shape, active, body) = setup();
        let lumped = shape.lumped_mass();
        let data = RigidBodyData::compute(&body, &shape, &shape, &active, &active, &lumped);

        // velocity field of the body, evaluated at the grid nodes
        let linear = TV::new(0.3, -0.2, 0.1);
        let angular = TV::new(0.5, 1., -2.);
        let twist = Vec6::new(linear.x, linear.y, linear.z, angular.x, angular.y, angular.z);
        let u: Vec<TV> = active
            .rev_indices
            .iter()
            .map(|&n| linear + angular.cross(&(shape.node_position(n) - body.level_set.origin)))
            .collect();

        let y = data.jacobian.multiply(&u);
        for (yi, g) in y.iter().zip(&data.coupling) {
            assert!((yi - g * twist).norm() < 1e-10);
        }
    }

    #[test]
    fn material_pushed_into_the_floor_compresses() {
        let (shape, active, body) = setup();
        let lumped = shape.lumped_mass();
        let data = RigidBodyData::compute(&body, &shape, &shape, &active, &active, &lumped);

        let down = vec![TV::new(0., -1., 0.); active.count()];
        let y = data.jacobian.multiply(&down);
        assert!(y.iter().all(|yi| yi[0] <= 1e-14));
        assert!(y.iter().any(|yi| yi[0] < 0.));

        // sliding along the floor has no normal component
        let along = vec![TV::new(1., 0., 0.); active.count()];
        let y = data.jacobian.multiply(&along);
        assert!(y.iter().all(|yi| yi[0].abs() < 1e-12));
    }
}
