//! Per-step core of a continuum granular-material simulator: particles are splatted onto a
//! velocity (primal) grid and a stress (dual) grid, the momentum balance is solved on the active
//! nodes, and frictional contact inside the material and against rigid bodies is resolved as a
//! second-order cone complementarity problem.

extern crate nalgebra as na;

pub mod active;
pub mod collisions;
pub mod config;
pub mod contact;
pub mod forms;
pub mod initial_condition;
pub mod linear;
pub mod math;
pub mod mesh;
pub mod particles;
pub mod phase;
pub mod rigid;
pub mod simulation;
pub mod statistics;
pub mod step;
pub mod util;
