//! Constrained inverse kinematics for marker-driven pose fitting.
//!
//! This crate sits on top of the mechanism layer and answers one question:
//! given target positions for a set of markers, what rigid-body poses best
//! reach them without violating the model's joints?
//!
//! [`IkSolver`] discovers the marker-reachable part of the model once, then
//! fits poses to each target frame with a Newton-like loop. Every iteration
//! solves a KKT saddle system: per-body stiffness blocks built from the
//! marker layouts on the primal side, the connectors' bilateral rows as
//! equality constraints, and engaged coordinate-limit rows handled by an
//! active-set complementarity sweep. Poses advance along the resulting
//! spatial velocity with an exponential update, so rotations stay on the
//! group no matter how large the step.
//!
//! # Typical Use
//!
//! Build a [`Model`], attach markers where the tracked points sit on each
//! body, hand both to [`IkSolver::new`], and call
//! [`solve`](IkSolver::solve) once per frame of target data. The solver
//! owns the model; read fitted poses back through
//! [`model`](IkSolver::model) or [`body_poses`](IkSolver::body_poses).
//!
//! # Example
//!
//! ```
//! use nalgebra::{Point3, Vector3};
//! use posefit_ik::{IkSolver, Model, RigidBody};
//!
//! # fn main() -> Result<(), posefit_ik::PosefitError> {
//! let mut model = Model::new();
//! let link = model.add_body(
//!     RigidBody::new("link").with_pose(posefit_ik::Pose::from_position(
//!         Point3::new(0.0, 0.0, 0.5),
//!     )),
//! );
//! model.add_hinge_at(link, None, Point3::origin(), Vector3::y())?;
//! let tip = model.add_marker(link, Point3::new(0.0, 0.0, 0.5))?;
//!
//! let mut solver = IkSolver::new(model, &[tip])?;
//! // Swing the tip from straight up toward +x.
//! let iterations = solver.solve(&[0.2, 0.0, 0.96])?;
//! assert!(iterations > 0);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/posefit-ik/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod kkt;
mod network;
mod solver;

pub use solver::{IkConfig, IkSolver};

// Re-export the model-building surface so downstream crates can depend on
// posefit-ik alone
pub use posefit_mech::{
    BallJoint, Connector, CoordinateCoupling, CouplingTerm, HingeJoint, Model, ModelState,
};
pub use posefit_types::{
    BodyId, ConnectorId, MarkerId, Pose, PosefitError, Result, RigidBody, SpatialInertia,
};
