//! Mechanism modeling for marker-driven pose fitting.
//!
//! This crate provides the constraint layer of the pose-fitting stack: rigid
//! bodies assembled into mechanisms through joints, plus the scalar row form
//! in which the solver consumes constraints.
//!
//! # Connector Types
//!
//! - [`HingeJoint`]: Single-axis rotation with an optional coordinate range;
//!   engages a unilateral limit row at the range bounds
//! - [`BallJoint`]: Ball-and-socket pinning two attachment points together
//! - [`CoordinateCoupling`]: A linear equation over joint coordinates,
//!   possibly spanning several joints
//!
//! Connectors attach a body pair, or a single body to ground. All of them
//! implement the [`Connector`] trait and emit [`ConstraintRow`]s: per-body
//! wrenches with a signed distance and a compliance.
//!
//! # Constraint Formulation
//!
//! Each connector maintains two attachment frames, C on body A and D on
//! body B (or in world coordinates when grounded). Constraint distances
//! measure the displacement of C relative to D along the constrained
//! directions, and rows are assembled in world orientation:
//!
//! ```text
//! G dq = -dist     (bilateral rows)
//! N dq >= -dist    (engaged unilateral rows)
//! ```
//!
//! # Example
//!
//! ```
//! use posefit_mech::Model;
//! use posefit_types::{Pose, RigidBody};
//! use nalgebra::{Point3, Vector3};
//!
//! # fn main() -> Result<(), posefit_types::PosefitError> {
//! let mut model = Model::new();
//! let base = model.add_body(RigidBody::new("base").fixed());
//! let arm = model.add_body(
//!     RigidBody::new("arm").with_pose(Pose::from_position(Point3::new(0.0, 0.0, 0.5))),
//! );
//! let hinge = model.add_hinge_at(arm, Some(base), Point3::origin(), Vector3::y())?;
//! model.set_coordinate(hinge, 0, 0.25)?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/posefit-mech/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod ball;
mod connector;
mod coupling;
mod hinge;
mod model;

pub use ball::BallJoint;
pub use connector::{BoxedConnector, Connector, ConstraintBlock, ConstraintRow};
pub use coupling::{CoordinateCoupling, CouplingTerm};
pub use hinge::{HingeJoint, LimitEngagement, DEFAULT_ROTARY_TOLERANCE};
pub use model::{Model, ModelState};

// Re-export types needed to assemble models
pub use posefit_types::{BodyId, ConnectorId, MarkerId, Pose, RigidBody, Wrench};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_hinge_creation() {
        let bodies = vec![RigidBody::new("a"), RigidBody::new("b")];
        let hinge = HingeJoint::from_world_axis(
            &bodies,
            BodyId::new(0),
            Some(BodyId::new(1)),
            Point3::origin(),
            Vector3::z(),
        )
        .expect("valid axis");

        assert_eq!(hinge.body_a(), BodyId::new(0));
        assert_eq!(hinge.body_b(), Some(BodyId::new(1)));
        assert_eq!(hinge.num_bilateral(), 5);
        assert_eq!(hinge.num_coordinates(), 1);
    }

    #[test]
    fn test_hinge_range() {
        let hinge = HingeJoint::new(
            BodyId::new(0),
            None,
            Pose::identity(),
            Pose::identity(),
        )
        .with_range(-1.0, 1.0)
        .expect("ordered range");
        assert_relative_eq!(hinge.range().0, -1.0, epsilon = 1e-15);
        assert_relative_eq!(hinge.range().1, 1.0, epsilon = 1e-15);

        let bad = HingeJoint::new(BodyId::new(0), None, Pose::identity(), Pose::identity())
            .with_range(1.0, -1.0);
        assert!(bad.is_err());
    }

    #[test]
    fn test_model_counts() {
        let mut model = Model::new();
        let a = model.add_body(RigidBody::new("a"));
        let b = model.add_body(RigidBody::new("b").fixed());
        model
            .add_hinge_at(a, Some(b), Point3::origin(), Vector3::y())
            .expect("hinge");
        model.add_marker(a, Point3::origin()).expect("marker");

        assert_eq!(model.num_bodies(), 2);
        assert_eq!(model.num_connectors(), 1);
        assert_eq!(model.num_markers(), 1);
        assert_eq!(model.couplings().len(), 0);
    }
}
