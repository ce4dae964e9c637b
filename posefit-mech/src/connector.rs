//! Constraint connectors between rigid bodies.
//!
//! A connector couples a body pair (or a body and ground) through scalar
//! constraint rows. Each row is a [`ConstraintRow`]: a set of per-body
//! wrenches together with a signed distance and a compliance. Bilateral
//! rows must be driven to zero; unilateral rows only push while a limit
//! is engaged.
//!
//! # Connector Trait
//!
//! All connectors implement the [`Connector`] trait, which exposes row
//! assembly, joint coordinates, and the numeric state used for whole-model
//! snapshots. Connectors cache derived frame state; callers refresh it with
//! [`Connector::update_state`] before reading coordinates or assembling rows.
//!
//! # Example
//!
//! ```
//! use posefit_mech::{Connector, HingeJoint};
//! use posefit_types::{BodyId, Pose, RigidBody};
//! use nalgebra::{Point3, Vector3};
//!
//! # fn main() -> Result<(), posefit_types::PosefitError> {
//! let bodies = vec![
//!     RigidBody::new("base").fixed(),
//!     RigidBody::new("arm").with_pose(Pose::from_position(Point3::new(0.0, 0.0, 1.0))),
//! ];
//! let mut hinge = HingeJoint::from_world_axis(
//!     &bodies,
//!     BodyId::new(1),
//!     Some(BodyId::new(0)),
//!     Point3::new(0.0, 0.0, 1.0),
//!     Vector3::y(),
//! )?;
//! hinge.update_state(&bodies, true);
//!
//! let mut rows = Vec::new();
//! hinge.append_bilateral_rows(&bodies, &mut rows);
//! assert_eq!(rows.len(), 5);
//! # Ok(())
//! # }
//! ```

use std::any::Any;

use posefit_types::{BodyId, PosefitError, Pose, Result, RigidBody, Wrench};

// ============================================================================
// Constraint rows
// ============================================================================

/// One body's contribution to a constraint row.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintBlock {
    /// The body the wrench acts on.
    pub body: BodyId,
    /// Constraint wrench in world orientation, moments about the body origin.
    pub wrench: Wrench,
}

/// A single scalar constraint row.
#[derive(Debug, Clone)]
pub struct ConstraintRow {
    /// Per-body wrench contributions. Usually one or two blocks; coordinate
    /// couplings may span more bodies.
    pub blocks: Vec<ConstraintBlock>,
    /// Signed constraint distance. Bilateral rows drive this to zero;
    /// unilateral rows only correct penetration beyond their tolerance.
    pub distance: f64,
    /// Compliance (inverse stiffness) regularizing the row. Zero means rigid.
    pub compliance: f64,
}

// ============================================================================
// Connector trait
// ============================================================================

/// Common interface for body connectors.
///
/// Body IDs held by a connector index the owning model's body list; the
/// model validates them when the connector is added, so row assembly may
/// index bodies directly.
pub trait Connector: std::fmt::Debug + Send + Sync {
    /// The first constrained body.
    fn body_a(&self) -> BodyId;

    /// The second constrained body, or `None` if attached to ground.
    fn body_b(&self) -> Option<BodyId>;

    /// Whether the connector participates in solves.
    fn is_enabled(&self) -> bool;

    /// Enable or disable the connector.
    fn set_enabled(&mut self, enabled: bool);

    /// Number of bilateral constraint rows.
    fn num_bilateral(&self) -> usize;

    /// Number of currently engaged unilateral rows.
    fn num_unilateral(&self) -> usize;

    /// Refresh cached frame state (coordinates, constraint errors, world
    /// axes) from the current body poses. When `update_engaged` is true,
    /// limit engagement is also updated and any pending engagement reset
    /// request is consumed.
    fn update_state(&mut self, bodies: &[RigidBody], update_engaged: bool);

    /// Append this connector's bilateral rows. Valid after
    /// [`update_state`](Connector::update_state).
    fn append_bilateral_rows(&self, bodies: &[RigidBody], rows: &mut Vec<ConstraintRow>);

    /// Append this connector's engaged unilateral rows. Valid after
    /// [`update_state`](Connector::update_state).
    fn append_unilateral_rows(&self, bodies: &[RigidBody], rows: &mut Vec<ConstraintRow>);

    /// Number of joint coordinates exposed by this connector.
    fn num_coordinates(&self) -> usize {
        0
    }

    /// Value of coordinate `index`, or `None` if out of range. Valid after
    /// [`update_state`](Connector::update_state).
    fn coordinate(&self, _index: usize) -> Option<f64> {
        None
    }

    /// Set coordinate `index` by repositioning the attached bodies, clipping
    /// to the coordinate's range. Returns the applied value, or `None` if
    /// the index is out of range. Marker positions are the caller's
    /// responsibility.
    fn set_coordinate(
        &mut self,
        _index: usize,
        _value: f64,
        _bodies: &mut [RigidBody],
    ) -> Option<f64> {
        None
    }

    /// Append the wrench blocks of coordinate `index` scaled by `coeff`, as
    /// used by coordinate couplings. Appends nothing if the index is out of
    /// range. Valid after [`update_state`](Connector::update_state).
    fn append_coordinate_wrench(
        &self,
        _index: usize,
        _coeff: f64,
        _blocks: &mut Vec<ConstraintBlock>,
    ) {
    }

    /// Number of values in this connector's numeric state.
    fn numeric_state_size(&self) -> usize {
        0
    }

    /// Append the connector's numeric state (coordinates, engagement) to
    /// `out`.
    fn write_numeric_state(&self, _out: &mut Vec<f64>) {}

    /// Restore numeric state previously written by
    /// [`write_numeric_state`](Connector::write_numeric_state). `state` has
    /// exactly [`numeric_state_size`](Connector::numeric_state_size) values.
    fn read_numeric_state(&mut self, _state: &[f64]) {}

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Boxed connector trait object.
pub type BoxedConnector = Box<dyn Connector>;

/// Look up a body pose, rejecting out-of-range IDs.
pub(crate) fn body_pose(bodies: &[RigidBody], id: BodyId) -> Result<&Pose> {
    bodies
        .get(id.index())
        .map(|b| &b.pose)
        .ok_or(PosefitError::InvalidBodyId(id.raw()))
}
