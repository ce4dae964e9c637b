//! Mechanism model: rigid bodies, markers, connectors, and couplings.
//!
//! A [`Model`] owns the components of one mechanism and maintains the
//! bookkeeping the solver layers rely on: marker world positions and the
//! dynamic-first solve index assignment of the bodies.
//!
//! # Example
//!
//! ```
//! use posefit_mech::Model;
//! use posefit_types::{Pose, RigidBody, SpatialInertia};
//! use nalgebra::{Point3, Vector3};
//!
//! # fn main() -> Result<(), posefit_types::PosefitError> {
//! let mut model = Model::new();
//! let base = model.add_body(RigidBody::new("base").fixed());
//! let arm = model.add_body(
//!     RigidBody::new("arm")
//!         .with_pose(Pose::from_position(Point3::new(0.0, 0.0, 0.5)))
//!         .with_inertia(SpatialInertia::box_from_density(
//!             1000.0,
//!             Vector3::new(0.25, 0.25, 1.0),
//!         )),
//! );
//! let hinge = model.add_hinge_at(arm, Some(base), Point3::origin(), Vector3::y())?;
//! let tip = model.add_marker(arm, Point3::new(0.0, 0.0, 0.5))?;
//!
//! let applied = model.set_coordinate(hinge, 0, 0.3)?;
//! assert!((applied - 0.3).abs() < 1e-12);
//! assert!(model.marker(tip).is_some());
//! # Ok(())
//! # }
//! ```

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use posefit_types::{
    BodyId, ConnectorId, Marker, MarkerId, PosefitError, Result, RigidBody, POS_STATE_SIZE,
};

use crate::ball::BallJoint;
use crate::connector::{BoxedConnector, Connector};
use crate::coupling::CoordinateCoupling;
use crate::hinge::HingeJoint;

/// Opaque numeric snapshot of a model's poses and connector state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelState {
    pos: Vec<f64>,
    connector: Vec<f64>,
}

/// A mechanism assembled from rigid bodies, markers, connectors, and
/// coordinate couplings.
#[derive(Debug, Default)]
pub struct Model {
    bodies: Vec<RigidBody>,
    markers: Vec<Marker>,
    connectors: Vec<BoxedConnector>,
    couplings: Vec<CoordinateCoupling>,
    indices_valid: bool,
}

impl Model {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // bodies
    // ------------------------------------------------------------------

    /// Add a body and return its ID. Invalidates solve indices.
    pub fn add_body(&mut self, body: RigidBody) -> BodyId {
        self.bodies.push(body);
        self.indices_valid = false;
        BodyId::new(self.bodies.len() as u64 - 1)
    }

    /// Number of bodies.
    #[must_use]
    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// All bodies, indexed by [`BodyId`].
    #[must_use]
    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    /// Mutable access to the bodies. Changing dynamic flags through this
    /// does not invalidate solve indices; use
    /// [`set_dynamic`](Model::set_dynamic) for that.
    pub fn bodies_mut(&mut self) -> &mut [RigidBody] {
        &mut self.bodies
    }

    /// Look up a body.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id.index())
    }

    /// Look up a body mutably.
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id.index())
    }

    /// Set a body's dynamic flag and invalidate solve indices.
    pub fn set_dynamic(&mut self, id: BodyId, dynamic: bool) -> Result<()> {
        let body = self
            .bodies
            .get_mut(id.index())
            .ok_or(PosefitError::InvalidBodyId(id.raw()))?;
        body.set_dynamic(dynamic);
        self.indices_valid = false;
        Ok(())
    }

    /// Assign solve indices: dynamic bodies first in insertion order, then
    /// the non-dynamic ones. No-op while the assignment is current.
    pub fn update_solve_indices(&mut self) {
        if self.indices_valid {
            return;
        }
        let mut idx = 0;
        for body in self.bodies.iter_mut().filter(|b| b.is_dynamic()) {
            body.set_solve_index(idx);
            idx += 1;
        }
        for body in self.bodies.iter_mut().filter(|b| !b.is_dynamic()) {
            body.set_solve_index(idx);
            idx += 1;
        }
        self.indices_valid = true;
    }

    /// Number of dynamic bodies. These occupy solve indices
    /// `0..active_component_count()`.
    #[must_use]
    pub fn active_component_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_dynamic()).count()
    }

    /// Number of non-dynamic bodies. These occupy the solve indices above
    /// the dynamic ones.
    #[must_use]
    pub fn parametric_component_count(&self) -> usize {
        self.bodies.len() - self.active_component_count()
    }

    // ------------------------------------------------------------------
    // markers
    // ------------------------------------------------------------------

    /// Attach a marker to `body` at body-frame `location`.
    pub fn add_marker(&mut self, body: BodyId, location: Point3<f64>) -> Result<MarkerId> {
        let pose = self
            .bodies
            .get(body.index())
            .map(|b| b.pose)
            .ok_or(PosefitError::InvalidBodyId(body.raw()))?;
        let mut marker = Marker::new(body, location);
        marker.update_world(&pose);
        self.markers.push(marker);
        Ok(MarkerId::new(self.markers.len() as u64 - 1))
    }

    /// Attach a marker to `body` at a world-space position, converting to
    /// body coordinates with the body's current pose.
    pub fn add_marker_world(&mut self, body: BodyId, world: Point3<f64>) -> Result<MarkerId> {
        let pose = self
            .bodies
            .get(body.index())
            .map(|b| b.pose)
            .ok_or(PosefitError::InvalidBodyId(body.raw()))?;
        self.add_marker(body, pose.inverse_transform_point(&world))
    }

    /// Number of markers.
    #[must_use]
    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// All markers, indexed by [`MarkerId`].
    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Look up a marker.
    #[must_use]
    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(id.index())
    }

    /// Refresh every marker's cached world position from its body's pose.
    pub fn update_markers(&mut self) {
        for marker in &mut self.markers {
            marker.update_world(&self.bodies[marker.body.index()].pose);
        }
    }

    // ------------------------------------------------------------------
    // connectors
    // ------------------------------------------------------------------

    /// Add a connector, validating the body IDs it references.
    pub fn add_connector(&mut self, connector: impl Connector + 'static) -> Result<ConnectorId> {
        let a = connector.body_a();
        if a.index() >= self.bodies.len() {
            return Err(PosefitError::InvalidBodyId(a.raw()));
        }
        if let Some(b) = connector.body_b() {
            if b.index() >= self.bodies.len() {
                return Err(PosefitError::InvalidBodyId(b.raw()));
            }
        }
        self.connectors.push(Box::new(connector));
        Ok(ConnectorId::new(self.connectors.len() as u64 - 1))
    }

    /// Add a hinge joint through a world-space point and axis.
    pub fn add_hinge_at(
        &mut self,
        body_a: BodyId,
        body_b: Option<BodyId>,
        point: Point3<f64>,
        axis: Vector3<f64>,
    ) -> Result<ConnectorId> {
        let hinge = HingeJoint::from_world_axis(&self.bodies, body_a, body_b, point, axis)?;
        self.add_connector(hinge)
    }

    /// Add a ball joint centered on a world-space point.
    pub fn add_ball_at(
        &mut self,
        body_a: BodyId,
        body_b: Option<BodyId>,
        point: Point3<f64>,
    ) -> Result<ConnectorId> {
        let ball = BallJoint::at_point(&self.bodies, body_a, body_b, point)?;
        self.add_connector(ball)
    }

    /// Number of connectors.
    #[must_use]
    pub fn num_connectors(&self) -> usize {
        self.connectors.len()
    }

    /// All connectors, indexed by [`ConnectorId`].
    #[must_use]
    pub fn connectors(&self) -> &[BoxedConnector] {
        &self.connectors
    }

    /// Look up a connector.
    #[must_use]
    pub fn connector(&self, id: ConnectorId) -> Option<&dyn Connector> {
        self.connectors.get(id.index()).map(AsRef::as_ref)
    }

    /// Look up a connector as a concrete type.
    #[must_use]
    pub fn connector_as<T: Connector + 'static>(&self, id: ConnectorId) -> Option<&T> {
        self.connectors
            .get(id.index())
            .and_then(|c| c.as_any().downcast_ref::<T>())
    }

    /// Look up a connector mutably as a concrete type.
    pub fn connector_as_mut<T: Connector + 'static>(&mut self, id: ConnectorId) -> Option<&mut T> {
        self.connectors
            .get_mut(id.index())
            .and_then(|c| c.as_any_mut().downcast_mut::<T>())
    }

    /// Refresh the cached state of one connector from the current poses.
    pub fn update_connector_state(&mut self, id: ConnectorId, update_engaged: bool) -> Result<()> {
        let connector = self
            .connectors
            .get_mut(id.index())
            .ok_or(PosefitError::InvalidConnectorId(id.raw()))?;
        connector.update_state(&self.bodies, update_engaged);
        Ok(())
    }

    /// Refresh the cached state of every enabled connector without touching
    /// limit engagement. Useful after editing body poses directly.
    pub fn update_connector_states(&mut self) {
        for connector in &mut self.connectors {
            if connector.is_enabled() {
                connector.update_state(&self.bodies, false);
            }
        }
    }

    /// Read joint coordinate `index` of a connector, refreshing the
    /// connector state first.
    pub fn coordinate(&mut self, id: ConnectorId, index: usize) -> Result<f64> {
        self.update_connector_state(id, false)?;
        self.connectors[id.index()]
            .coordinate(index)
            .ok_or(PosefitError::InvalidCoordinate {
                connector: id.raw(),
                index,
            })
    }

    /// Set joint coordinate `index` of a connector by repositioning its
    /// bodies, then refresh marker positions. Returns the applied (possibly
    /// range-clipped) value.
    pub fn set_coordinate(&mut self, id: ConnectorId, index: usize, value: f64) -> Result<f64> {
        let connector = self
            .connectors
            .get_mut(id.index())
            .ok_or(PosefitError::InvalidConnectorId(id.raw()))?;
        let applied = connector
            .set_coordinate(index, value, &mut self.bodies)
            .ok_or(PosefitError::InvalidCoordinate {
                connector: id.raw(),
                index,
            })?;
        self.update_markers();
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // couplings
    // ------------------------------------------------------------------

    /// Add a coordinate coupling, validating the connectors and coordinate
    /// indices it references. Returns the coupling's list index.
    pub fn add_coupling(&mut self, coupling: CoordinateCoupling) -> Result<usize> {
        for term in coupling.terms() {
            let connector = self
                .connectors
                .get(term.connector.index())
                .ok_or(PosefitError::InvalidConnectorId(term.connector.raw()))?;
            if term.coordinate >= connector.num_coordinates() {
                return Err(PosefitError::InvalidCoordinate {
                    connector: term.connector.raw(),
                    index: term.coordinate,
                });
            }
        }
        self.couplings.push(coupling);
        Ok(self.couplings.len() - 1)
    }

    /// All coordinate couplings.
    #[must_use]
    pub fn couplings(&self) -> &[CoordinateCoupling] {
        &self.couplings
    }

    // ------------------------------------------------------------------
    // state snapshots
    // ------------------------------------------------------------------

    /// Capture the poses of all bodies and the numeric state of all
    /// connectors.
    #[must_use]
    pub fn state(&self) -> ModelState {
        let mut pos = Vec::with_capacity(POS_STATE_SIZE * self.bodies.len());
        for body in &self.bodies {
            pos.extend_from_slice(&body.pose.to_state());
        }
        let mut connector = Vec::new();
        for c in &self.connectors {
            c.write_numeric_state(&mut connector);
        }
        ModelState { pos, connector }
    }

    /// Restore a snapshot previously captured with [`state`](Model::state),
    /// then refresh marker positions.
    pub fn set_state(&mut self, state: &ModelState) -> Result<()> {
        if state.pos.len() != POS_STATE_SIZE * self.bodies.len() {
            return Err(PosefitError::state_mismatch(format!(
                "pose state has {} values, model needs {}",
                state.pos.len(),
                POS_STATE_SIZE * self.bodies.len()
            )));
        }
        let total: usize = self.connectors.iter().map(|c| c.numeric_state_size()).sum();
        if state.connector.len() != total {
            return Err(PosefitError::state_mismatch(format!(
                "connector state has {} values, model needs {total}",
                state.connector.len()
            )));
        }
        for (body, chunk) in self
            .bodies
            .iter_mut()
            .zip(state.pos.chunks_exact(POS_STATE_SIZE))
        {
            let mut arr = [0.0; POS_STATE_SIZE];
            arr.copy_from_slice(chunk);
            body.pose = posefit_types::Pose::from_state(&arr);
        }
        let mut off = 0;
        for c in &mut self.connectors {
            let n = c.numeric_state_size();
            c.read_numeric_state(&state.connector[off..off + n]);
            off += n;
        }
        self.update_markers();
        Ok(())
    }
}
