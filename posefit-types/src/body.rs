//! Rigid bodies and their spatial state.
//!
//! A [`RigidBody`] carries a world pose, a [`SpatialInertia`], and flags that
//! control how the solver treats it. Bodies are addressed by [`BodyId`], which
//! indexes the owning model's body list.

use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::inertia::SpatialInertia;

/// Number of position-state values a rigid body contributes
/// (3 translation + 4 quaternion).
pub const POS_STATE_SIZE: usize = 7;

/// Number of velocity-state values a rigid body contributes
/// (3 linear + 3 angular).
pub const VEL_STATE_SIZE: usize = 6;

/// Unique identifier for a rigid body within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u64);

impl BodyId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Get the ID as a list index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "body{}", self.0)
    }
}

/// Unique identifier for a connector within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectorId(pub u64);

impl ConnectorId {
    /// Create a new connector ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Get the ID as a list index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for ConnectorId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connector{}", self.0)
    }
}

/// Position and orientation of a rigid body in world space.
///
/// # Example
///
/// ```
/// use posefit_types::Pose;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let pose = Pose::from_position_rotation(
///     Point3::new(1.0, 2.0, 3.0),
///     UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
/// );
/// let p = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert!((p.y - 3.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    /// Create an identity pose at the origin.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose at a position with identity rotation.
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub fn from_position_rotation(position: Point3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.position.coords
    }

    /// Transform a vector (direction) from local to world coordinates.
    #[must_use]
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * vector
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation.inverse() * (point - self.position.coords)
    }

    /// Transform a vector from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * vector
    }

    /// Compose two poses: apply `other` in this pose's frame.
    #[must_use]
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            position: self.transform_point(&other.position),
            rotation: self.rotation * other.rotation,
        }
    }

    /// Invert this pose.
    #[must_use]
    pub fn inverse(&self) -> Pose {
        let inv_rot = self.rotation.inverse();
        Pose {
            position: Point3::from(-(inv_rot * self.position.coords)),
            rotation: inv_rot,
        }
    }

    /// Rotation matrix form of the orientation.
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Advance the pose by a world-frame twist over time step `h`.
    ///
    /// Translation integrates linearly; rotation applies the exponential of
    /// the scaled angular velocity on the world side.
    #[must_use]
    pub fn integrate(&self, twist: &Twist, h: f64) -> Pose {
        let position = self.position + h * twist.linear;
        let dq = UnitQuaternion::from_scaled_axis(h * twist.angular);
        let mut rotation = dq * self.rotation;
        rotation.renormalize_fast();
        Pose { position, rotation }
    }

    /// Pack the pose into a 7-value state array: position followed by the
    /// quaternion in `(w, x, y, z)` order.
    #[must_use]
    pub fn to_state(&self) -> [f64; POS_STATE_SIZE] {
        let q = self.rotation.quaternion();
        [
            self.position.x,
            self.position.y,
            self.position.z,
            q.w,
            q.i,
            q.j,
            q.k,
        ]
    }

    /// Restore a pose from a 7-value state array, normalizing the quaternion.
    #[must_use]
    pub fn from_state(state: &[f64; POS_STATE_SIZE]) -> Self {
        let position = Point3::new(state[0], state[1], state[2]);
        let rotation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            state[3], state[4], state[5], state[6],
        ));
        Self { position, rotation }
    }

    /// Check if the pose contains only finite values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|v| v.is_finite())
            && self
                .rotation
                .quaternion()
                .coords
                .iter()
                .all(|v| v.is_finite())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Spatial velocity of a rigid body: linear and angular parts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Twist {
    /// Linear velocity.
    pub linear: Vector3<f64>,
    /// Angular velocity.
    pub angular: Vector3<f64>,
}

impl Twist {
    /// Create a new twist.
    #[must_use]
    pub fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// Zero twist.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from a 6-value slice: linear then angular.
    ///
    /// # Panics
    ///
    /// Panics if `slice` has fewer than 6 elements.
    #[must_use]
    pub fn from_slice(slice: &[f64]) -> Self {
        Self {
            linear: Vector3::new(slice[0], slice[1], slice[2]),
            angular: Vector3::new(slice[3], slice[4], slice[5]),
        }
    }

    /// Check if the twist contains only finite values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|v| v.is_finite()) && self.angular.iter().all(|v| v.is_finite())
    }
}

/// Spatial force on a rigid body: force and moment about the body origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Wrench {
    /// Force component.
    pub force: Vector3<f64>,
    /// Moment about the body frame origin.
    pub moment: Vector3<f64>,
}

impl Wrench {
    /// Create a new wrench.
    #[must_use]
    pub fn new(force: Vector3<f64>, moment: Vector3<f64>) -> Self {
        Self { force, moment }
    }

    /// Zero wrench.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Wrench of a force acting at a point offset `arm` from the body origin:
    /// the moment is `arm x force`.
    #[must_use]
    pub fn from_force_at(force: Vector3<f64>, arm: Vector3<f64>) -> Self {
        Self {
            moment: arm.cross(&force),
            force,
        }
    }

    /// Pure moment with no force component.
    #[must_use]
    pub fn pure_moment(moment: Vector3<f64>) -> Self {
        Self {
            force: Vector3::zeros(),
            moment,
        }
    }

    /// Dot product with a spatial velocity.
    #[must_use]
    pub fn dot(&self, twist: &Twist) -> f64 {
        self.force.dot(&twist.linear) + self.moment.dot(&twist.angular)
    }

    /// Write the wrench into a 6-value slice: force then moment.
    ///
    /// # Panics
    ///
    /// Panics if `out` has fewer than 6 elements.
    pub fn write_to(&self, out: &mut [f64]) {
        out[0] = self.force.x;
        out[1] = self.force.y;
        out[2] = self.force.z;
        out[3] = self.moment.x;
        out[4] = self.moment.y;
        out[5] = self.moment.z;
    }
}

impl std::ops::Neg for Wrench {
    type Output = Wrench;

    fn neg(self) -> Wrench {
        Wrench {
            force: -self.force,
            moment: -self.moment,
        }
    }
}

impl std::ops::Mul<f64> for Wrench {
    type Output = Wrench;

    fn mul(self, s: f64) -> Wrench {
        Wrench {
            force: s * self.force,
            moment: s * self.moment,
        }
    }
}

/// A rigid body tracked by the pose-fitting solver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RigidBody {
    /// Human-readable name.
    pub name: String,
    /// World pose of the body coordinate frame.
    pub pose: Pose,
    /// Mass distribution, expressed in body coordinates.
    pub inertia: SpatialInertia,
    dynamic: bool,
    grounded: bool,
    solve_index: usize,
}

impl RigidBody {
    /// Create a new dynamic body with identity pose and zero inertia.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pose: Pose::identity(),
            inertia: SpatialInertia::zero(),
            dynamic: true,
            grounded: false,
            solve_index: usize::MAX,
        }
    }

    /// Set the pose (builder style).
    #[must_use]
    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    /// Set the inertia (builder style).
    #[must_use]
    pub fn with_inertia(mut self, inertia: SpatialInertia) -> Self {
        self.inertia = inertia;
        self
    }

    /// Mark the body as non-dynamic (builder style).
    #[must_use]
    pub fn fixed(mut self) -> Self {
        self.dynamic = false;
        self
    }

    /// Whether the solver may move this body. Non-dynamic bodies act as
    /// fixed anchors.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Set the dynamic flag directly. Callers that cache solve indices must
    /// invalidate them separately.
    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }

    /// Mark the body as grounded (builder style). Grounded bodies anchor the
    /// connector network: discovery never expands across them, so anything
    /// attached to one on the far side stays at its current pose.
    #[must_use]
    pub fn grounded(mut self) -> Self {
        self.grounded = true;
        self
    }

    /// Whether the body is a grounding anchor for the connector network.
    #[must_use]
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Set the grounded flag directly.
    pub fn set_grounded(&mut self, grounded: bool) {
        self.grounded = grounded;
    }

    /// Solve index assigned by the owning model.
    #[must_use]
    pub fn solve_index(&self) -> usize {
        self.solve_index
    }

    /// Assign the solve index. Called by the owning model when component
    /// indices are rebuilt.
    pub fn set_solve_index(&mut self, index: usize) {
        self.solve_index = index;
    }

    /// Shift the body coordinate frame by `offset` while leaving the world
    /// placement of its mass unchanged. The frame origin moves by `offset`
    /// in world coordinates and the center of mass shifts by `-offset` in
    /// body coordinates.
    pub fn translate_frame(&mut self, offset: Vector3<f64>) {
        self.pose.position += offset;
        self.inertia.translate_com(-offset);
    }
}
