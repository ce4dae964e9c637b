//! Hinge joint: one rotational degree of freedom with optional range limits.
//!
//! The joint couples a C frame on body A to a D frame on body B (or on
//! ground). The free coordinate `theta` is the rotation of C relative to D
//! about the D frame z axis; the remaining five directions are constrained
//! bilaterally. When `theta` reaches a range limit, a unilateral row engages
//! to hold it.

use std::any::Any;

use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};

use posefit_types::{BodyId, PosefitError, Pose, Result, RigidBody, Wrench};

use crate::connector::{body_pose, Connector, ConstraintBlock, ConstraintRow};

/// Default engagement tolerance for rotary limits, in radians.
pub const DEFAULT_ROTARY_TOLERANCE: f64 = 1e-4;

/// Engagement state of a joint range limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitEngagement {
    /// Limit is not engaged.
    #[default]
    None,
    /// Engaged at the lower bound, pushing the coordinate upward.
    Low,
    /// Engaged at the upper bound, pushing the coordinate downward.
    High,
}

impl LimitEngagement {
    /// Sign of the constraint direction along the coordinate axis:
    /// `+1` at the lower bound, `-1` at the upper bound, `0` disengaged.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Low => 1.0,
            Self::High => -1.0,
        }
    }

    fn code(self) -> f64 {
        self.sign()
    }

    fn from_code(code: f64) -> Self {
        if code > 0.5 {
            Self::Low
        } else if code < -0.5 {
            Self::High
        } else {
            Self::None
        }
    }
}

/// Hinge joint between two bodies, or between a body and ground.
#[derive(Debug, Clone)]
pub struct HingeJoint {
    body_a: BodyId,
    body_b: Option<BodyId>,
    enabled: bool,
    /// C frame relative to body A.
    tca: Pose,
    /// D frame relative to body B, or its world pose if grounded.
    tdb: Pose,
    min_theta: f64,
    max_theta: f64,
    rotary_tol: f64,
    /// Compliances for the 5 bilateral rows followed by the limit row.
    compliance: [f64; 6],
    // state refreshed by update_state
    theta: f64,
    engagement: LimitEngagement,
    engaged_cnt: u32,
    reset_engaged: bool,
    err: [f64; 6],
    r_gw: Matrix3<f64>,
    p_c: Point3<f64>,
    p_d: Point3<f64>,
}

impl HingeJoint {
    /// Create a hinge from explicit attachment frames: `tca` places the C
    /// frame on body A, `tdb` places the D frame on body B (or in world
    /// coordinates if `body_b` is `None`).
    #[must_use]
    pub fn new(body_a: BodyId, body_b: Option<BodyId>, tca: Pose, tdb: Pose) -> Self {
        Self {
            body_a,
            body_b,
            enabled: true,
            tca,
            tdb,
            min_theta: f64::NEG_INFINITY,
            max_theta: f64::INFINITY,
            rotary_tol: DEFAULT_ROTARY_TOLERANCE,
            compliance: [0.0; 6],
            theta: 0.0,
            engagement: LimitEngagement::None,
            engaged_cnt: 0,
            reset_engaged: false,
            err: [0.0; 6],
            r_gw: Matrix3::identity(),
            p_c: Point3::origin(),
            p_d: Point3::origin(),
        }
    }

    /// Create a hinge through a world-space `point` with rotation `axis`,
    /// deriving both attachment frames from the current body poses. The
    /// joint starts at `theta = 0` with zero constraint error.
    pub fn from_world_axis(
        bodies: &[RigidBody],
        body_a: BodyId,
        body_b: Option<BodyId>,
        point: Point3<f64>,
        axis: Vector3<f64>,
    ) -> Result<Self> {
        let tdw0 = frame_with_z(point, &axis)?;
        let tca = body_pose(bodies, body_a)?.inverse().compose(&tdw0);
        let tdb = match body_b {
            Some(b) => body_pose(bodies, b)?.inverse().compose(&tdw0),
            None => tdw0,
        };
        Ok(Self::new(body_a, body_b, tca, tdb))
    }

    /// Set the coordinate range (builder style).
    ///
    /// # Errors
    ///
    /// Fails if `min > max` or either bound is NaN.
    pub fn with_range(mut self, min: f64, max: f64) -> Result<Self> {
        self.set_range(min, max)?;
        Ok(self)
    }

    /// Set the coordinate range in radians. Infinite bounds disable the
    /// corresponding limit.
    ///
    /// # Errors
    ///
    /// Fails if `min > max` or either bound is NaN.
    pub fn set_range(&mut self, min: f64, max: f64) -> Result<()> {
        if !(min <= max) {
            return Err(PosefitError::invalid_config(format!(
                "hinge range [{min}, {max}] is not ordered"
            )));
        }
        self.min_theta = min;
        self.max_theta = max;
        Ok(())
    }

    /// The coordinate range `(min, max)`.
    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.min_theta, self.max_theta)
    }

    /// Set the compliances for the 5 bilateral rows followed by the limit
    /// row. Zero means rigid.
    pub fn set_compliance(&mut self, compliance: [f64; 6]) {
        self.compliance = compliance;
    }

    /// Row compliances.
    #[must_use]
    pub fn compliance(&self) -> [f64; 6] {
        self.compliance
    }

    /// Set the engagement tolerance for the rotary limit, in radians.
    pub fn set_rotary_tolerance(&mut self, tol: f64) {
        self.rotary_tol = tol;
    }

    /// Joint angle in radians, as of the last state update.
    #[must_use]
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Current limit engagement.
    #[must_use]
    pub fn engagement(&self) -> LimitEngagement {
        self.engagement
    }

    /// Number of consecutive state updates the limit has been engaged.
    #[must_use]
    pub fn engaged_count(&self) -> u32 {
        self.engaged_cnt
    }

    /// Reposition body A so that the joint angle becomes `theta`, clipped to
    /// the coordinate range. Requests an engagement reset on the next
    /// engagement update and returns the applied angle. Marker positions are
    /// the caller's responsibility.
    pub fn set_theta(&mut self, bodies: &mut [RigidBody], theta: f64) -> f64 {
        let theta = theta.max(self.min_theta).min(self.max_theta);
        let (_, tdw) = self.frames(bodies);
        let tcw = tdw.compose(&z_rotation(theta));
        bodies[self.body_a.index()].pose = tcw.compose(&self.tca.inverse());
        self.reset_engaged = true;
        theta
    }

    /// Current world poses of the C and D frames.
    fn frames(&self, bodies: &[RigidBody]) -> (Pose, Pose) {
        let tcw = bodies[self.body_a.index()].pose.compose(&self.tca);
        let tdw = match self.body_b {
            Some(b) => bodies[b.index()].pose.compose(&self.tdb),
            None => self.tdb,
        };
        (tcw, tdw)
    }

    /// Column `k` of the G frame rotation: the world direction of that
    /// constraint axis.
    fn world_axis(&self, k: usize) -> Vector3<f64> {
        self.r_gw.column(k).into_owned()
    }

    /// Signed distance to the nearest range limit; negative past the limit.
    fn limit_dist(&self) -> f64 {
        let val = self.theta;
        if (val - self.min_theta).abs() < (val - self.max_theta).abs() {
            val - self.min_theta
        } else {
            self.max_theta - val
        }
    }

    fn update_engagement(&mut self) {
        let val = self.theta;
        if val <= self.min_theta {
            if self.engagement != LimitEngagement::Low {
                self.engagement = LimitEngagement::Low;
                self.engaged_cnt = 0;
            }
        } else if val >= self.max_theta {
            if self.engagement != LimitEngagement::High {
                self.engagement = LimitEngagement::High;
                self.engaged_cnt = 0;
            }
        } else if self.engagement != LimitEngagement::None
            && self.limit_dist() > 0.0
            && self.reset_engaged
        {
            // disengage only on request, once the coordinate is back inside
            // its range
            self.engagement = LimitEngagement::None;
            self.engaged_cnt = 0;
        }
        if self.engagement != LimitEngagement::None {
            self.engaged_cnt += 1;
        }
    }

    /// Append the wrench pair of a translational row with world direction
    /// `a`, with moment arms from each body origin to its attachment frame.
    fn translational_blocks(
        &self,
        bodies: &[RigidBody],
        a: &Vector3<f64>,
        blocks: &mut Vec<ConstraintBlock>,
    ) {
        let p_a = bodies[self.body_a.index()].pose.position;
        blocks.push(ConstraintBlock {
            body: self.body_a,
            wrench: Wrench::from_force_at(*a, self.p_c - p_a),
        });
        if let Some(b) = self.body_b {
            let p_b = bodies[b.index()].pose.position;
            blocks.push(ConstraintBlock {
                body: b,
                wrench: -Wrench::from_force_at(*a, self.p_d - p_b),
            });
        }
    }

    /// Append the wrench pair of a rotational row with world direction `a`.
    fn rotary_blocks(&self, a: &Vector3<f64>, blocks: &mut Vec<ConstraintBlock>) {
        blocks.push(ConstraintBlock {
            body: self.body_a,
            wrench: Wrench::pure_moment(*a),
        });
        if let Some(b) = self.body_b {
            blocks.push(ConstraintBlock {
                body: b,
                wrench: Wrench::pure_moment(-*a),
            });
        }
    }
}

impl Connector for HingeJoint {
    fn body_a(&self) -> BodyId {
        self.body_a
    }

    fn body_b(&self) -> Option<BodyId> {
        self.body_b
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn num_bilateral(&self) -> usize {
        5
    }

    fn num_unilateral(&self) -> usize {
        usize::from(self.engagement != LimitEngagement::None)
    }

    fn update_state(&mut self, bodies: &[RigidBody], update_engaged: bool) {
        let (tcw, tdw) = self.frames(bodies);
        let tcd = tdw.inverse().compose(&tcw);
        let r = tcd.rotation_matrix();
        self.theta = (r[(1, 0)] - r[(0, 1)]).atan2(r[(0, 0)] + r[(1, 1)]);
        let tgd = z_rotation(self.theta);
        let terr = tgd.inverse().compose(&tcd);
        let rot_err = rot_log(&terr.rotation_matrix());
        self.err = [
            terr.position.x,
            terr.position.y,
            terr.position.z,
            rot_err.x,
            rot_err.y,
            rot_err.z,
        ];
        self.r_gw = tdw.compose(&tgd).rotation_matrix();
        self.p_c = tcw.position;
        self.p_d = tdw.position;
        if update_engaged {
            self.update_engagement();
            self.reset_engaged = false;
        }
    }

    fn append_bilateral_rows(&self, bodies: &[RigidBody], rows: &mut Vec<ConstraintRow>) {
        for k in 0..3 {
            let a = self.world_axis(k);
            let mut blocks = Vec::with_capacity(2);
            self.translational_blocks(bodies, &a, &mut blocks);
            rows.push(ConstraintRow {
                blocks,
                distance: self.err[k],
                compliance: self.compliance[k],
            });
        }
        // theta is free about z; only the x and y rotations are constrained
        for k in 0..2 {
            let a = self.world_axis(k);
            let mut blocks = Vec::with_capacity(2);
            self.rotary_blocks(&a, &mut blocks);
            rows.push(ConstraintRow {
                blocks,
                distance: self.err[3 + k],
                compliance: self.compliance[3 + k],
            });
        }
    }

    fn append_unilateral_rows(&self, _bodies: &[RigidBody], rows: &mut Vec<ConstraintRow>) {
        if self.engagement == LimitEngagement::None {
            return;
        }
        let a = self.world_axis(2) * self.engagement.sign();
        let mut blocks = Vec::with_capacity(2);
        self.rotary_blocks(&a, &mut blocks);
        let d = self.limit_dist();
        let distance = if d < -self.rotary_tol {
            d + self.rotary_tol
        } else {
            0.0
        };
        rows.push(ConstraintRow {
            blocks,
            distance,
            compliance: self.compliance[5],
        });
    }

    fn num_coordinates(&self) -> usize {
        1
    }

    fn coordinate(&self, index: usize) -> Option<f64> {
        (index == 0).then_some(self.theta)
    }

    fn set_coordinate(&mut self, index: usize, value: f64, bodies: &mut [RigidBody]) -> Option<f64> {
        (index == 0).then(|| self.set_theta(bodies, value))
    }

    fn append_coordinate_wrench(
        &self,
        index: usize,
        coeff: f64,
        blocks: &mut Vec<ConstraintBlock>,
    ) {
        if index == 0 {
            let a = self.world_axis(2) * coeff;
            self.rotary_blocks(&a, blocks);
        }
    }

    fn numeric_state_size(&self) -> usize {
        4
    }

    fn write_numeric_state(&self, out: &mut Vec<f64>) {
        out.push(self.theta);
        out.push(self.engagement.code());
        out.push(f64::from(self.engaged_cnt));
        out.push(f64::from(u8::from(self.reset_engaged)));
    }

    fn read_numeric_state(&mut self, state: &[f64]) {
        self.theta = state[0];
        self.engagement = LimitEngagement::from_code(state[1]);
        self.engaged_cnt = state[2] as u32;
        self.reset_engaged = state[3] > 0.5;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Pure rotation about z by `theta`.
fn z_rotation(theta: f64) -> Pose {
    Pose::from_position_rotation(
        Point3::origin(),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta),
    )
}

/// Logarithm of a rotation matrix: the axis-angle vector.
fn rot_log(r: &Matrix3<f64>) -> Vector3<f64> {
    let s = 0.5
        * Vector3::new(
            r[(2, 1)] - r[(1, 2)],
            r[(0, 2)] - r[(2, 0)],
            r[(1, 0)] - r[(0, 1)],
        );
    let c = 0.5 * (r.trace() - 1.0);
    let sn = s.norm();
    if sn < 1e-12 {
        return s;
    }
    s * (sn.atan2(c) / sn)
}

/// Frame at `origin` whose z axis points along `zdir`. The x axis is chosen
/// from the world axis least aligned with z; since both attachment frames
/// derive from the same frame, the choice cancels out of the joint angle.
pub(crate) fn frame_with_z(origin: Point3<f64>, zdir: &Vector3<f64>) -> Result<Pose> {
    let norm = zdir.norm();
    if norm <= f64::EPSILON {
        return Err(PosefitError::invalid_config("joint axis has zero length"));
    }
    let z = zdir / norm;
    let mut imin = 0;
    for i in 1..3 {
        if z[i].abs() < z[imin].abs() {
            imin = i;
        }
    }
    let mut e = Vector3::zeros();
    e[imin] = 1.0;
    let x = e.cross(&z).normalize();
    let y = z.cross(&x);
    let rot = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x, y, z]));
    Ok(Pose::from_position_rotation(
        origin,
        UnitQuaternion::from_rotation_matrix(&rot),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grounded_hinge_z() -> (Vec<RigidBody>, HingeJoint) {
        let bodies = vec![RigidBody::new("arm")];
        let hinge = HingeJoint::from_world_axis(
            &bodies,
            BodyId::new(0),
            None,
            Point3::origin(),
            Vector3::z(),
        )
        .unwrap();
        (bodies, hinge)
    }

    #[test]
    fn test_initial_state_is_aligned() {
        let (bodies, mut hinge) = grounded_hinge_z();
        hinge.update_state(&bodies, true);
        assert_relative_eq!(hinge.theta(), 0.0, epsilon = 1e-14);
        for e in hinge.err {
            assert_relative_eq!(e, 0.0, epsilon = 1e-14);
        }
        let mut rows = Vec::new();
        hinge.append_bilateral_rows(&bodies, &mut rows);
        assert_eq!(rows.len(), 5);
        assert_eq!(hinge.num_unilateral(), 0);
    }

    #[test]
    fn test_theta_tracks_body_rotation() {
        let (mut bodies, mut hinge) = grounded_hinge_z();
        bodies[0].pose.rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3);
        hinge.update_state(&bodies, false);
        assert_relative_eq!(hinge.theta(), 0.3, epsilon = 1e-12);
        // The off-axis error stays zero for a pure rotation about the axis.
        for e in hinge.err {
            assert_relative_eq!(e, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_set_theta_roundtrip_and_clip() {
        let (mut bodies, mut hinge) = grounded_hinge_z();
        hinge.set_range(-0.2, 0.2).unwrap();

        let applied = hinge.set_theta(&mut bodies, 0.15);
        assert_relative_eq!(applied, 0.15, epsilon = 1e-15);
        hinge.update_state(&bodies, false);
        assert_relative_eq!(hinge.theta(), 0.15, epsilon = 1e-12);

        let applied = hinge.set_theta(&mut bodies, 0.5);
        assert_relative_eq!(applied, 0.2, epsilon = 1e-15);
        hinge.update_state(&bodies, false);
        assert_relative_eq!(hinge.theta(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_limit_engagement_cycle() {
        let (mut bodies, mut hinge) = grounded_hinge_z();
        hinge.set_range(-0.2, 0.2).unwrap();

        // Drive the body past the upper limit without going through
        // set_theta, as the solver does during iteration.
        bodies[0].pose.rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3);
        hinge.update_state(&bodies, true);
        assert_eq!(hinge.engagement(), LimitEngagement::High);
        assert_eq!(hinge.num_unilateral(), 1);

        let mut rows = Vec::new();
        hinge.append_unilateral_rows(&bodies, &mut rows);
        assert_eq!(rows.len(), 1);
        // Engaged at the upper bound: the constraint pushes theta down.
        assert!(rows[0].blocks[0].wrench.moment.z < 0.0);
        assert_relative_eq!(
            rows[0].distance,
            -0.1 + DEFAULT_ROTARY_TOLERANCE,
            epsilon = 1e-12
        );

        // Still inside range but engaged: stays engaged without a reset.
        bodies[0].pose.rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.1);
        hinge.update_state(&bodies, true);
        assert_eq!(hinge.engagement(), LimitEngagement::High);
        assert!(hinge.engaged_count() > 1);

        // set_theta requests a reset; the next engagement update releases.
        hinge.set_theta(&mut bodies, 0.0);
        hinge.update_state(&bodies, true);
        assert_eq!(hinge.engagement(), LimitEngagement::None);
        assert_eq!(hinge.num_unilateral(), 0);
    }

    #[test]
    fn test_coordinate_wrench_is_axial_moment_pair() {
        let bodies = vec![RigidBody::new("a"), RigidBody::new("b")];
        let mut hinge = HingeJoint::from_world_axis(
            &bodies,
            BodyId::new(0),
            Some(BodyId::new(1)),
            Point3::origin(),
            Vector3::z(),
        )
        .unwrap();
        hinge.update_state(&bodies, false);

        let mut blocks = Vec::new();
        hinge.append_coordinate_wrench(0, 2.0, &mut blocks);
        assert_eq!(blocks.len(), 2);
        assert_relative_eq!(blocks[0].wrench.moment, Vector3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
        assert_relative_eq!(blocks[1].wrench.moment, Vector3::new(0.0, 0.0, -2.0), epsilon = 1e-12);
        assert_relative_eq!(blocks[0].wrench.force.norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_rejects_degenerate_axis() {
        let bodies = vec![RigidBody::new("a")];
        let r = HingeJoint::from_world_axis(
            &bodies,
            BodyId::new(0),
            None,
            Point3::origin(),
            Vector3::zeros(),
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_numeric_state_roundtrip() {
        let (mut bodies, mut hinge) = grounded_hinge_z();
        hinge.set_range(-0.2, 0.2).unwrap();
        bodies[0].pose.rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3);
        hinge.update_state(&bodies, true);

        let mut state = Vec::new();
        hinge.write_numeric_state(&mut state);
        assert_eq!(state.len(), hinge.numeric_state_size());

        let mut other = HingeJoint::new(
            BodyId::new(0),
            None,
            Pose::identity(),
            Pose::identity(),
        );
        other.read_numeric_state(&state);
        assert_relative_eq!(other.theta(), hinge.theta(), epsilon = 1e-15);
        assert_eq!(other.engagement(), hinge.engagement());
        assert_eq!(other.engaged_count(), hinge.engaged_count());
    }
}
