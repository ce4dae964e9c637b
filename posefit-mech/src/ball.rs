//! Ball joint: a spherical constraint pinning two attachment points together.

use std::any::Any;

use nalgebra::{Point3, Vector3};

use posefit_types::{BodyId, Pose, Result, RigidBody, Wrench};

use crate::connector::{body_pose, Connector, ConstraintBlock, ConstraintRow};

/// Ball joint between two bodies, or between a body and ground. Constrains
/// the three translational directions and leaves rotation free, so it has
/// no joint coordinates.
#[derive(Debug, Clone)]
pub struct BallJoint {
    body_a: BodyId,
    body_b: Option<BodyId>,
    enabled: bool,
    /// C frame relative to body A.
    tca: Pose,
    /// D frame relative to body B, or its world pose if grounded.
    tdb: Pose,
    compliance: [f64; 3],
    // state refreshed by update_state
    p_c: Point3<f64>,
    p_d: Point3<f64>,
}

impl BallJoint {
    /// Create a ball joint centered on a world-space `point`, deriving both
    /// attachment frames from the current body poses.
    pub fn at_point(
        bodies: &[RigidBody],
        body_a: BodyId,
        body_b: Option<BodyId>,
        point: Point3<f64>,
    ) -> Result<Self> {
        let tdw0 = Pose::from_position(point);
        let tca = body_pose(bodies, body_a)?.inverse().compose(&tdw0);
        let tdb = match body_b {
            Some(b) => body_pose(bodies, b)?.inverse().compose(&tdw0),
            None => tdw0,
        };
        Ok(Self {
            body_a,
            body_b,
            enabled: true,
            tca,
            tdb,
            compliance: [0.0; 3],
            p_c: point,
            p_d: point,
        })
    }

    /// Set the compliances of the three translational rows.
    pub fn set_compliance(&mut self, compliance: [f64; 3]) {
        self.compliance = compliance;
    }

    /// World-space separation of the attachment points.
    #[must_use]
    pub fn separation(&self) -> Vector3<f64> {
        self.p_c - self.p_d
    }
}

impl Connector for BallJoint {
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
        3
    }

    fn num_unilateral(&self) -> usize {
        0
    }

    fn update_state(&mut self, bodies: &[RigidBody], _update_engaged: bool) {
        let tcw = bodies[self.body_a.index()].pose.compose(&self.tca);
        let tdw = match self.body_b {
            Some(b) => bodies[b.index()].pose.compose(&self.tdb),
            None => self.tdb,
        };
        self.p_c = tcw.position;
        self.p_d = tdw.position;
    }

    fn append_bilateral_rows(&self, bodies: &[RigidBody], rows: &mut Vec<ConstraintRow>) {
        let d = self.p_c - self.p_d;
        let p_a = bodies[self.body_a.index()].pose.position;
        for k in 0..3 {
            let mut a = Vector3::zeros();
            a[k] = 1.0;
            let mut blocks = Vec::with_capacity(2);
            blocks.push(ConstraintBlock {
                body: self.body_a,
                wrench: Wrench::from_force_at(a, self.p_c - p_a),
            });
            if let Some(b) = self.body_b {
                let p_b = bodies[b.index()].pose.position;
                blocks.push(ConstraintBlock {
                    body: b,
                    wrench: -Wrench::from_force_at(a, self.p_d - p_b),
                });
            }
            rows.push(ConstraintRow {
                blocks,
                distance: d[k],
                compliance: self.compliance[k],
            });
        }
    }

    fn append_unilateral_rows(&self, _bodies: &[RigidBody], _rows: &mut Vec<ConstraintRow>) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rows_track_separation() {
        let mut bodies = vec![
            RigidBody::new("a").with_pose(Pose::from_position(Point3::new(0.0, 0.0, 1.0))),
            RigidBody::new("b"),
        ];
        let mut ball = BallJoint::at_point(
            &bodies,
            BodyId::new(0),
            Some(BodyId::new(1)),
            Point3::new(0.0, 0.0, 0.5),
        )
        .unwrap();

        ball.update_state(&bodies, true);
        assert_relative_eq!(ball.separation().norm(), 0.0, epsilon = 1e-14);

        // Pull body A up by 0.1; each row's distance picks up the
        // corresponding component of the separation.
        bodies[0].pose.position.z += 0.1;
        ball.update_state(&bodies, true);
        let mut rows = Vec::new();
        ball.append_bilateral_rows(&bodies, &mut rows);
        assert_eq!(rows.len(), 3);
        assert_relative_eq!(rows[0].distance, 0.0, epsilon = 1e-14);
        assert_relative_eq!(rows[2].distance, 0.1, epsilon = 1e-14);

        // Wrench on A acts at the attachment offset below the body origin.
        let arm_moment = rows[0].blocks[0].wrench.moment;
        assert_relative_eq!(arm_moment, Vector3::new(0.0, -0.5, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_grounded_ball() {
        let bodies = vec![RigidBody::new("a")];
        let mut ball =
            BallJoint::at_point(&bodies, BodyId::new(0), None, Point3::new(1.0, 0.0, 0.0))
                .unwrap();
        ball.update_state(&bodies, true);
        let mut rows = Vec::new();
        ball.append_bilateral_rows(&bodies, &mut rows);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].blocks.len(), 1);
        assert_eq!(ball.num_coordinates(), 0);
    }
}
