//! Shared fixtures for the solver integration tests.
//!
//! The two-link arm here mirrors a planar elbow: link0 hangs from a ground
//! hinge at the origin, link1 hangs from an elbow hinge at (0, 0, 1), and
//! nine markers sit on the link surfaces. Both hinge axes point along -y, so
//! positive angles swing the links toward +x.

#![allow(dead_code)]

use nalgebra::{Point3, UnitQuaternion, Vector3};

use posefit_ik::{
    BodyId, ConnectorId, HingeJoint, MarkerId, Model, Pose, RigidBody, SpatialInertia,
};

/// A solid box body with inertia from uniform density.
pub fn box_body(name: &str, wx: f64, wy: f64, wz: f64, density: f64) -> RigidBody {
    RigidBody::new(name).with_inertia(SpatialInertia::box_from_density(
        density,
        Vector3::new(wx, wy, wz),
    ))
}

/// Rotation about the world y axis by `deg` degrees.
pub fn rot_y(deg: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), deg.to_radians())
}

/// Two-link arm fixture.
pub struct TwoLink {
    /// Spare body, untouched by the arm. Toggling its dynamic flag shifts
    /// every solve index without changing the mechanism.
    pub dummy: BodyId,
    pub link0: BodyId,
    pub link1: BodyId,
    /// Ground hinge at the origin.
    pub j0: ConnectorId,
    /// Elbow hinge at (0, 0, 1), range-limited to +/-30 degrees.
    pub j1: ConnectorId,
    /// Nine markers: the first five on link1, the rest on link0.
    pub markers: Vec<MarkerId>,
}

/// Base of the arm: the spare body plus link0 standing upright on a ground
/// hinge at the origin. Returns `(dummy, link0, j0)`.
pub fn build_one_link(model: &mut Model, offset_frames: bool) -> (BodyId, BodyId, ConnectorId) {
    let dummy = model.add_body(box_body("dummy", 0.5, 0.5, 0.5, 1000.0));
    let link0 = model.add_body(
        box_body("link0", 1.0, 0.25, 0.25, 1000.0).with_pose(Pose::from_position_rotation(
            Point3::new(0.0, 0.0, 0.5),
            rot_y(-90.0),
        )),
    );
    if offset_frames {
        model.bodies_mut()[link0.index()].translate_frame(Vector3::new(0.0, 0.0, -0.5));
    }
    let j0 = model
        .add_hinge_at(link0, None, Point3::origin(), Vector3::new(0.0, -1.0, 0.0))
        .expect("ground hinge");
    (dummy, link0, j0)
}

/// Build the two-link arm. With `offset_frames` the link coordinate frames
/// are shifted away from the link centers before the joints and markers are
/// attached, so the attachment frames and marker locals all differ while the
/// world geometry stays the same.
pub fn build_two_link(model: &mut Model, offset_frames: bool) -> TwoLink {
    let (dummy, link0, j0) = build_one_link(model, offset_frames);

    let link1 = model.add_body(
        box_body("link1", 0.6, 0.15, 0.15, 1000.0).with_pose(Pose::from_position_rotation(
            Point3::new(0.0, 0.0, 1.3),
            rot_y(-90.0),
        )),
    );
    if offset_frames {
        model.bodies_mut()[link1.index()].translate_frame(Vector3::new(0.0, 0.0, -0.3));
    }
    let j1 = model
        .add_hinge_at(
            link1,
            Some(link0),
            Point3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, -1.0, 0.0),
        )
        .expect("elbow hinge");
    model
        .connector_as_mut::<HingeJoint>(j1)
        .expect("elbow is a hinge")
        .set_range((-30.0_f64).to_radians(), 30.0_f64.to_radians())
        .expect("ordered range");

    let locations = [
        [0.0, 0.0, 1.6],
        [-0.075, 0.0, 1.3],
        [0.075, 0.0, 1.3],
        [0.0, -0.075, 1.15],
        [0.0, 0.075, 1.15],
        [0.0, -0.125, 1.0],
        [0.0, 0.125, 1.0],
        [0.125, 0.0, 0.5],
        [-0.125, 0.0, 0.5],
    ];
    let markers = locations
        .iter()
        .enumerate()
        .map(|(i, loc)| {
            let body = if i < 5 { link1 } else { link0 };
            model
                .add_marker_world(body, Point3::new(loc[0], loc[1], loc[2]))
                .expect("marker on link")
        })
        .collect();

    TwoLink {
        dummy,
        link0,
        link1,
        j0,
        j1,
        markers,
    }
}

/// Current world positions of the given markers, flattened to target layout.
pub fn collect_markers(model: &Model, markers: &[MarkerId]) -> Vec<f64> {
    let mut out = Vec::with_capacity(3 * markers.len());
    for &mid in markers {
        let w = model.markers()[mid.index()].world;
        out.extend_from_slice(&[w.x, w.y, w.z]);
    }
    out
}

/// Largest absolute component difference between two target vectors.
pub fn max_component_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Drive the arm to joint angles `(a0, a1)` (radians), collect the marker
/// positions there as targets, and move the arm back to where it was.
pub fn targets_at_angles(
    model: &mut Model,
    j0: ConnectorId,
    j1: ConnectorId,
    a0: f64,
    a1: f64,
    markers: &[MarkerId],
) -> Vec<f64> {
    let s0 = model.coordinate(j0, 0).expect("base angle");
    let s1 = model.coordinate(j1, 0).expect("elbow angle");
    model.set_coordinate(j0, 0, a0).expect("set base angle");
    model.set_coordinate(j1, 0, a1).expect("set elbow angle");
    let targets = collect_markers(model, markers);
    model.set_coordinate(j1, 0, s1).expect("restore elbow angle");
    model.set_coordinate(j0, 0, s0).expect("restore base angle");
    targets
}

/// Piecewise-linear interpolation through `(t, value)` knots.
pub fn interp1(knots: &[(f64, f64)], t: f64) -> f64 {
    for pair in knots.windows(2) {
        let (t0, v0) = pair[0];
        let (t1, v1) = pair[1];
        if t0 <= t && t <= t1 {
            let s = (t - t0) / (t1 - t0);
            return v0 + s * (v1 - v0);
        }
    }
    knots[knots.len() - 1].1
}

/// Piecewise-linear interpolation of an angle pair through `(t, a, b)` knots.
pub fn interp2(knots: &[(f64, f64, f64)], t: f64) -> (f64, f64) {
    for pair in knots.windows(2) {
        let (t0, a0, b0) = pair[0];
        let (t1, a1, b1) = pair[1];
        if t0 <= t && t <= t1 {
            let s = (t - t0) / (t1 - t0);
            return (a0 + s * (a1 - a0), b0 + s * (b1 - b0));
        }
    }
    let last = knots[knots.len() - 1];
    (last.1, last.2)
}
