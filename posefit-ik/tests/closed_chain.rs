//! Pose fitting on a closed kinematic chain.
//!
//! A four-bar linkage with one grounded bar is a single-degree-of-freedom
//! loop; its constraint rows are redundant, so the bilateral rows carry a
//! small compliance. The tests fit the loop to closed-form marker targets
//! for a range of crank angles and marker counts, including a marker on the
//! grounded bar itself.

mod common;

use std::f64::consts::FRAC_PI_2;

use nalgebra::{Point3, UnitQuaternion, Vector3};
use posefit_ik::{BodyId, HingeJoint, IkSolver, MarkerId, Model, Pose};

const BAR_LEN: f64 = 1.0;
const BAR_WIDTH: f64 = 0.25;

/// Assemble the loop: four bars in a square, hinged end to end about the
/// world y axis, with `nmk` markers on the bar midpoints starting from the
/// crank.
fn build_four_bar(nmk: usize) -> (Model, Vec<BodyId>, Vec<MarkerId>) {
    let mut model = Model::new();
    let placements = [
        (-0.5, 0.0, 0.0),
        (0.0, 0.5, 90.0),
        (0.5, 0.0, 180.0),
        (0.0, -0.5, 270.0),
    ];
    let bars: Vec<BodyId> = placements
        .iter()
        .enumerate()
        .map(|(i, &(x, z, deg))| {
            model.add_body(
                common::box_body(&format!("bar{i}"), BAR_LEN, BAR_WIDTH, 0.25, 1000.0).with_pose(
                    Pose::from_position_rotation(Point3::new(x, 0.0, z), common::rot_y(deg)),
                ),
            )
        })
        .collect();
    model.bodies_mut()[bars[0].index()].set_grounded(true);

    // Each hinge joins the +z end of one bar to the -z end of the next, with
    // the rotation axis along world y.
    let tca = Pose::from_position_rotation(
        Point3::new(0.0, 0.0, 0.5),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
    );
    let tdb = Pose::from_position_rotation(
        Point3::new(0.0, 0.0, -0.5),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
    );
    for j in 0..4 {
        let mut hinge = HingeJoint::new(bars[j], Some(bars[(j + 1) % 4]), tca, tdb);
        hinge.set_compliance([1e-7, 1e-7, 1e-7, 1e-7, 1e-7, 0.0]);
        model.add_connector(hinge).expect("loop hinge");
    }

    let markers = (0..nmk)
        .map(|i| {
            model
                .add_marker(bars[(i + 1) % 4], Point3::new(-BAR_WIDTH / 2.0, 0.0, 0.0))
                .expect("bar marker")
        })
        .collect();
    (model, bars, markers)
}

/// Marker positions of the loop at crank angle `theta`, from the closed-form
/// parallelogram geometry.
fn four_bar_targets(theta: f64, nmk: usize) -> Vec<f64> {
    let (s, c) = theta.sin_cos();
    let pts = [
        [
            c * BAR_LEN / 2.0 - s * BAR_WIDTH / 2.0 - BAR_LEN / 2.0,
            0.0,
            s * BAR_LEN / 2.0 + c * BAR_WIDTH / 2.0 + BAR_LEN / 2.0,
        ],
        [c * BAR_LEN + BAR_WIDTH / 2.0 - BAR_LEN / 2.0, 0.0, s * BAR_LEN],
        [
            c * BAR_LEN / 2.0 + s * BAR_WIDTH / 2.0 - BAR_LEN / 2.0,
            0.0,
            s * BAR_LEN / 2.0 - c * BAR_WIDTH / 2.0 - BAR_LEN / 2.0,
        ],
        [-(BAR_LEN + BAR_WIDTH) / 2.0, 0.0, 0.0],
    ];
    pts[..nmk].iter().flatten().copied().collect()
}

fn run_four_bar(nmk: usize) {
    let (model, _bars, markers) = build_four_bar(nmk);
    let mut solver = IkSolver::new(model, &markers).expect("solver");

    for angle_deg in [20.0_f64, 45.0, 15.0, 0.0, -15.0, -45.0] {
        let targets = four_bar_targets(angle_deg.to_radians(), nmk);
        let iterations = solver.solve(&targets).expect("solve");
        assert!(
            iterations >= 0,
            "four bar nmk={nmk} angle {angle_deg} did not converge"
        );
        let reached = common::collect_markers(solver.model(), &markers);
        let err = common::max_component_error(&reached, &targets);
        assert!(
            err < 1e-7,
            "four bar nmk={nmk} angle {angle_deg} error {err}"
        );
    }
}

// ============================================================================
// Crank tracking from 1 to 4 markers
// ============================================================================

#[test]
fn test_four_bar_single_marker() {
    run_four_bar(1);
}

#[test]
fn test_four_bar_two_markers() {
    run_four_bar(2);
}

#[test]
fn test_four_bar_three_markers() {
    run_four_bar(3);
}

#[test]
fn test_four_bar_all_bars_marked() {
    run_four_bar(4);
}

// ============================================================================
// Network queries on the loop
// ============================================================================

#[test]
fn test_grounded_bar_is_the_fixed_anchor() {
    // With a marker on every bar the grounded one joins the network as a
    // seed; it anchors the loop instead of attaching it to ground.
    let (model, bars, markers) = build_four_bar(4);
    let mut solver = IkSolver::new(model, &markers).expect("solver");
    assert_eq!(solver.num_bodies().expect("network"), 4);
    assert!(!solver.is_connected_to_ground().expect("network"));
    assert_eq!(solver.find_fixed_body().expect("network"), Some(bars[0]));
}

#[test]
fn test_grounded_bar_left_out_without_marker() {
    let (model, bars, markers) = build_four_bar(1);
    let mut solver = IkSolver::new(model, &markers).expect("solver");
    assert_eq!(solver.num_bodies().expect("network"), 3);
    let bodies = solver.bodies().expect("network");
    assert!(!bodies.contains(&bars[0]));
    // All four hinges still constrain the loop.
    assert_eq!(solver.connectors().expect("network").len(), 4);
    assert_eq!(solver.find_fixed_body().expect("network"), None);
}
