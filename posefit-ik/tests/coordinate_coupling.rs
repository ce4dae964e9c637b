//! Fitting through a coordinate coupling.
//!
//! The two-link arm gets a gear relation `theta1 = 1.5 * theta0`. Targets
//! generated with exactly that ratio must be hit to marker precision, and
//! targets generated with a deliberately wrong ratio must still come back
//! with the coupling satisfied, trading marker error for the constraint.

mod common;

use posefit_ik::{CoordinateCoupling, CouplingTerm, HingeJoint, IkSolver, Model};

const GEAR_RATIO: f64 = 1.5;

fn run_coupled_arm(nmk: usize) {
    let mut model = Model::new();
    let rig = common::build_two_link(&mut model, false);
    model
        .connector_as_mut::<HingeJoint>(rig.j0)
        .expect("base hinge")
        .set_range((-60.0_f64).to_radians(), 60.0_f64.to_radians())
        .expect("ordered range");
    model
        .connector_as_mut::<HingeJoint>(rig.j1)
        .expect("elbow hinge")
        .set_range((-90.0_f64).to_radians(), 90.0_f64.to_radians())
        .expect("ordered range");
    model
        .add_coupling(CoordinateCoupling::new(
            vec![
                CouplingTerm::new(rig.j1, 0, 1.0),
                CouplingTerm::new(rig.j0, 0, -GEAR_RATIO),
            ],
            0.0,
        ))
        .expect("gear coupling");

    let tracked = rig.markers[..nmk].to_vec();
    let mut solver = IkSolver::new(model, &tracked).expect("solver");

    let knots = [(0.0, 0.0), (0.5, -59.0), (1.0, 59.0), (2.0, 0.0)];
    // First pass generates targets obeying the gear ratio; the second breaks
    // it by 10 percent so the targets are unreachable.
    for (elbow_scale, reachable) in [(GEAR_RATIO, true), (GEAR_RATIO * 1.1, false)] {
        for k in 0..11 {
            let t = 2.0 * f64::from(k) / 10.0;
            let a0 = common::interp1(&knots, t).to_radians();

            let model = solver.model_mut();
            let s0 = model.coordinate(rig.j0, 0).expect("base angle");
            let s1 = model.coordinate(rig.j1, 0).expect("elbow angle");
            model.set_coordinate(rig.j0, 0, a0).expect("set base");
            model
                .set_coordinate(rig.j1, 0, elbow_scale * a0)
                .expect("set elbow");
            let targets = common::collect_markers(model, &tracked);
            model.set_coordinate(rig.j1, 0, s1).expect("restore elbow");
            model.set_coordinate(rig.j0, 0, s0).expect("restore base");

            let iterations = solver.solve(&targets).expect("solve");
            assert!(
                iterations >= 0,
                "coupled nmk={nmk} scale={elbow_scale} sample {k} did not converge"
            );

            let model = solver.model_mut();
            let th0 = model.coordinate(rig.j0, 0).expect("base angle");
            let th1 = model.coordinate(rig.j1, 0).expect("elbow angle");
            assert!(
                (th1 - GEAR_RATIO * th0).abs() < 1e-6,
                "gear ratio violated: theta1={th1} theta0={th0}"
            );
            if reachable {
                let reached = common::collect_markers(solver.model(), &tracked);
                let err = common::max_component_error(&reached, &targets);
                assert!(err < 1e-7, "coupled nmk={nmk} sample {k} error {err}");
            }
        }
    }
}

#[test]
fn test_coupled_arm_two_markers() {
    run_coupled_arm(2);
}

#[test]
fn test_coupled_arm_five_markers() {
    run_coupled_arm(5);
}

#[test]
fn test_coupled_arm_all_markers() {
    run_coupled_arm(9);
}
