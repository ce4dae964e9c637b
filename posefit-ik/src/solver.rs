//! Marker-driven pose fitting.
//!
//! [`IkSolver`] owns a [`Model`] and a set of tracked markers. Each call to
//! [`solve`](IkSolver::solve) moves the bodies reachable from those markers
//! so the marker world positions match a target vector in the weighted
//! least-squares sense, while every connector's bilateral rows are held at
//! zero and engaged limit rows are kept non-negative.
//!
//! The fit runs a Newton-like loop: linearize the marker residuals about the
//! current poses, solve one constrained least-squares step through the KKT
//! system, advance the poses along the resulting spatial velocity, and repeat
//! until the scaled RMS of the increment drops below tolerance. A final
//! zero-residual projection lands the bodies exactly on the constraint
//! surface.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use posefit_ik::IkSolver;
//! use posefit_mech::Model;
//! use posefit_types::RigidBody;
//!
//! # fn main() -> Result<(), posefit_types::PosefitError> {
//! let mut model = Model::new();
//! let body = model.add_body(RigidBody::new("box"));
//! let markers = vec![
//!     model.add_marker(body, Point3::origin())?,
//!     model.add_marker(body, Point3::new(0.5, 0.0, 0.0))?,
//!     model.add_marker(body, Point3::new(0.0, 0.5, 0.0))?,
//! ];
//!
//! let mut solver = IkSolver::new(model, &markers)?;
//! // Targets are the marker positions shifted 0.1 along x.
//! let targets = [
//!     0.1, 0.0, 0.0, //
//!     0.6, 0.0, 0.0, //
//!     0.1, 0.5, 0.0,
//! ];
//! let iterations = solver.solve(&targets)?;
//! assert!(iterations >= 0);
//! # Ok(())
//! # }
//! ```

use tracing::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use posefit_mech::{Model, ModelState};
use posefit_types::{BodyId, ConnectorId, MarkerId, Pose, PosefitError, Result};

use crate::kkt::KktSolver;
use crate::network::BodyNetwork;

/// Configuration for the pose-fit loop.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IkConfig {
    /// Stiffness given to pose directions the marker layout cannot observe
    /// (and to marker-free bodies), as a fraction of the average marker
    /// weight. Keeps every fit block invertible.
    pub mass_regularization: f64,

    /// Iteration cap for a single [`solve`](IkSolver::solve) call.
    pub max_iterations: u32,

    /// Convergence threshold on the scaled RMS of the pose increment.
    /// Translational components are divided by the network's characteristic
    /// size before the norm is taken.
    pub convergence_tol: f64,

    /// Levenberg-style damping: fit blocks are scaled by `1 + damping`,
    /// shortening each step. Zero takes plain Gauss-Newton steps.
    pub damping: f64,

    /// Add the Jacobian-derivative term to the fit blocks. The blocks become
    /// unsymmetric and the per-body factorization switches from Cholesky to
    /// LU.
    pub second_order: bool,
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            mass_regularization: 0.001,
            max_iterations: 30,
            convergence_tol: 1e-8,
            damping: 0.0,
            second_order: false,
        }
    }
}

impl IkConfig {
    /// Tight tolerances for offline batch fitting.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            max_iterations: 100,
            convergence_tol: 1e-10,
            ..Self::default()
        }
    }

    /// Loose tolerances for per-frame interactive tracking.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            max_iterations: 10,
            convergence_tol: 1e-6,
            ..Self::default()
        }
    }

    /// Set the regularization coefficient (builder style).
    #[must_use]
    pub const fn with_mass_regularization(mut self, value: f64) -> Self {
        self.mass_regularization = value;
        self
    }

    /// Set the iteration cap (builder style).
    #[must_use]
    pub const fn with_max_iterations(mut self, value: u32) -> Self {
        self.max_iterations = value;
        self
    }

    /// Set the convergence threshold (builder style).
    #[must_use]
    pub const fn with_convergence_tol(mut self, value: f64) -> Self {
        self.convergence_tol = value;
        self
    }

    /// Set the damping factor (builder style).
    #[must_use]
    pub const fn with_damping(mut self, value: f64) -> Self {
        self.damping = value;
        self
    }

    /// Enable or disable the second-order fit term (builder style).
    #[must_use]
    pub const fn with_second_order(mut self, value: bool) -> Self {
        self.second_order = value;
        self
    }

    /// Check the configuration for values the solver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.mass_regularization.is_finite() || self.mass_regularization <= 0.0 {
            return Err(PosefitError::invalid_config(
                "mass_regularization must be positive and finite",
            ));
        }
        if self.max_iterations == 0 {
            return Err(PosefitError::invalid_config(
                "max_iterations must be at least 1",
            ));
        }
        if !self.convergence_tol.is_finite() || self.convergence_tol <= 0.0 {
            return Err(PosefitError::invalid_config(
                "convergence_tol must be positive and finite",
            ));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(PosefitError::invalid_config(
                "damping must be non-negative and finite",
            ));
        }
        Ok(())
    }
}

/// Fits rigid-body poses to marker targets through the model's connectors.
///
/// The solver owns the model. Structural edits between solves go through
/// [`model_mut`](IkSolver::model_mut) followed by
/// [`invalidate_topology`](IkSolver::invalidate_topology); pose and
/// coordinate edits need no invalidation.
#[derive(Debug)]
pub struct IkSolver {
    model: Model,
    marker_ids: Vec<MarkerId>,
    weights: Vec<f64>,
    config: IkConfig,
    network: Option<BodyNetwork>,
    num_iterations: u64,
    num_solves: u64,
    saved_state: Option<ModelState>,
}

impl IkSolver {
    /// Create a solver tracking `markers` with unit weights.
    ///
    /// # Errors
    ///
    /// Fails if `markers` is empty or references a marker the model does not
    /// have.
    pub fn new(model: Model, markers: &[MarkerId]) -> Result<Self> {
        if markers.is_empty() {
            return Err(PosefitError::EmptyMarkerSet);
        }
        for &mid in markers {
            if model.marker(mid).is_none() {
                return Err(PosefitError::InvalidMarkerId(mid.raw()));
            }
        }
        Ok(Self {
            model,
            marker_ids: markers.to_vec(),
            weights: vec![1.0; markers.len()],
            config: IkConfig::default(),
            network: None,
            num_iterations: 0,
            num_solves: 0,
            saved_state: None,
        })
    }

    /// Replace the configuration (builder style), validating it first.
    pub fn with_config(mut self, config: IkConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        if let Some(net) = self.network.as_mut() {
            net.rebuild_inertia(&self.model, &self.weights, &self.config);
        }
        Ok(self)
    }

    /// Set the marker weights (builder style).
    pub fn with_marker_weights(mut self, weights: &[f64]) -> Result<Self> {
        self.set_marker_weights(weights)?;
        Ok(self)
    }

    /// Solve for the poses that fit the markers to `targets` (3 values per
    /// tracked marker, in tracking order). Body poses and marker positions
    /// are updated in place.
    ///
    /// Returns the iteration count on convergence, or `-1` if the iteration
    /// cap was reached first. Either way the model is left on the constraint
    /// surface and the solve counters are updated.
    ///
    /// # Errors
    ///
    /// Fails if `targets` is shorter than `3 * num_markers()`, or if the
    /// assembled fit system cannot be factored.
    pub fn solve(&mut self, targets: &[f64]) -> Result<i32> {
        self.ensure_network()?;
        let Some(net) = self.network.as_mut() else {
            return Err(PosefitError::numerical("marker network unavailable"));
        };
        net.refresh_index_map(&mut self.model);

        let expected = 3 * self.marker_ids.len();
        if targets.len() < expected {
            return Err(PosefitError::TargetSizeMismatch {
                expected,
                actual: targets.len(),
            });
        }

        debug!(
            markers = self.marker_ids.len(),
            bodies = net.num_bodies(),
            connectors = net.con_set.len(),
            "starting pose fit"
        );

        let mut disps = vec![0.0; expected];
        marker_displacements(&self.model, &self.marker_ids, targets, &mut disps);

        let mut icnt: u32 = 0;
        let mut converged = false;
        let mut q_prev = net.pos_state(&self.model);
        loop {
            net.update_connector_states(&mut self.model, true)?;
            let cons = net.assemble_constraints(&self.model);
            let (blocks, bm) = net.fit_system(&self.model, &disps, &self.config);
            let kkt = KktSolver::new(&blocks, !self.config.second_order, &cons)?;
            let step = kkt.solve_with_limits(&bm)?;
            net.step_pos_state(&mut self.model, &q_prev, &step.velocity, 1.0);
            icnt += 1;

            let increment = net.dq_norm(&step.velocity);
            trace!(
                iteration = icnt,
                increment,
                constraint_impulse = step.lambda.norm(),
                limit_impulse = step.theta.norm(),
                "pose fit step"
            );
            if increment <= self.config.convergence_tol {
                converged = true;
            } else {
                marker_displacements(&self.model, &self.marker_ids, targets, &mut disps);
            }
            q_prev = net.pos_state(&self.model);
            if converged || icnt >= self.config.max_iterations {
                break;
            }
        }

        constraint_projection(net, &mut self.model, &self.config, self.marker_ids.len())?;

        self.num_iterations += u64::from(icnt);
        self.num_solves += 1;

        let energy = residual_energy(&self.model, &self.marker_ids, &self.weights, targets);
        if converged {
            debug!(
                iterations = icnt,
                residual_energy = energy,
                "pose fit converged"
            );
            Ok(i32::try_from(icnt).unwrap_or(i32::MAX))
        } else {
            warn!(
                iterations = icnt,
                residual_energy = energy,
                "pose fit stopped at the iteration cap"
            );
            Ok(-1)
        }
    }

    /// Push the network bodies onto the constraint surface without pulling
    /// any marker toward a target. Used at the end of every solve; callable
    /// on its own after external pose edits.
    ///
    /// # Errors
    ///
    /// Fails if the fit system cannot be factored.
    pub fn project_to_constraints(&mut self) -> Result<()> {
        self.ensure_network()?;
        let Some(net) = self.network.as_mut() else {
            return Err(PosefitError::numerical("marker network unavailable"));
        };
        net.refresh_index_map(&mut self.model);
        constraint_projection(net, &mut self.model, &self.config, self.marker_ids.len())
    }

    // ------------------------------------------------------------------
    // weights
    // ------------------------------------------------------------------

    /// Replace the per-marker fit weights, rebuilding the cached fit blocks.
    ///
    /// # Errors
    ///
    /// Fails if the length differs from the marker count or any weight is
    /// not positive and finite.
    pub fn set_marker_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.marker_ids.len() {
            return Err(PosefitError::WeightSizeMismatch {
                expected: self.marker_ids.len(),
                actual: weights.len(),
            });
        }
        for &w in weights {
            if !w.is_finite() || w <= 0.0 {
                return Err(PosefitError::invalid_marker(format!(
                    "weight {w} is not positive"
                )));
            }
        }
        self.weights.clear();
        self.weights.extend_from_slice(weights);
        if let Some(net) = self.network.as_mut() {
            net.rebuild_inertia(&self.model, &self.weights, &self.config);
        }
        Ok(())
    }

    /// The per-marker fit weights, in tracking order.
    #[must_use]
    pub fn marker_weights(&self) -> &[f64] {
        &self.weights
    }

    // ------------------------------------------------------------------
    // state snapshots
    // ------------------------------------------------------------------

    /// Capture the model's numeric state so a later
    /// [`restore_model_state`](Self::restore_model_state) undoes the pose
    /// changes made by intervening solves.
    pub fn save_model_state(&mut self) {
        self.saved_state = Some(self.model.state());
    }

    /// Restore the snapshot taken by
    /// [`save_model_state`](Self::save_model_state). The snapshot is kept,
    /// so a batch of solves can restore repeatedly.
    ///
    /// # Errors
    ///
    /// Fails if no snapshot has been taken.
    pub fn restore_model_state(&mut self) -> Result<()> {
        match &self.saved_state {
            Some(state) => self.model.set_state(state),
            None => Err(PosefitError::state_mismatch("no saved model state")),
        }
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    /// Total iterations across all solves since the last counter reset.
    #[must_use]
    pub fn num_iterations(&self) -> u64 {
        self.num_iterations
    }

    /// Number of solve calls since the last counter reset.
    #[must_use]
    pub fn num_solves(&self) -> u64 {
        self.num_solves
    }

    /// Mean iterations per solve, or zero before the first solve.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_num_iterations(&self) -> f64 {
        if self.num_solves == 0 {
            0.0
        } else {
            self.num_iterations as f64 / self.num_solves as f64
        }
    }

    /// Reset the iteration and solve counters.
    pub fn clear_solve_counts(&mut self) {
        self.num_iterations = 0;
        self.num_solves = 0;
    }

    // ------------------------------------------------------------------
    // network queries
    // ------------------------------------------------------------------

    /// Number of tracked markers.
    #[must_use]
    pub fn num_markers(&self) -> usize {
        self.marker_ids.len()
    }

    /// The tracked markers, in tracking order.
    #[must_use]
    pub fn markers(&self) -> &[MarkerId] {
        &self.marker_ids
    }

    /// Number of bodies the solve moves.
    pub fn num_bodies(&mut self) -> Result<usize> {
        self.ensure_network()?;
        Ok(self.network_ref()?.num_bodies())
    }

    /// The bodies the solve moves, in discovery order (marker bodies first).
    pub fn bodies(&mut self) -> Result<Vec<BodyId>> {
        self.ensure_network()?;
        Ok(self.network_ref()?.body_ids().collect())
    }

    /// The connectors constraining the solve, in discovery order.
    pub fn connectors(&mut self) -> Result<Vec<ConnectorId>> {
        self.ensure_network()?;
        Ok(self.network_ref()?.con_set.clone())
    }

    /// Whether any network connector attaches directly to ground.
    pub fn is_connected_to_ground(&mut self) -> Result<bool> {
        self.ensure_network()?;
        Ok(self.network_ref()?.grounded)
    }

    /// A body suitable as a fixed anchor: the first grounded network body,
    /// else the first that was non-dynamic at discovery, else `None`.
    pub fn find_fixed_body(&mut self) -> Result<Option<BodyId>> {
        self.ensure_network()?;
        let net = self.network_ref()?;
        for info in &net.infos {
            if self.model.bodies()[info.body.index()].is_grounded() {
                return Ok(Some(info.body));
            }
        }
        Ok(net
            .infos
            .iter()
            .find(|info| !info.dynamic_at_init)
            .map(|info| info.body))
    }

    // ------------------------------------------------------------------
    // pose utilities
    // ------------------------------------------------------------------

    /// The poses of the network bodies, in discovery order.
    pub fn body_poses(&mut self) -> Result<Vec<Pose>> {
        self.ensure_network()?;
        let net = self.network_ref()?;
        Ok(net
            .body_ids()
            .map(|id| self.model.bodies()[id.index()].pose)
            .collect())
    }

    /// Set the poses of the network bodies from a list in discovery order,
    /// then refresh marker positions.
    ///
    /// # Errors
    ///
    /// Fails if the list length differs from the network body count.
    pub fn set_body_poses(&mut self, poses: &[Pose]) -> Result<()> {
        self.ensure_network()?;
        let ids: Vec<BodyId> = self.network_ref()?.body_ids().collect();
        if poses.len() != ids.len() {
            return Err(PosefitError::state_mismatch(format!(
                "pose list has {} entries, network has {} bodies",
                poses.len(),
                ids.len()
            )));
        }
        for (id, pose) in ids.iter().zip(poses) {
            self.model.bodies_mut()[id.index()].pose = *pose;
        }
        self.model.update_markers();
        Ok(())
    }

    /// Left-multiply every network body pose by `transform`, then refresh
    /// marker positions. Moves the whole fitted mechanism rigidly.
    pub fn transform_body_poses(&mut self, transform: &Pose) -> Result<()> {
        self.ensure_network()?;
        let ids: Vec<BodyId> = self.network_ref()?.body_ids().collect();
        for id in ids {
            let body = &mut self.model.bodies_mut()[id.index()];
            body.pose = transform.compose(&body.pose);
        }
        self.model.update_markers();
        Ok(())
    }

    /// Set the dynamic flag of every network body.
    pub fn set_bodies_dynamic(&mut self, dynamic: bool) -> Result<()> {
        self.ensure_network()?;
        let ids: Vec<BodyId> = self.network_ref()?.body_ids().collect();
        for id in ids {
            self.model.set_dynamic(id, dynamic)?;
        }
        Ok(())
    }

    /// Restore every network body's dynamic flag to its value at discovery.
    pub fn restore_bodies_dynamic(&mut self) -> Result<()> {
        self.ensure_network()?;
        let flags: Vec<(BodyId, bool)> = self
            .network_ref()?
            .infos
            .iter()
            .map(|info| (info.body, info.dynamic_at_init))
            .collect();
        for (id, dynamic) in flags {
            self.model.set_dynamic(id, dynamic)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // model access
    // ------------------------------------------------------------------

    /// The model being fitted.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access to the model, for driving joint coordinates or editing
    /// poses between solves. Structural changes (adding bodies, markers, or
    /// connectors) require [`invalidate_topology`](Self::invalidate_topology)
    /// before the next solve.
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// Consume the solver and return the model.
    #[must_use]
    pub fn into_model(self) -> Model {
        self.model
    }

    /// Drop the cached marker network so the next solve rediscovers it.
    pub fn invalidate_topology(&mut self) {
        self.network = None;
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IkConfig {
        &self.config
    }

    fn ensure_network(&mut self) -> Result<()> {
        if self.network.is_none() {
            let network = BodyNetwork::discover(
                &self.model,
                &self.marker_ids,
                &self.weights,
                &self.config,
            )?;
            self.network = Some(network);
        }
        Ok(())
    }

    fn network_ref(&self) -> Result<&BodyNetwork> {
        self.network
            .as_ref()
            .ok_or_else(|| PosefitError::numerical("marker network unavailable"))
    }
}

/// Fill `disps` with the target minus current world position of each tracked
/// marker.
fn marker_displacements(model: &Model, marker_ids: &[MarkerId], targets: &[f64], disps: &mut [f64]) {
    for (k, &mid) in marker_ids.iter().enumerate() {
        let world = model.markers()[mid.index()].world;
        disps[3 * k] = targets[3 * k] - world.x;
        disps[3 * k + 1] = targets[3 * k + 1] - world.y;
        disps[3 * k + 2] = targets[3 * k + 2] - world.z;
    }
}

/// Weighted half sum-of-squares of the marker residuals.
fn residual_energy(model: &Model, marker_ids: &[MarkerId], weights: &[f64], targets: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (k, &mid) in marker_ids.iter().enumerate() {
        let world = model.markers()[mid.index()].world;
        let dx = targets[3 * k] - world.x;
        let dy = targets[3 * k + 1] - world.y;
        let dz = targets[3 * k + 2] - world.z;
        sum += weights[k] * (dx * dx + dy * dy + dz * dz);
    }
    0.5 * sum
}

/// One constrained solve with zero marker forces: the step is driven purely
/// by the constraint distances, landing the bodies on the constraint surface.
fn constraint_projection(
    net: &mut BodyNetwork,
    model: &mut Model,
    config: &IkConfig,
    marker_count: usize,
) -> Result<()> {
    net.update_connector_states(model, true)?;
    let cons = net.assemble_constraints(model);
    let zeros = vec![0.0; 3 * marker_count];
    let (blocks, bm) = net.fit_system(model, &zeros, config);
    let kkt = KktSolver::new(&blocks, !config.second_order, &cons)?;
    let step = kkt.solve_with_limits(&bm)?;
    let q_prev = net.pos_state(model);
    net.step_pos_state(model, &q_prev, &step.velocity, 1.0);
    Ok(())
}
