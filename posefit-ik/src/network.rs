//! Body network discovery and per-iteration system assembly.
//!
//! The solver operates on the subset of a model that the tracked markers can
//! actually influence: the bodies carrying markers, plus everything reachable
//! from them through enabled connectors. This module discovers that network,
//! builds the per-body fit-stiffness blocks from the marker layouts, and
//! assembles the stacked vectors and constraint columns the KKT solver
//! consumes each iteration.
//!
//! Bodies are processed in model solve-index order. Because the model may
//! reassign solve indices between solves (for example when a body's dynamic
//! flag changes), the network keeps a cached index map and rebuilds it
//! whenever a cached index disagrees with the model.

use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::{DVector, Matrix3, Matrix6, Point3, SymmetricEigen, Vector3};
use tracing::debug;

use posefit_mech::{ConstraintBlock, ConstraintRow, Model};
use posefit_types::{
    BodyId, ConnectorId, MarkerId, Pose, Result, SpatialInertia, Twist, POS_STATE_SIZE,
    VEL_STATE_SIZE,
};

use crate::kkt::ConstraintSet;
use crate::solver::IkConfig;

/// Rank tolerance for the marker point cloud, relative to total weight.
const RANK_TOLERANCE: f64 = 1e-8;

/// One tracked marker attached to a network body.
#[derive(Debug, Clone)]
pub(crate) struct MarkerSlot {
    /// Index into the solver's marker list (and target triples).
    pub slot: usize,
    /// The marker itself.
    pub marker: MarkerId,
    /// Fit weight.
    pub weight: f64,
}

/// Per-body bookkeeping for the solve.
#[derive(Debug)]
pub(crate) struct BodyInfo {
    /// The model body.
    pub body: BodyId,
    /// Markers attached to this body, in tracking order.
    pub markers: Vec<MarkerSlot>,
    /// Fit stiffness of the marker layout, in body coordinates.
    pub inertia: SpatialInertia,
    /// Model solve index this body had when the index map was last built.
    pub solve_index: usize,
    /// Dynamic flag captured at discovery, for later restoration.
    pub dynamic_at_init: bool,
}

/// The marker-reachable part of a model, with cached solve-order bookkeeping.
#[derive(Debug)]
pub(crate) struct BodyNetwork {
    /// Bodies in discovery order: marker bodies first, then BFS over
    /// connectors.
    pub infos: Vec<BodyInfo>,
    /// Connectors discovered between network bodies, in discovery order.
    pub con_set: Vec<ConnectorId>,
    /// Model coupling indices touching a discovered connector.
    pub coupling_set: Vec<usize>,
    /// Whether any discovered connector attaches directly to ground.
    pub grounded: bool,
    /// Mean marker weight, used to scale the regularization mass.
    pub avg_weight: f64,
    /// Half the bounding-box diagonal of the network, used to balance
    /// translational against rotational convergence.
    pub model_size: f64,
    /// Positions into `infos`, sorted by model solve index.
    sorted: Vec<usize>,
    /// Model solve index to sorted position.
    solve_index_map: Vec<Option<usize>>,
    map_valid: bool,
}

impl BodyNetwork {
    /// Discover the network for the given tracked markers.
    ///
    /// Marker IDs must be valid; `weights` runs parallel to `marker_ids`.
    pub fn discover(
        model: &Model,
        marker_ids: &[MarkerId],
        weights: &[f64],
        config: &IkConfig,
    ) -> Result<Self> {
        // Group markers by body, keeping first-seen body order.
        let mut seed_order: Vec<BodyId> = Vec::new();
        let mut markers_by_body: HashMap<BodyId, Vec<MarkerSlot>> = HashMap::new();
        for (k, &mid) in marker_ids.iter().enumerate() {
            let marker = model
                .marker(mid)
                .ok_or(posefit_types::PosefitError::InvalidMarkerId(mid.raw()))?;
            let slots = markers_by_body.entry(marker.body).or_insert_with(|| {
                seed_order.push(marker.body);
                Vec::new()
            });
            slots.push(MarkerSlot {
                slot: k,
                marker: mid,
                weight: weights[k],
            });
        }
        let avg_weight = weights.iter().sum::<f64>() / weights.len() as f64;

        // Breadth-first expansion across enabled connectors. Grounded bodies
        // anchor the network: they are never pulled in as neighbors.
        let mut body_set: Vec<BodyId> = seed_order;
        let mut in_set: HashSet<BodyId> = body_set.iter().copied().collect();
        let mut queue: VecDeque<BodyId> = body_set.iter().copied().collect();
        let mut con_set: Vec<ConnectorId> = Vec::new();
        let mut in_cons: HashSet<ConnectorId> = HashSet::new();
        let mut grounded = false;
        while let Some(b) = queue.pop_front() {
            for (ci, con) in model.connectors().iter().enumerate() {
                let cid = ConnectorId::new(ci as u64);
                if in_cons.contains(&cid) || !con.is_enabled() {
                    continue;
                }
                if con.body_a() != b && con.body_b() != Some(b) {
                    continue;
                }
                in_cons.insert(cid);
                con_set.push(cid);
                for neighbor in [Some(con.body_a()), con.body_b()] {
                    match neighbor {
                        None => grounded = true,
                        Some(n) => {
                            if !in_set.contains(&n) && !model.bodies()[n.index()].is_grounded() {
                                in_set.insert(n);
                                body_set.push(n);
                                queue.push_back(n);
                            }
                        }
                    }
                }
            }
        }

        let coupling_set = model
            .couplings()
            .iter()
            .enumerate()
            .filter(|(_, cp)| {
                cp.is_enabled() && cp.terms().iter().any(|t| in_cons.contains(&t.connector))
            })
            .map(|(qi, _)| qi)
            .collect();

        let infos = body_set
            .into_iter()
            .map(|body| BodyInfo {
                body,
                markers: markers_by_body.remove(&body).unwrap_or_default(),
                inertia: SpatialInertia::zero(),
                solve_index: usize::MAX,
                dynamic_at_init: model.bodies()[body.index()].is_dynamic(),
            })
            .collect();

        let mut network = Self {
            infos,
            con_set,
            coupling_set,
            grounded,
            avg_weight,
            model_size: 1.0,
            sorted: Vec::new(),
            solve_index_map: Vec::new(),
            map_valid: false,
        };
        network.rebuild_inertia(model, weights, config);
        network.compute_model_size(model);
        debug!(
            bodies = network.infos.len(),
            connectors = network.con_set.len(),
            couplings = network.coupling_set.len(),
            grounded = network.grounded,
            model_size = network.model_size,
            "discovered marker network"
        );
        Ok(network)
    }

    /// Number of bodies in the network.
    pub fn num_bodies(&self) -> usize {
        self.infos.len()
    }

    /// Body IDs in discovery order.
    pub fn body_ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.infos.iter().map(|info| info.body)
    }

    /// Rebuild every body's fit-stiffness from the current marker layouts
    /// and weights. `weights` runs parallel to the tracked marker list.
    pub fn rebuild_inertia(&mut self, model: &Model, weights: &[f64], config: &IkConfig) {
        self.avg_weight = weights.iter().sum::<f64>() / weights.len() as f64;
        let scale = self.avg_weight * config.mass_regularization;
        for info in &mut self.infos {
            for slot in &mut info.markers {
                slot.weight = weights[slot.slot];
            }
            if info.markers.is_empty() {
                // Marker-free bodies are held by constraints alone; give them
                // a small stiffness from their own inertia so the fit matrix
                // stays invertible.
                let body_inertia = &model.bodies()[info.body.index()].inertia;
                info.inertia = if body_inertia.mass() == 0.0 {
                    SpatialInertia::uniform(scale)
                } else {
                    body_inertia.scaled(scale / body_inertia.mass())
                };
            } else {
                let points: Vec<Point3<f64>> = info
                    .markers
                    .iter()
                    .map(|slot| model.markers()[slot.marker.index()].location)
                    .collect();
                let wgts: Vec<f64> = info.markers.iter().map(|slot| slot.weight).collect();
                info.inertia = weighted_marker_inertia(&points, &wgts, scale).0;
            }
        }
    }

    /// Recompute the characteristic size: half the bounding-box diagonal of
    /// the body origins and marker positions.
    pub fn compute_model_size(&mut self, model: &Model) {
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for info in &self.infos {
            let p = model.bodies()[info.body.index()].pose.position.coords;
            lo = lo.inf(&p);
            hi = hi.sup(&p);
            for slot in &info.markers {
                let w = model.markers()[slot.marker.index()].world.coords;
                lo = lo.inf(&w);
                hi = hi.sup(&w);
            }
        }
        let diagonal = (hi - lo).norm();
        self.model_size = if diagonal.is_finite() && diagonal > 0.0 {
            diagonal / 2.0
        } else {
            1.0
        };
    }

    /// Refresh the solve-index ordering, rebuilding it if the model has
    /// reassigned any body's index since the last solve.
    pub fn refresh_index_map(&mut self, model: &mut Model) {
        model.update_solve_indices();
        let stale = !self.map_valid
            || self
                .infos
                .iter()
                .any(|info| info.solve_index != model.bodies()[info.body.index()].solve_index());
        if !stale {
            return;
        }
        let mut order: Vec<usize> = (0..self.infos.len()).collect();
        order.sort_by_key(|&i| model.bodies()[self.infos[i].body.index()].solve_index());
        self.sorted = order;
        self.solve_index_map = vec![None; model.num_bodies()];
        for (pos, &i) in self.sorted.iter().enumerate() {
            let si = model.bodies()[self.infos[i].body.index()].solve_index();
            self.solve_index_map[si] = Some(pos);
            self.infos[i].solve_index = si;
        }
        self.map_valid = true;
    }

    /// Network body infos in solve-index order.
    pub(crate) fn sorted_infos(&self) -> impl Iterator<Item = &BodyInfo> {
        self.sorted.iter().map(|&i| &self.infos[i])
    }

    /// Pack the network bodies' poses into a position-state vector,
    /// 7 values per body in solve-index order.
    pub fn pos_state(&self, model: &Model) -> DVector<f64> {
        let mut q = DVector::zeros(POS_STATE_SIZE * self.sorted.len());
        for (i, info) in self.sorted_infos().enumerate() {
            let state = model.bodies()[info.body.index()].pose.to_state();
            q.as_mut_slice()[POS_STATE_SIZE * i..POS_STATE_SIZE * (i + 1)].copy_from_slice(&state);
        }
        q
    }

    /// Write a position-state vector back to the model, normalizing each
    /// quaternion, and refresh marker positions.
    pub fn apply_pos_state(&self, model: &mut Model, q: &DVector<f64>) {
        for (pos, &i) in self.sorted.iter().enumerate() {
            let mut chunk = [0.0; POS_STATE_SIZE];
            chunk.copy_from_slice(
                &q.as_slice()[POS_STATE_SIZE * pos..POS_STATE_SIZE * (pos + 1)],
            );
            let body = self.infos[i].body.index();
            model.bodies_mut()[body].pose = Pose::from_state(&chunk);
        }
        model.update_markers();
    }

    /// Advance `q_prev` by the velocity `dq` over step `h` and apply the
    /// result to the model. Rotations update on the world side through the
    /// exponential map.
    pub fn step_pos_state(
        &self,
        model: &mut Model,
        q_prev: &DVector<f64>,
        dq: &DVector<f64>,
        h: f64,
    ) {
        let mut q_next = DVector::zeros(q_prev.len());
        for i in 0..self.sorted.len() {
            let mut chunk = [0.0; POS_STATE_SIZE];
            chunk.copy_from_slice(
                &q_prev.as_slice()[POS_STATE_SIZE * i..POS_STATE_SIZE * (i + 1)],
            );
            let pose = Pose::from_state(&chunk);
            let twist =
                Twist::from_slice(&dq.as_slice()[VEL_STATE_SIZE * i..VEL_STATE_SIZE * (i + 1)]);
            let stepped = pose.integrate(&twist, h);
            q_next.as_mut_slice()[POS_STATE_SIZE * i..POS_STATE_SIZE * (i + 1)]
                .copy_from_slice(&stepped.to_state());
        }
        self.apply_pos_state(model, &q_next);
    }

    /// Dimensionless norm of a velocity vector: translational components are
    /// scaled by the model size so convergence is judged uniformly.
    pub fn dq_norm(&self, dq: &DVector<f64>) -> f64 {
        if dq.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..self.sorted.len() {
            for k in 0..3 {
                let v = dq[VEL_STATE_SIZE * i + k] / self.model_size;
                sum += v * v;
            }
            for k in 3..VEL_STATE_SIZE {
                let w = dq[VEL_STATE_SIZE * i + k];
                sum += w * w;
            }
        }
        (sum / dq.len() as f64).sqrt()
    }

    /// Build the per-body stiffness blocks and the generalized force vector
    /// for the current displacements, in solve-index order.
    pub fn fit_system(
        &self,
        model: &Model,
        disps: &[f64],
        config: &IkConfig,
    ) -> (Vec<Matrix6<f64>>, DVector<f64>) {
        let n = self.sorted.len();
        let mut blocks = Vec::with_capacity(n);
        let mut b = DVector::zeros(VEL_STATE_SIZE * n);
        for (i, info) in self.sorted_infos().enumerate() {
            let body = &model.bodies()[info.body.index()];
            let r = body.pose.rotation_matrix();
            let mut h = info.inertia.rotated(&r).to_matrix6();
            if config.damping != 0.0 {
                h *= 1.0 + config.damping;
            }
            let mut force = Vector3::zeros();
            let mut moment = Vector3::zeros();
            for slot in &info.markers {
                let arm = r * model.markers()[slot.marker.index()].location.coords;
                let d = slot.weight
                    * Vector3::new(
                        disps[3 * slot.slot],
                        disps[3 * slot.slot + 1],
                        disps[3 * slot.slot + 2],
                    );
                force += d;
                moment += arm.cross(&d);
                if config.second_order {
                    // Derivative of the rotating moment arm. Not symmetric,
                    // which is why the KKT factorization switches to LU.
                    let curvature = arm.dot(&d) * Matrix3::identity() - d * arm.transpose();
                    let mut rot = h.fixed_view_mut::<3, 3>(3, 3);
                    rot += curvature;
                }
            }
            b.fixed_rows_mut::<3>(VEL_STATE_SIZE * i).copy_from(&force);
            b.fixed_rows_mut::<3>(VEL_STATE_SIZE * i + 3)
                .copy_from(&moment);
            blocks.push(h);
        }
        (blocks, b)
    }

    /// Refresh the cached state of every network connector.
    pub fn update_connector_states(&self, model: &mut Model, update_engaged: bool) -> Result<()> {
        for &cid in &self.con_set {
            model.update_connector_state(cid, update_engaged)?;
        }
        Ok(())
    }

    /// Assemble the constraint rows of the network into stacked columns,
    /// scattering each wrench block through the solve-index map. Blocks on
    /// bodies outside the network (grounded anchors) are dropped.
    pub fn assemble_constraints(&self, model: &Model) -> ConstraintSet {
        let n6 = VEL_STATE_SIZE * self.sorted.len();
        let mut set = ConstraintSet::default();
        let mut rows: Vec<ConstraintRow> = Vec::new();
        for &cid in &self.con_set {
            let con = &model.connectors()[cid.index()];
            if !con.is_enabled() {
                continue;
            }
            rows.clear();
            con.append_bilateral_rows(model.bodies(), &mut rows);
            for row in &rows {
                set.gt.push(self.scatter_blocks(model, &row.blocks, n6));
                set.bg.push(-row.distance);
                set.rg.push(row.compliance);
            }
            rows.clear();
            con.append_unilateral_rows(model.bodies(), &mut rows);
            for row in &rows {
                set.nt.push(self.scatter_blocks(model, &row.blocks, n6));
                set.bn.push(-row.distance);
                set.rn.push(row.compliance);
            }
        }
        for &qi in &self.coupling_set {
            rows.clear();
            model.couplings()[qi].append_row(model.connectors(), &mut rows);
            for row in &rows {
                set.gt.push(self.scatter_blocks(model, &row.blocks, n6));
                set.bg.push(-row.distance);
                set.rg.push(row.compliance);
            }
        }
        set
    }

    fn scatter_blocks(
        &self,
        model: &Model,
        blocks: &[ConstraintBlock],
        n6: usize,
    ) -> DVector<f64> {
        let mut col = DVector::zeros(n6);
        for block in blocks {
            let si = model.bodies()[block.body.index()].solve_index();
            let Some(pos) = self.solve_index_map.get(si).copied().flatten() else {
                continue;
            };
            let mut wrench = [0.0; VEL_STATE_SIZE];
            block.wrench.write_to(&mut wrench);
            for (k, w) in wrench.iter().enumerate() {
                col[VEL_STATE_SIZE * pos + k] += w;
            }
        }
        col
    }
}

/// Build the 6 x 6 fit stiffness `Jᵀ W J` of a weighted marker cloud as a
/// spatial inertia, treating each marker as a point mass of its weight.
///
/// Marker layouts with fewer than three independent directions (a single
/// marker, or markers on a line) leave rotations about the deficient axes
/// unobservable. Those rotational eigenvalues are replaced with
/// `regularization * total_weight` so the block stays invertible, letting
/// the constraints pick the missing rotation. Returns the inertia and the
/// total rank of the marker Jacobian (3 translational plus the rotational
/// rank).
pub(crate) fn weighted_marker_inertia(
    points: &[Point3<f64>],
    weights: &[f64],
    regularization: f64,
) -> (SpatialInertia, usize) {
    let mut inertia = SpatialInertia::zero();
    for (p, &w) in points.iter().zip(weights) {
        inertia.add_point_mass(w, &p.coords);
    }
    let centered = inertia.rotational_inertia();
    let eig = SymmetricEigen::new(centered);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let tol = RANK_TOLERANCE * inertia.mass();
    let rank = order
        .iter()
        .filter(|&&k| eig.eigenvalues[k] > tol)
        .count();
    if rank < 3 {
        let fill = regularization * inertia.mass();
        let mut d = Vector3::zeros();
        for (i, &k) in order.iter().enumerate() {
            d[i] = if i < rank { eig.eigenvalues[k] } else { fill };
        }
        let u = Matrix3::from_columns(&[
            eig.eigenvectors.column(order[0]).into_owned(),
            eig.eigenvectors.column(order[1]).into_owned(),
            eig.eigenvectors.column(order[2]).into_owned(),
        ]);
        let rebuilt = u * Matrix3::from_diagonal(&d) * u.transpose();
        inertia.set_rotational_inertia(rebuilt);
    }
    (inertia, rank + 3)
}
