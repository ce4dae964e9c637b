//! Saddle-point solver for one fit iteration.
//!
//! Each iteration of the pose fit minimizes a quadratic marker energy subject
//! to the mechanism constraints. The optimality conditions form a KKT system
//!
//! ```text
//! [ H  G ] [ dq ]   [ b  ]
//! [ Gᵀ -R ] [ -λ ] = [ bg ]
//! ```
//!
//! where `H` is block diagonal with one 6 x 6 fit-stiffness block per body,
//! `G` holds the bilateral constraint wrenches as columns, and `R` is the
//! diagonal compliance. The system is solved directly: factor each `H` block,
//! form the dense Schur complement `S = Gᵀ H⁻¹ G + R` on the constraint rows,
//! and back-substitute.
//!
//! Engaged unilateral limit rows `N` are layered on top through a small
//! principal-pivot complementarity solve: limit impulses must be nonnegative
//! and may only push away from the limit.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, Matrix6, Vector6};

use posefit_types::{PosefitError, Result};

/// Complementarity tolerance for limit rows. A limit row counts as violated
/// once its post-solve velocity drops below the negative of this value.
const LIMIT_TOLERANCE: f64 = 1e-12;

/// Constraint rows assembled for one fit iteration, in solve-index order.
///
/// Column vectors have one 6-value span per solved body. Right-hand sides
/// are already negated constraint distances.
#[derive(Debug, Default)]
pub(crate) struct ConstraintSet {
    /// Bilateral wrench columns (`G` as columns of `Gᵀ`).
    pub gt: Vec<DVector<f64>>,
    /// Bilateral right-hand side.
    pub bg: Vec<f64>,
    /// Bilateral compliance diagonal.
    pub rg: Vec<f64>,
    /// Engaged unilateral wrench columns.
    pub nt: Vec<DVector<f64>>,
    /// Unilateral right-hand side.
    pub bn: Vec<f64>,
    /// Unilateral compliance diagonal.
    pub rn: Vec<f64>,
}

impl ConstraintSet {
    /// Number of bilateral rows.
    pub fn num_bilateral(&self) -> usize {
        self.gt.len()
    }

    /// Number of engaged unilateral rows.
    pub fn num_unilateral(&self) -> usize {
        self.nt.len()
    }
}

/// One step of the constrained fit: the body velocities together with the
/// constraint impulses that produced them.
#[derive(Debug)]
pub(crate) struct KktStep {
    /// Stacked 6-per-body velocity, solve-index order.
    pub velocity: DVector<f64>,
    /// Bilateral impulses, one per `G` row.
    pub lambda: DVector<f64>,
    /// Unilateral limit impulses, one per engaged `N` row. All nonnegative.
    pub theta: DVector<f64>,
}

/// Direct factorization of one iteration's KKT system.
///
/// Holds the per-body block inverses and the Cholesky factor of the Schur
/// complement, so repeated right-hand sides (the limit probe columns) reuse
/// the same factorization.
pub(crate) struct KktSolver<'a> {
    cons: &'a ConstraintSet,
    block_inv: Vec<Matrix6<f64>>,
    schur: Option<Cholesky<f64, Dyn>>,
}

impl<'a> KktSolver<'a> {
    /// Factor the system for the given body blocks and constraint rows.
    ///
    /// `symmetric` selects Cholesky for the body blocks; pass `false` when
    /// the blocks carry the displacement-derivative term, which is not
    /// symmetric, to use an LU factorization instead.
    pub fn new(
        h_blocks: &[Matrix6<f64>],
        symmetric: bool,
        cons: &'a ConstraintSet,
    ) -> Result<Self> {
        let mut block_inv = Vec::with_capacity(h_blocks.len());
        for (i, h) in h_blocks.iter().enumerate() {
            let inv = if symmetric {
                Cholesky::new(*h).map(|chol| chol.inverse())
            } else {
                h.lu().try_inverse()
            };
            let inv = inv.ok_or_else(|| {
                PosefitError::numerical(format!(
                    "fit stiffness block {i} is singular; check marker weights and body inertia"
                ))
            })?;
            block_inv.push(inv);
        }

        let ng = cons.num_bilateral();
        let mut schur = None;
        if ng > 0 {
            let hig: Vec<DVector<f64>> = cons
                .gt
                .iter()
                .map(|col| apply_block_inverse(&block_inv, col))
                .collect();
            // S = Gᵀ H⁻¹ G + R
            let mut s = DMatrix::zeros(ng, ng);
            for i in 0..ng {
                for j in 0..ng {
                    s[(i, j)] = cons.gt[i].dot(&hig[j]);
                }
                s[(i, i)] += cons.rg[i];
            }
            schur = Some(s.cholesky().ok_or_else(|| {
                PosefitError::numerical(
                    "constraint system is singular; redundant constraints need compliance",
                )
            })?);
        }

        Ok(Self {
            cons,
            block_inv,
            schur,
        })
    }

    /// Solve the bilateral KKT system for one right-hand side.
    ///
    /// Returns the body velocities and the bilateral impulses.
    pub fn solve(&self, bm: &DVector<f64>, bg: &[f64]) -> (DVector<f64>, DVector<f64>) {
        let v0 = apply_block_inverse(&self.block_inv, bm);
        let Some(schur) = &self.schur else {
            return (v0, DVector::zeros(0));
        };
        let ng = self.cons.num_bilateral();
        let rhs = DVector::from_fn(ng, |i, _| self.cons.gt[i].dot(&v0) - bg[i]);
        let x = schur.solve(&rhs);
        let mut corrected = bm.clone();
        for i in 0..ng {
            corrected.axpy(-x[i], &self.cons.gt[i], 1.0);
        }
        let vel = apply_block_inverse(&self.block_inv, &corrected);
        (vel, -x)
    }

    /// Solve the full system including engaged unilateral limit rows.
    pub fn solve_with_limits(&self, bm: &DVector<f64>) -> Result<KktStep> {
        let nu = self.cons.num_unilateral();
        if nu == 0 {
            let (velocity, lambda) = self.solve(bm, &self.cons.bg);
            return Ok(KktStep {
                velocity,
                lambda,
                theta: DVector::zeros(0),
            });
        }

        let (vel0, _) = self.solve(bm, &self.cons.bg);
        let zero_bg = vec![0.0; self.cons.num_bilateral()];
        let probes: Vec<DVector<f64>> = self
            .cons
            .nt
            .iter()
            .map(|col| self.solve(col, &zero_bg).0)
            .collect();

        // Limit-space Delassus operator A = Nᵀ (KKT⁻¹) N + Rn and the
        // velocities q the limits would see with zero limit impulse.
        let mut a = DMatrix::zeros(nu, nu);
        for i in 0..nu {
            for j in 0..nu {
                a[(i, j)] = self.cons.nt[i].dot(&probes[j]);
            }
            a[(i, i)] += self.cons.rn[i];
        }
        let q = DVector::from_fn(nu, |i, _| self.cons.nt[i].dot(&vel0) - self.cons.bn[i]);

        let theta = solve_lcp(&a, &q)?;

        let mut loaded = bm.clone();
        for j in 0..nu {
            if theta[j] != 0.0 {
                loaded.axpy(theta[j], &self.cons.nt[j], 1.0);
            }
        }
        let (velocity, lambda) = self.solve(&loaded, &self.cons.bg);
        Ok(KktStep {
            velocity,
            lambda,
            theta,
        })
    }
}

/// Apply the block-diagonal inverse to a stacked 6-per-body vector.
fn apply_block_inverse(block_inv: &[Matrix6<f64>], x: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(x.len());
    for (i, inv) in block_inv.iter().enumerate() {
        let seg: Vector6<f64> = inv * x.fixed_rows::<6>(6 * i);
        out.fixed_rows_mut::<6>(6 * i).copy_from(&seg);
    }
    out
}

/// Solve the symmetric LCP `w = A θ + q, w ≥ 0, θ ≥ 0, θᵀw = 0` by
/// principal pivoting on the active set.
///
/// `A` is positive semidefinite by construction, so each active subsystem
/// is solved with a Cholesky factorization; a tiny diagonal jitter retries
/// a factorization that fails on a degenerate subsystem.
pub(crate) fn solve_lcp(a: &DMatrix<f64>, q: &DVector<f64>) -> Result<DVector<f64>> {
    let n = q.len();
    let mut theta = DVector::zeros(n);
    let mut active: Vec<usize> = Vec::new();

    for _ in 0..(20 * n + 20) {
        let x = if active.is_empty() {
            DVector::zeros(0)
        } else {
            let sub = DMatrix::from_fn(active.len(), active.len(), |i, j| {
                a[(active[i], active[j])]
            });
            let rhs = DVector::from_fn(active.len(), |i, _| -q[active[i]]);
            solve_active_subsystem(sub, &rhs)?
        };

        // An active impulse gone negative leaves the set; drop the worst one.
        let mut most_negative: Option<(usize, f64)> = None;
        for (k, &xv) in x.iter().enumerate() {
            if xv < 0.0 && most_negative.map_or(true, |(_, worst)| xv < worst) {
                most_negative = Some((k, xv));
            }
        }
        if let Some((k, _)) = most_negative {
            active.remove(k);
            continue;
        }

        theta.fill(0.0);
        for (k, &i) in active.iter().enumerate() {
            theta[i] = x[k];
        }
        let w = a * &theta + q;
        let mut worst: Option<usize> = None;
        for i in 0..n {
            if !active.contains(&i)
                && w[i] < -LIMIT_TOLERANCE
                && worst.map_or(true, |wi| w[i] < w[wi])
            {
                worst = Some(i);
            }
        }
        match worst {
            None => return Ok(theta),
            Some(i) => active.push(i),
        }
    }
    Ok(theta)
}

/// Solve one active-set subsystem, retrying with a diagonal jitter when the
/// factorization fails.
fn solve_active_subsystem(mut sub: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    if let Some(chol) = sub.clone().cholesky() {
        return Ok(chol.solve(rhs));
    }
    for i in 0..sub.nrows() {
        sub[(i, i)] += 1e-12;
    }
    sub.cholesky().map(|chol| chol.solve(rhs)).ok_or_else(|| {
        PosefitError::numerical("limit complementarity subsystem is not positive definite")
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_blocks(n: usize) -> Vec<Matrix6<f64>> {
        vec![Matrix6::identity(); n]
    }

    fn unit_column(n6: usize, index: usize) -> DVector<f64> {
        let mut col = DVector::zeros(n6);
        col[index] = 1.0;
        col
    }

    #[test]
    fn test_lcp_inactive_when_feasible() {
        let a = DMatrix::from_row_slice(1, 1, &[2.0]);
        let q = DVector::from_vec(vec![3.0]);
        let theta = solve_lcp(&a, &q).unwrap();
        assert_relative_eq!(theta[0], 0.0);
    }

    #[test]
    fn test_lcp_single_active() {
        let a = DMatrix::from_row_slice(1, 1, &[2.0]);
        let q = DVector::from_vec(vec![-4.0]);
        let theta = solve_lcp(&a, &q).unwrap();
        assert_relative_eq!(theta[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lcp_pivot_drops_negative_impulse() {
        // Coupled system where the naive active set picks up both rows and
        // then has to drop one again.
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 3.0, 3.0, 8.0]);
        let q = DVector::from_vec(vec![-5.0, -6.0]);
        let theta = solve_lcp(&a, &q).unwrap();
        assert_relative_eq!(theta[0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(theta[1], 0.0);
        // Complementarity: w_0 = 0, w_1 > 0.
        let w = &a * &theta + &q;
        assert_relative_eq!(w[0], 0.0, epsilon = 1e-12);
        assert!(w[1] > 0.0);
    }

    #[test]
    fn test_bilateral_row_drives_distance() {
        let blocks = identity_blocks(1);
        let cons = ConstraintSet {
            gt: vec![unit_column(6, 2)],
            bg: vec![0.5],
            rg: vec![0.0],
            ..Default::default()
        };
        let kkt = KktSolver::new(&blocks, true, &cons).unwrap();
        let (vel, lam) = kkt.solve(&DVector::zeros(6), &cons.bg);
        // Velocity satisfies Gᵀ v = bg and the impulse carries the load.
        assert_relative_eq!(vel[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(lam[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_compliance_softens_row() {
        let blocks = identity_blocks(1);
        let cons = ConstraintSet {
            gt: vec![unit_column(6, 2)],
            bg: vec![1.0],
            rg: vec![1.0],
            ..Default::default()
        };
        let kkt = KktSolver::new(&blocks, true, &cons).unwrap();
        let (vel, lam) = kkt.solve(&DVector::zeros(6), &cons.bg);
        // Unit compliance splits the correction with the impulse:
        // Gᵀ v = bg - rg λ.
        assert_relative_eq!(vel[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(lam[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_limit_row_only_pushes() {
        let blocks = identity_blocks(1);
        let mut cons = ConstraintSet {
            nt: vec![unit_column(6, 2)],
            bn: vec![0.3],
            rn: vec![0.0],
            ..Default::default()
        };
        let kkt = KktSolver::new(&blocks, true, &cons).unwrap();
        let step = kkt.solve_with_limits(&DVector::zeros(6)).unwrap();
        assert_relative_eq!(step.velocity[2], 0.3, epsilon = 1e-12);
        assert_relative_eq!(step.theta[0], 0.3, epsilon = 1e-12);

        // A limit that is already satisfied applies no impulse.
        cons.bn[0] = -0.3;
        let kkt = KktSolver::new(&blocks, true, &cons).unwrap();
        let step = kkt.solve_with_limits(&DVector::zeros(6)).unwrap();
        assert_relative_eq!(step.velocity.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(step.theta[0], 0.0);
    }

    #[test]
    fn test_unsymmetric_block_uses_lu() {
        let mut h = Matrix6::identity();
        h[(3, 4)] = 0.1;
        let blocks = vec![h];
        let cons = ConstraintSet::default();
        let kkt = KktSolver::new(&blocks, false, &cons).unwrap();
        let mut bm = DVector::zeros(6);
        bm[4] = 1.0;
        let (vel, _) = kkt.solve(&bm, &[]);
        // H vel = bm for the unsymmetric block.
        let back = h * Vector6::from_iterator(vel.iter().copied());
        assert_relative_eq!(back[4], 1.0, epsilon = 1e-12);
        assert_relative_eq!(back[3], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_block_rejected() {
        let blocks = vec![Matrix6::zeros()];
        let cons = ConstraintSet::default();
        assert!(KktSolver::new(&blocks, true, &cons).is_err());
        assert!(KktSolver::new(&blocks, false, &cons).is_err());
    }
}
