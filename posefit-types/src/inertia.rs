//! Spatial inertia of a rigid body.
//!
//! [`SpatialInertia`] represents the 6x6 mass matrix of a rigid body with
//! respect to its coordinate frame:
//!
//! ```text
//! [ m I      -m [c] ]
//! [ m [c]     J     ]
//! ```
//!
//! where `m` is the mass, `c` the center of mass in body coordinates, `[c]`
//! its cross-product matrix, and `J` the rotational inertia about the frame
//! origin. The rotational inertia is stored origin-referenced; accessors
//! convert to and from the com-centered form via the parallel axis theorem.

use nalgebra::{Matrix3, Matrix6, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mass, center of mass, and rotational inertia of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialInertia {
    mass: f64,
    com: Vector3<f64>,
    /// Rotational inertia about the body frame origin.
    rot_inertia: Matrix3<f64>,
}

impl SpatialInertia {
    /// Zero inertia: no mass, com at the origin.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            mass: 0.0,
            com: Vector3::zeros(),
            rot_inertia: Matrix3::zeros(),
        }
    }

    /// Uniform inertia: mass `s`, com at the origin, rotational inertia
    /// `s I`. Used as a regularization placeholder for massless bodies.
    #[must_use]
    pub fn uniform(s: f64) -> Self {
        Self {
            mass: s,
            com: Vector3::zeros(),
            rot_inertia: Matrix3::identity() * s,
        }
    }

    /// Create from mass, center of mass, and rotational inertia about the
    /// center of mass.
    #[must_use]
    pub fn new(mass: f64, com: Vector3<f64>, rot_inertia_com: Matrix3<f64>) -> Self {
        let mut out = Self {
            mass,
            com,
            rot_inertia: Matrix3::zeros(),
        };
        out.set_rotational_inertia(rot_inertia_com);
        out
    }

    /// Inertia of a solid axis-aligned box centered on the body frame.
    ///
    /// `widths` are the full extents along x, y, z.
    #[must_use]
    pub fn box_from_density(density: f64, widths: Vector3<f64>) -> Self {
        let mass = density * widths.x * widths.y * widths.z;
        let (wx2, wy2, wz2) = (
            widths.x * widths.x,
            widths.y * widths.y,
            widths.z * widths.z,
        );
        let j = Matrix3::from_diagonal(&Vector3::new(
            mass / 12.0 * (wy2 + wz2),
            mass / 12.0 * (wx2 + wz2),
            mass / 12.0 * (wx2 + wy2),
        ));
        Self {
            mass,
            com: Vector3::zeros(),
            rot_inertia: j,
        }
    }

    /// Total mass.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Center of mass in body coordinates.
    #[must_use]
    pub fn center_of_mass(&self) -> Vector3<f64> {
        self.com
    }

    /// Accumulate a point mass of weight `w` at body-frame position `p`.
    pub fn add_point_mass(&mut self, w: f64, p: &Vector3<f64>) {
        let new_mass = self.mass + w;
        if new_mass > 0.0 {
            self.com = (self.com * self.mass + p * w) / new_mass;
        }
        self.mass = new_mass;
        let pp = p.dot(p);
        self.rot_inertia += w * (Matrix3::identity() * pp - p * p.transpose());
    }

    /// Rotational inertia about the center of mass.
    #[must_use]
    pub fn rotational_inertia(&self) -> Matrix3<f64> {
        let cc = self.com.dot(&self.com);
        self.rot_inertia
            - self.mass * (Matrix3::identity() * cc - self.com * self.com.transpose())
    }

    /// Set the rotational inertia about the center of mass, keeping mass and
    /// com unchanged.
    pub fn set_rotational_inertia(&mut self, rot_inertia_com: Matrix3<f64>) {
        let cc = self.com.dot(&self.com);
        self.rot_inertia = rot_inertia_com
            + self.mass * (Matrix3::identity() * cc - self.com * self.com.transpose());
    }

    /// Move the center of mass by `offset` in body coordinates. The
    /// com-centered rotational inertia is preserved.
    pub fn translate_com(&mut self, offset: Vector3<f64>) {
        let centered = self.rotational_inertia();
        self.com += offset;
        self.set_rotational_inertia(centered);
    }

    /// Dense 6x6 matrix form.
    #[must_use]
    pub fn to_matrix6(&self) -> Matrix6<f64> {
        let mut out = Matrix6::zeros();
        let mc = self.com.cross_matrix() * self.mass;
        out.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * self.mass));
        out.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-mc));
        out.fixed_view_mut::<3, 3>(3, 0).copy_from(&mc);
        out.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.rot_inertia);
        out
    }

    /// This inertia expressed in a frame rotated by `r`: the com and the
    /// rotational inertia rotate, the mass is unchanged.
    #[must_use]
    pub fn rotated(&self, r: &Matrix3<f64>) -> Self {
        Self {
            mass: self.mass,
            com: r * self.com,
            rot_inertia: r * self.rot_inertia * r.transpose(),
        }
    }

    /// Uniformly scale mass and rotational inertia by `k`, keeping the com.
    #[must_use]
    pub fn scaled(&self, k: f64) -> Self {
        Self {
            mass: self.mass * k,
            com: self.com,
            rot_inertia: self.rot_inertia * k,
        }
    }

    /// Check that all values are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.mass.is_finite()
            && self.com.iter().all(|v| v.is_finite())
            && self.rot_inertia.iter().all(|v| v.is_finite())
    }
}

impl Default for SpatialInertia {
    fn default() -> Self {
        Self::zero()
    }
}
