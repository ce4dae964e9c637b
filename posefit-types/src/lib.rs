//! Core types for marker-driven pose fitting.
//!
//! This crate provides the foundational types shared by the pose-fitting
//! stack:
//!
//! - [`RigidBody`] - A named body with a world [`Pose`] and [`SpatialInertia`]
//! - [`Marker`] - A tracked point rigidly attached to a body
//! - [`Twist`] / [`Wrench`] - Spatial velocities and forces
//! - [`PosefitError`] - Error type for model construction and solving
//!
//! # Design Philosophy
//!
//! These types are **pure data** plus the small amount of spatial algebra
//! they own (frame transforms, inertia composition, pose integration). They
//! carry no constraint or solver logic; that lives in the mechanism and
//! solver crates built on top of them.
//!
//! # Coordinate System
//!
//! Right-handed, Z-up. Body frames are arbitrary: the center of mass is
//! carried explicitly in [`SpatialInertia`], so a body frame does not need
//! to sit at the com.
//!
//! # Example
//!
//! ```
//! use posefit_types::{Pose, RigidBody, SpatialInertia};
//! use nalgebra::{Point3, Vector3};
//!
//! let link = RigidBody::new("link0")
//!     .with_pose(Pose::from_position(Point3::new(0.0, 0.0, 0.5)))
//!     .with_inertia(SpatialInertia::box_from_density(
//!         1000.0,
//!         Vector3::new(0.25, 0.25, 1.0),
//!     ));
//!
//! assert!(link.is_dynamic());
//! assert!((link.inertia.mass() - 62.5).abs() < 1e-12);
//! ```

#![doc(html_root_url = "https://docs.rs/posefit-types/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
// Allow certain clippy lints that are overly pedantic for type definitions
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::cast_precision_loss,       // usize to f64 is fine for counts
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod error;
mod inertia;
mod marker;

pub use body::{
    BodyId, ConnectorId, Pose, RigidBody, Twist, Wrench, POS_STATE_SIZE, VEL_STATE_SIZE,
};
pub use error::PosefitError;
pub use inertia::SpatialInertia;
pub use marker::{Marker, MarkerId};

// Re-export math types for convenience
pub use nalgebra::{Matrix3, Matrix6, Point3, UnitQuaternion, Vector3, Vector6};

/// Result type for pose-fitting operations.
pub type Result<T> = std::result::Result<T, PosefitError>;
