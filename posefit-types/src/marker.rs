//! Markers: tracked points attached to rigid bodies.

use nalgebra::Point3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::body::{BodyId, Pose};

/// Unique identifier for a marker within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MarkerId(pub u64);

impl MarkerId {
    /// Create a new marker ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Get the ID as a list index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for MarkerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "marker{}", self.0)
    }
}

/// A point rigidly attached to a body, tracked against measured target
/// positions during a solve.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Marker {
    /// The body this marker is attached to.
    pub body: BodyId,
    /// Attachment point in body coordinates.
    pub location: Point3<f64>,
    /// Cached world position, refreshed from the body pose.
    pub world: Point3<f64>,
}

impl Marker {
    /// Create a marker attached to `body` at body-frame `location`. The
    /// cached world position starts at the local location until the first
    /// pose update.
    #[must_use]
    pub fn new(body: BodyId, location: Point3<f64>) -> Self {
        Self {
            body,
            location,
            world: location,
        }
    }

    /// Refresh the cached world position from the owning body's pose.
    pub fn update_world(&mut self, pose: &Pose) {
        self.world = pose.transform_point(&self.location);
    }
}
