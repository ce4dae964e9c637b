//! Linear couplings between joint coordinates.

use posefit_types::ConnectorId;

use crate::connector::{BoxedConnector, ConstraintRow};

/// One term of a coordinate coupling.
#[derive(Debug, Clone, Copy)]
pub struct CouplingTerm {
    /// The connector whose coordinate participates.
    pub connector: ConnectorId,
    /// Coordinate index on that connector.
    pub coordinate: usize,
    /// Linear coefficient.
    pub coeff: f64,
}

impl CouplingTerm {
    /// Term `coeff * coordinate(connector, coordinate)`.
    #[must_use]
    pub fn new(connector: ConnectorId, coordinate: usize, coeff: f64) -> Self {
        Self {
            connector,
            coordinate,
            coeff,
        }
    }
}

/// A bilateral constraint tying joint coordinates together linearly:
///
/// ```text
/// sum_i coeff_i * coordinate_i = offset
/// ```
///
/// The constraint row concatenates the coordinate wrenches of every term,
/// so a coupling may span more than two bodies.
#[derive(Debug, Clone)]
pub struct CoordinateCoupling {
    terms: Vec<CouplingTerm>,
    offset: f64,
    enabled: bool,
}

impl CoordinateCoupling {
    /// Create a coupling over the given terms.
    #[must_use]
    pub fn new(terms: Vec<CouplingTerm>, offset: f64) -> Self {
        Self {
            terms,
            offset,
            enabled: true,
        }
    }

    /// The coupling terms.
    #[must_use]
    pub fn terms(&self) -> &[CouplingTerm] {
        &self.terms
    }

    /// Whether the coupling participates in solves.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the coupling.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether any term references `connector`.
    #[must_use]
    pub fn references(&self, connector: ConnectorId) -> bool {
        self.terms.iter().any(|t| t.connector == connector)
    }

    /// Residual of the coupling equation at the current coordinates. Valid
    /// after the referenced connectors have had their state updated.
    #[must_use]
    pub fn value(&self, connectors: &[BoxedConnector]) -> f64 {
        let sum: f64 = self
            .terms
            .iter()
            .map(|t| {
                t.coeff
                    * connectors[t.connector.index()]
                        .coordinate(t.coordinate)
                        .unwrap_or(0.0)
            })
            .sum();
        sum - self.offset
    }

    /// Append the coupling's single bilateral row.
    pub fn append_row(&self, connectors: &[BoxedConnector], rows: &mut Vec<ConstraintRow>) {
        let mut blocks = Vec::new();
        for t in &self.terms {
            connectors[t.connector.index()].append_coordinate_wrench(
                t.coordinate,
                t.coeff,
                &mut blocks,
            );
        }
        rows.push(ConstraintRow {
            blocks,
            distance: self.value(connectors),
            compliance: 0.0,
        });
    }
}
