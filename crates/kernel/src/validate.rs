//! Whole-space consistency checks, used by tests and the `validate` command.

use std::fmt;

use chunkspace_common::GridCoord;

use crate::arena::ChunkId;
use crate::portal::{PORTAL_EPSILON, PortalTarget};
use crate::space::Space;

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// A bound portal whose target has no bound portal leading back.
    MissingReverse { chunk: String, portal: String, target: String },
    /// More than one bound portal of the target leads back through the same opening.
    DuplicateReverse { chunk: String, portal: String, target: String },
    /// The target leads back, but through an opening somewhere else.
    CentreMismatch { chunk: String, portal: String, target: String },
    /// A bound portal aims at a chunk that is gone or offline.
    StaleTarget { chunk: String, portal: String },
    /// One side of a loan is recorded without the other.
    LendingAsymmetry { lender: String, borrower: String },
    /// A column still indexes a chunk that is not focused.
    UnfocusedInColumn { chunk: String, coord: GridCoord },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingReverse { chunk, portal, target } => {
                write!(f, "{chunk}: portal '{portal}' to {target} has no reverse")
            }
            Violation::DuplicateReverse { chunk, portal, target } => {
                write!(f, "{chunk}: portal '{portal}' to {target} has several reverses")
            }
            Violation::CentreMismatch { chunk, portal, target } => {
                write!(f, "{chunk}: portal '{portal}' to {target} returns through a different opening")
            }
            Violation::StaleTarget { chunk, portal } => {
                write!(f, "{chunk}: bound portal '{portal}' targets a chunk that is not online")
            }
            Violation::LendingAsymmetry { lender, borrower } => {
                write!(f, "loan from {lender} to {borrower} is recorded on one side only")
            }
            Violation::UnfocusedInColumn { chunk, coord } => {
                write!(f, "column ({}, {}) holds unfocused chunk {chunk}", coord.x, coord.z)
            }
        }
    }
}

impl Space {
    /// Check the portal graph, lending records and column index. An empty
    /// result means the space is consistent.
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        let name = |id: ChunkId| {
            self.chunks
                .get(id)
                .map_or_else(|| format!("{id}"), |c| c.identifier().to_string())
        };

        for (id, chunk) in self.chunks.iter().filter(|(_, c)| c.online) {
            for portal in chunk.boundaries.iter().flat_map(|b| b.bound_portals.iter()) {
                let PortalTarget::Chunk(other) = portal.target else {
                    continue;
                };
                let Some(target) = self.chunks.get(other).filter(|c| c.online) else {
                    out.push(Violation::StaleTarget {
                        chunk: name(id),
                        portal: portal.label.clone(),
                    });
                    continue;
                };
                let reverses: Vec<_> = target
                    .boundaries
                    .iter()
                    .flat_map(|b| b.bound_portals.iter())
                    .filter(|p| p.target == PortalTarget::Chunk(id))
                    .collect();
                let matching = reverses
                    .iter()
                    .filter(|p| p.centre.distance(portal.centre) <= PORTAL_EPSILON)
                    .count();
                let (chunk, portal, target) = (name(id), portal.label.clone(), name(other));
                match (reverses.is_empty(), matching) {
                    (true, _) => out.push(Violation::MissingReverse { chunk, portal, target }),
                    (false, 0) => out.push(Violation::CentreMismatch { chunk, portal, target }),
                    (false, 1) => {}
                    (false, _) => out.push(Violation::DuplicateReverse { chunk, portal, target }),
                }
            }

            for lender in &chunk.lenders {
                let listed = self
                    .chunks
                    .get(lender.lender)
                    .is_some_and(|l| l.borrowers.contains(&id));
                if !listed {
                    out.push(Violation::LendingAsymmetry {
                        lender: name(lender.lender),
                        borrower: name(id),
                    });
                }
            }
            for &borrower in &chunk.borrowers {
                let listed = self
                    .chunks
                    .get(borrower)
                    .is_some_and(|b| b.lenders.iter().any(|l| l.lender == id));
                if !listed {
                    out.push(Violation::LendingAsymmetry {
                        lender: name(id),
                        borrower: name(borrower),
                    });
                }
            }
        }

        for column in self.focus.columns() {
            for holder in column.holders() {
                let focused = self
                    .chunks
                    .get(holder)
                    .is_some_and(|c| c.online && c.focus_count > 0);
                if !focused {
                    out.push(Violation::UnfocusedInColumn {
                        chunk: name(holder),
                        coord: column.coord(),
                    });
                }
            }
        }

        for v in &out {
            tracing::error!(violation = %v, "space is inconsistent");
        }
        out
    }
}
