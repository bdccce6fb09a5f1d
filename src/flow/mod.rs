//! Flow identity, update laws and reconciliation.

pub mod aggregate;
pub mod reconcile;
pub mod record;

pub use reconcile::{Outcome, PassSummary, Reconciler};
pub use record::{Field, FieldValue, FlowRecord, FlowTuple, Observation};
