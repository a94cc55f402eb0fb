//! Audit Log model and read-side projection mechanics.
//!
//! Every stock mutation is recorded as an immutable [`TransactionRecord`]. The
//! log is the sole source of historical truth; read models are folds over it.

pub mod projection;
pub mod record;
pub mod runner;

pub use projection::Projection;
pub use record::{
    FieldChange, IncidentKind, LoanContext, NewTransaction, TransactionDetails, TransactionLine,
    TransactionRecord, TransactionType,
};
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
