use crate::TransactionRecord;

/// A projection builds a read model from the append-only Audit Log.
///
/// Projections are read-side only: they answer "who has what" for dashboards
/// and check-in views and are never consulted when authorizing a mutation.
/// Live item stock stays authoritative.
///
/// ## Idempotency
///
/// Applying the same ordered log twice to fresh instances must produce the same
/// read model. The `ProjectionRunner` enforces ordering and tenant pinning so
/// implementations can stay simple folds.
///
/// ## Disposability
///
/// Read models can be dropped and rebuilt from the log at any time. A master
/// reset purges the log, which resets every projection to empty.
pub trait Projection {
    /// Fold one committed audit row into the read model.
    fn apply(&mut self, record: &TransactionRecord);
}
