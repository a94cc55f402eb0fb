//! Projection runner utilities (read model builders).
//!
//! Provides deterministic replay and cursor tracking without making storage
//! assumptions.

use thiserror::Error;

use stockroom_core::TenantId;

use crate::{Projection, TransactionRecord};

/// Tracks projection progress for a single tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    tenant_id: TenantId,
    last_sequence: u64,
}

impl ProjectionCursor {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("tenant mismatch (expected {expected}, found {found})")]
    TenantMismatch { expected: TenantId, found: TenantId },

    #[error("non-monotonic sequence (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Runs audit rows through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    /// Create a runner pinned to a specific tenant.
    ///
    /// Rows from any other tenant are rejected, even as the first row.
    pub fn new_for_tenant(tenant_id: TenantId, projection: P) -> Self {
        Self {
            projection,
            cursor: Some(ProjectionCursor {
                tenant_id,
                last_sequence: 0,
            }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single row, enforcing tenant consistency and monotonic sequencing.
    pub fn apply(&mut self, record: &TransactionRecord) -> Result<(), ProjectionError> {
        let found_tenant = record.tenant_id;
        let found_seq = record.sequence;

        match self.cursor {
            None => {
                self.projection.apply(record);
                self.cursor = Some(ProjectionCursor {
                    tenant_id: found_tenant,
                    last_sequence: found_seq,
                });
                Ok(())
            }
            Some(mut c) => {
                if c.tenant_id != found_tenant {
                    return Err(ProjectionError::TenantMismatch {
                        expected: c.tenant_id,
                        found: found_tenant,
                    });
                }
                if found_seq <= c.last_sequence {
                    return Err(ProjectionError::NonMonotonicSequence {
                        last: c.last_sequence,
                        found: found_seq,
                    });
                }

                self.projection.apply(record);
                c.last_sequence = found_seq;
                self.cursor = Some(c);
                Ok(())
            }
        }
    }

    /// Apply many rows in order.
    pub fn run<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a TransactionRecord>,
    ) -> Result<(), ProjectionError> {
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    /// Rebuild a tenant's projection from scratch by replaying its full log.
    ///
    /// Rows are sorted by commit sequence first, so callers may pass the log in
    /// any order.
    pub fn rebuild_from_scratch<'a>(
        tenant_id: TenantId,
        factory: impl FnOnce() -> P,
        records: impl IntoIterator<Item = &'a TransactionRecord>,
    ) -> Result<P, ProjectionError> {
        let mut ordered: Vec<&TransactionRecord> = records.into_iter().collect();
        ordered.sort_by_key(|r| r.sequence);

        let mut runner = ProjectionRunner::new_for_tenant(tenant_id, factory());
        runner.run(ordered)?;
        Ok(runner.projection)
    }
}
