//! Stock Mutator: validated quantity deltas on item snapshots.
//!
//! Rules:
//! - a negative delta that would take `current_stock` below zero is rejected
//!   with `InsufficientStock`
//! - a positive delta is clamped to the ceiling (normally `total_stock`);
//!   over-returns are tolerated, never rejected
//! - every accepted movement advances the item's last-transaction pointer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_audit::{IncidentKind, TransactionLine, TransactionType};
use stockroom_core::{Actor, Barcode, DomainError, DomainResult};

use crate::item::{Item, LoanStatus};

/// Result of applying a delta to a stock level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub stock: u32,
    /// Delta actually applied (differs from the request when clamped).
    pub applied: i64,
    pub clamped: bool,
}

/// Apply `delta` to the item's `current_stock`, bounded by `[0, ceiling]`.
pub fn apply_delta(item: &Item, delta: i64, ceiling: u32) -> DomainResult<DeltaOutcome> {
    let current = i64::from(item.current_stock);
    let target = current + delta;

    if target < 0 {
        return Err(DomainError::insufficient_stock(
            &item.barcode,
            item.name.clone(),
            u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
            item.current_stock,
        ));
    }

    let ceiling = i64::from(ceiling);
    if delta > 0 && target > ceiling {
        // Never let a positive movement lower stock that already sits above the ceiling.
        let stock = ceiling.max(current);
        return Ok(DeltaOutcome {
            stock: stock as u32,
            applied: stock - current,
            clamped: true,
        });
    }

    Ok(DeltaOutcome {
        stock: target as u32,
        applied: delta,
        clamped: false,
    })
}

/// Before/after picture of one item touched by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub barcode: Barcode,
    pub name: String,
    pub requested: u32,
    pub before: u32,
    pub after: u32,
    pub applied: i64,
    pub total_delta: i64,
    pub clamped: bool,
}

impl StockChange {
    /// A change record that leaves the item's stock untouched.
    pub fn unchanged(item: &Item) -> Self {
        Self {
            barcode: item.barcode.clone(),
            name: item.name.clone(),
            requested: 0,
            before: item.current_stock,
            after: item.current_stock,
            applied: 0,
            total_delta: 0,
            clamped: false,
        }
    }

    pub fn to_line(&self) -> TransactionLine {
        TransactionLine {
            barcode: self.barcode.clone(),
            name: self.name.clone(),
            quantity: self.requested,
            stock_delta: self.applied,
            total_delta: self.total_delta,
        }
    }
}

fn positive(item: &Item, quantity: u32) -> DomainResult<()> {
    if quantity == 0 {
        return Err(DomainError::invalid_payload(format!(
            "quantity for {} must be at least 1",
            item.barcode
        )));
    }
    Ok(())
}

impl Item {
    /// Take `quantity` units off the shelf and assign them to `assignee`.
    pub fn check_out(
        &mut self,
        quantity: u32,
        assignee: &str,
        kind: TransactionType,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        positive(self, quantity)?;
        let outcome = apply_delta(self, -i64::from(quantity), self.total_stock)?;

        let mut change = StockChange::unchanged(self);
        change.requested = quantity;
        change.after = outcome.stock;
        change.applied = outcome.applied;

        self.current_stock = outcome.stock;
        self.loan_status = LoanStatus::Out;
        self.assigned_to = Some(assignee.trim().to_string());
        self.touch(kind, actor, at);
        Ok(change)
    }

    /// Return `quantity` units; over-returns clamp at `total_stock`.
    pub fn check_in(
        &mut self,
        quantity: u32,
        kind: TransactionType,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        positive(self, quantity)?;
        let outcome = apply_delta(self, i64::from(quantity), self.total_stock)?;

        let mut change = StockChange::unchanged(self);
        change.requested = quantity;
        change.after = outcome.stock;
        change.applied = outcome.applied;
        change.clamped = outcome.clamped;

        self.current_stock = outcome.stock;
        self.release_if_returned();
        self.touch(kind, actor, at);
        Ok(change)
    }

    /// Record a loss or damage incident.
    ///
    /// Lost units also leave `total_stock`; damaged units stay counted in
    /// `total_stock` but are tallied in `damaged_stock`.
    pub fn write_off(
        &mut self,
        quantity: u32,
        incident: IncidentKind,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        positive(self, quantity)?;
        let outcome = apply_delta(self, -i64::from(quantity), self.total_stock)?;

        let mut change = StockChange::unchanged(self);
        change.requested = quantity;
        change.after = outcome.stock;
        change.applied = outcome.applied;

        self.current_stock = outcome.stock;
        match incident {
            IncidentKind::Lost => {
                self.total_stock -= quantity;
                self.damaged_stock = self.damaged_stock.min(self.total_stock);
                change.total_delta = -i64::from(quantity);
            }
            IncidentKind::Damaged => {
                self.damaged_stock = (self.damaged_stock + quantity).min(self.total_stock);
            }
        }

        if self.current_stock == 0 {
            self.loan_status = LoanStatus::In;
            self.assigned_to = None;
        }
        self.touch(incident.transaction_type(), actor, at);
        Ok(change)
    }

    /// Back to `IN` once no unit remains out; otherwise the loan stands.
    fn release_if_returned(&mut self) {
        if self.outstanding() == 0 {
            self.loan_status = LoanStatus::In;
            self.assigned_to = None;
        }
    }

    /// Master reset: everything back on the shelf.
    ///
    /// With `restore_damaged` the damage tally is cleared as well. The
    /// last-transaction pointer is cleared because the log it pointed into is
    /// purged in the same unit.
    pub fn reset(&mut self, restore_damaged: bool) -> StockChange {
        let mut change = StockChange::unchanged(self);
        change.after = self.total_stock;
        change.applied = i64::from(self.total_stock) - i64::from(self.current_stock);

        self.current_stock = self.total_stock;
        if restore_damaged {
            self.damaged_stock = 0;
        }
        self.loan_status = LoanStatus::In;
        self.assigned_to = None;
        self.last_transaction_type = None;
        self.last_transaction_by = None;
        self.last_transaction_date = None;
        change
    }
}
