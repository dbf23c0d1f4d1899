//! Change detection between successive snapshots
//!
//! [`ChangeDetector::diff`] is a pure function of `(previous, current)`.
//! Conditions are edge-triggered: a loan that stays inside the warning
//! window, or stays overdue, is reported once at the crossing and then
//! stays quiet.
//!
//! ## Rules
//!
//! | Event              | Fires when                                                     |
//! |--------------------|----------------------------------------------------------------|
//! | `DaysChanged`      | a predecessor exists and the aggregate minimum differs         |
//! | `LoanExpiringSoon` | a predecessor exists, `0 <= days <= threshold`, and the loan   |
//! |                    | was absent before or had `days > threshold`                    |
//! | `LoanOverdue`      | `days < 0` and the loan was absent before or had `days >= 0`   |
//!
//! Without a predecessor only `LoanOverdue` can fire: a first sighting of
//! an overdue loan is reported, a first sighting of an expiring one is not.
//! A predecessor with no accounts counts as no predecessor.

use serde::{Deserialize, Serialize};

use crate::model::{Loan, Snapshot};

/// A discrete state transition handed to the trigger sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoanEvent {
    /// The aggregate minimum days remaining changed
    DaysChanged {
        /// New minimum; `None` when no loans remain
        new_min: Option<i64>,
        /// Minimum in the predecessor snapshot
        previous_min: Option<i64>,
        /// Loans in the current snapshot
        loan_count: usize,
    },

    /// A loan entered the warning window
    LoanExpiringSoon {
        loan: Box<Loan>,
        days_left: i64,
    },

    /// A loan went past its due date
    LoanOverdue {
        loan: Box<Loan>,
        /// Positive number of days past due
        days_overdue: i64,
    },
}

impl LoanEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LoanEvent::DaysChanged { .. } => "days_changed",
            LoanEvent::LoanExpiringSoon { .. } => "loan_expiring_soon",
            LoanEvent::LoanOverdue { .. } => "loan_overdue",
        }
    }

    /// The loan this event is about, if any
    pub fn loan(&self) -> Option<&Loan> {
        match self {
            LoanEvent::DaysChanged { .. } => None,
            LoanEvent::LoanExpiringSoon { loan, .. } | LoanEvent::LoanOverdue { loan, .. } => {
                Some(loan)
            }
        }
    }
}

/// Edge-triggered snapshot differ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDetector {
    warning_threshold: i64,
}

impl ChangeDetector {
    /// Create a detector with the given warning threshold (in days)
    pub fn new(warning_threshold: i64) -> Self {
        Self { warning_threshold }
    }

    /// The configured warning threshold
    pub fn warning_threshold(&self) -> i64 {
        self.warning_threshold
    }

    /// Derive the ordered events for the transition `previous → current`
    ///
    /// `DaysChanged` comes first, followed by per-loan events in key order.
    pub fn diff(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Vec<LoanEvent> {
        let previous = previous.filter(|p| !p.is_uninitialized());
        let mut events = Vec::new();

        if let Some(prev) = previous {
            let previous_min = prev.min_days_remaining();
            let new_min = current.min_days_remaining();
            if previous_min != new_min {
                events.push(LoanEvent::DaysChanged {
                    new_min,
                    previous_min,
                    loan_count: current.loan_count(),
                });
            }
        }

        for loan in current.loans.values() {
            let days = loan.days_remaining;
            let before = previous.map(|p| p.predecessor_of(loan).map(|l| l.days_remaining));

            if days < 0 {
                // `before` is None (no predecessor) or Some(None) (new loan): both fire
                let crossed = match before {
                    Some(Some(prev_days)) => prev_days >= 0,
                    _ => true,
                };
                if crossed {
                    events.push(LoanEvent::LoanOverdue {
                        loan: Box::new(loan.clone()),
                        days_overdue: -days,
                    });
                }
            } else if days <= self.warning_threshold {
                let crossed = match before {
                    Some(Some(prev_days)) => prev_days > self.warning_threshold,
                    Some(None) => true,
                    None => false,
                };
                if crossed {
                    events.push(LoanEvent::LoanExpiringSoon {
                        loan: Box::new(loan.clone()),
                        days_left: days,
                    });
                }
            }
        }

        events
    }
}
