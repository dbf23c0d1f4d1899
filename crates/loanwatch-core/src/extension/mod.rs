//! Batch renewal of loans that are close to their due date
//!
//! Eligible loans are grouped by owning account and each group is sent as
//! one renewal batch. Batches are independent: a failing account does not
//! stop the others.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::model::{Loan, Snapshot};
use crate::traits::{ExtensionResult, LibraryService};

/// Outcome of one account's batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Owning membership
    pub account_id: String,
    /// Renewal identifiers that were sent
    pub submitted: Vec<String>,
    /// Loans counted as extended
    pub extended: usize,
    /// Service result when the request completed
    pub result: Option<ExtensionResult>,
    /// Error message when it did not
    pub error: Option<String>,
}

/// Aggregate outcome of an extension run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionReport {
    /// Per-account outcomes, in account id order
    pub batches: Vec<BatchOutcome>,
    /// Sum of `extended` over all batches
    pub total_extended: usize,
}

impl ExtensionReport {
    /// Whether any batch failed outright
    pub fn has_failures(&self) -> bool {
        self.batches.iter().any(|b| b.error.is_some())
    }
}

/// Select loans eligible at `max_days`, grouped by owning account
///
/// Loans whose account could not be resolved are skipped with a warning,
/// since the renewal endpoint is per account.
pub fn select_eligible(snapshot: &Snapshot, max_days: i64) -> BTreeMap<String, Vec<&Loan>> {
    let mut groups: BTreeMap<String, Vec<&Loan>> = BTreeMap::new();

    for loan in snapshot.loans.values() {
        if !loan.is_eligible_for_extension(max_days) {
            continue;
        }
        match loan.account_id.as_deref() {
            Some(account_id) => groups.entry(account_id.to_string()).or_default().push(loan),
            None => warn!("Loan '{}' is eligible but has no known account, skipping", loan.title),
        }
    }

    groups
}

/// Drives batch renewals through a [`LibraryService`]
pub struct ExtensionCoordinator<'a> {
    service: &'a dyn LibraryService,
}

impl<'a> ExtensionCoordinator<'a> {
    pub fn new(service: &'a dyn LibraryService) -> Self {
        Self { service }
    }

    /// Extend every eligible loan in `snapshot`
    ///
    /// # Parameters
    ///
    /// - `snapshot`: The state to select from
    /// - `max_days`: Loans with at most this many days remaining are renewed
    pub async fn extend(&self, snapshot: &Snapshot, max_days: i64) -> ExtensionReport {
        let groups = select_eligible(snapshot, max_days);
        if groups.is_empty() {
            debug!("No loans eligible for extension at {} day(s)", max_days);
            return ExtensionReport::default();
        }

        let mut report = ExtensionReport::default();

        for (account_id, loans) in groups {
            let extend_ids: Vec<String> = loans
                .iter()
                .filter_map(|loan| loan.extend_id.clone())
                .collect();

            info!(
                "Extending {} loan(s) for account {}",
                extend_ids.len(),
                account_id
            );

            let outcome = match self.service.extend_batch(&account_id, &extend_ids).await {
                Ok(result) => {
                    if matches!(result, ExtensionResult::NoForm) {
                        warn!("No renewal form served for account {}", account_id);
                    }
                    BatchOutcome {
                        account_id,
                        submitted: extend_ids,
                        extended: result.extended(),
                        result: Some(result),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Extension for account {} failed: {}", account_id, e);
                    BatchOutcome {
                        account_id,
                        submitted: extend_ids,
                        extended: 0,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            report.total_extended += outcome.extended;
            report.batches.push(outcome);
        }

        report
    }
}
