//! Loan aggregation
//!
//! Produces one consistent [`Snapshot`] per refresh cycle from the
//! library service.
//!
//! ## Flow
//!
//! ```text
//! login ─► memberships ─► for each account (serially):
//!                            activities ─► [loans > 0] detail page
//!       ─► overview (all accounts) ─► merge ─► Snapshot
//! ```
//!
//! ## Identity
//!
//! Detail loans are keyed by title and renewal id. Overview rows carry no
//! renewal id, so a row is merged into the detail loan with the same title
//! on the same account; only rows without such a match get the fallback
//! key `title + account name`.
//!
//! ## Failure Scope
//!
//! | Step            | On failure                                   |
//! |-----------------|----------------------------------------------|
//! | login           | cycle aborts                                 |
//! | memberships     | cycle aborts with a fetch error              |
//! | activities      | cycle aborts with a fetch error              |
//! | detail page     | logged; overview records stand in            |
//! | overview        | logged; detail records stand alone           |
//!
//! Accounts share one session, so they are fetched one after another.

use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::days;
use crate::error::{Error, Result};
use crate::model::{Account, AccountView, Loan, LoanKey, LoanRecord, Snapshot, reconcile};
use crate::traits::LibraryService;

/// Builds snapshots from a [`LibraryService`]
pub struct LoanAggregator<'a> {
    service: &'a dyn LibraryService,
}

impl<'a> LoanAggregator<'a> {
    /// Create an aggregator over a service
    pub fn new(service: &'a dyn LibraryService) -> Self {
        Self { service }
    }

    /// Run one aggregation pass
    ///
    /// # Parameters
    ///
    /// - `today`: Local calendar date used to turn overview due dates into
    ///   days remaining
    pub async fn aggregate(&self, today: NaiveDate) -> Result<Snapshot> {
        self.service.login().await?;

        let accounts = self.service.memberships().await.map_err(Error::into_fetch)?;
        debug!("{} membership(s) listed", accounts.len());

        let mut views: BTreeMap<String, AccountView> = BTreeMap::new();
        let mut loans: BTreeMap<LoanKey, Loan> = BTreeMap::new();
        // (title, account name) -> keys of detail loans, for matching overview rows
        let mut detail_index: HashMap<(String, String), Vec<LoanKey>> = HashMap::new();

        for account in accounts {
            if account.has_error {
                warn!(
                    "Skipping account {} ({}): flagged with an error",
                    account.id, account.library_name
                );
                continue;
            }

            let activity = self
                .service
                .activities(&account)
                .await
                .map_err(Error::into_fetch)?;

            if activity.loans > 0 {
                match self.service.loan_details(&account).await {
                    Ok(records) => {
                        debug!("Account {}: {} detail record(s)", account.id, records.len());
                        for mut record in records {
                            record.account_id.get_or_insert_with(|| account.id.clone());
                            record.account_name.get_or_insert_with(|| account.name.clone());
                            record.library_name.get_or_insert_with(|| account.library_name.clone());
                            let identity = (record.title.clone(), account.name.clone());
                            let record = LoanRecord::Detail(record);
                            let key = record.key(&account.name);
                            merge_into(&mut loans, record, key.clone());
                            let keys = detail_index.entry(identity).or_default();
                            if !keys.contains(&key) {
                                keys.push(key);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Loan details for account {} unavailable: {}", account.id, e);
                    }
                }
            }

            views.insert(account.id.clone(), AccountView { account, activity });
        }

        match self.service.loan_overview().await {
            Ok(records) => {
                debug!("Overview lists {} loan(s)", records.len());
                for mut record in records {
                    record.days_remaining = record
                        .due_date
                        .as_deref()
                        .map(|raw| days::days_remaining(raw, today))
                        .unwrap_or(0);

                    let identity = (
                        record.title.clone(),
                        record.account_name.clone().unwrap_or_default(),
                    );
                    let record = LoanRecord::Coarse(record);
                    let own_key = record.key("");

                    let key = if loans.contains_key(&own_key) {
                        own_key
                    } else {
                        match detail_index.get(&identity).map(Vec::as_slice) {
                            Some([detail_key]) => detail_key.clone(),
                            Some([_, _, ..]) => {
                                debug!(
                                    "Overview loan '{}' matches several detail loans of {}, skipping",
                                    identity.0, identity.1
                                );
                                continue;
                            }
                            _ => own_key,
                        }
                    };
                    merge_into(&mut loans, record, key);
                }
            }
            Err(e) => {
                warn!("Loan overview unavailable: {}", e);
            }
        }

        for loan in loans.values_mut() {
            if loan.account_id.is_none() {
                loan.account_id = owning_account(&views, loan).map(|a| a.id.clone());
            }
        }

        let snapshot = Snapshot::new(views, loans, Utc::now());
        info!(
            "Aggregated {} loan(s) across {} account(s), min days remaining: {:?}",
            snapshot.loan_count(),
            snapshot.accounts.len(),
            snapshot.min_days_remaining()
        );
        Ok(snapshot)
    }
}

fn merge_into(loans: &mut BTreeMap<LoanKey, Loan>, record: LoanRecord, key: LoanKey) {
    let existing = loans.remove(&key);
    let merged = reconcile(existing, record, key.clone());
    loans.insert(key, merged);
}

/// Resolve the account of an overview-only loan from its account name,
/// narrowing by library when the name is shared
fn owning_account<'v>(views: &'v BTreeMap<String, AccountView>, loan: &Loan) -> Option<&'v Account> {
    let name = loan.account_name.as_deref()?;
    let by_name: Vec<&Account> = views
        .values()
        .map(|v| &v.account)
        .filter(|a| a.name == name)
        .collect();

    match by_name.as_slice() {
        [only] => Some(*only),
        [] => None,
        several => {
            let library = loan.library_name.as_deref()?;
            let mut by_library = several.iter().filter(|a| a.library_name == library);
            match (by_library.next(), by_library.next()) {
                (Some(account), None) => Some(*account),
                _ => None,
            }
        }
    }
}
