//! Domain model: accounts, loans and snapshots
//!
//! A loan reaches us in two shapes:
//!
//! - [`CoarseRecord`]: one row of the global overview listing (all accounts
//!   in one call, few fields, due date as a raw string)
//! - [`DetailRecord`]: one entry of an account's detail page (rich fields,
//!   service-computed days remaining, renewal identifier)
//!
//! [`LoanRecord`] tags the two, and [`reconcile`] is the only place where
//! they are combined into a canonical [`Loan`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One linked library membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Service-issued membership identifier
    pub id: String,
    /// Display name of the account holder
    pub name: String,
    /// Library the membership belongs to
    pub library_name: String,
    /// Library card barcode
    pub barcode: String,
    /// Region key the membership was listed under
    #[serde(default)]
    pub region: String,
    /// The service flagged this membership as broken
    #[serde(default)]
    pub has_error: bool,
}

/// Activity counters reported per account
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityCounts {
    /// Items currently on loan
    pub loans: u32,
    /// Open reservations
    pub reservations: u32,
    /// Outstanding fees
    pub open_amount: f64,
}

/// An account together with its activity counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    /// The account
    pub account: Account,
    /// Counters as of the capturing cycle
    pub activity: ActivityCounts,
}

impl AccountView {
    /// Reservation count for this account
    pub fn reservations(&self) -> u32 {
        self.activity.reservations
    }
}

/// Identity of a loan within a snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanKey(String);

impl LoanKey {
    /// Key for a loan carrying a renewal identifier
    pub fn renewable(title: &str, extend_id: &str) -> Self {
        Self(format!("{title}{extend_id}"))
    }

    /// Fallback key when no renewal identifier is known
    ///
    /// Two loans with the same title on the same account collide here.
    pub fn fallback(title: &str, account_name: &str) -> Self {
        Self(format!("{title}{account_name}"))
    }

    /// Pick the renewable key when an extend id is present, the fallback otherwise
    pub fn for_loan(title: &str, extend_id: Option<&str>, account_name: &str) -> Self {
        match extend_id {
            Some(id) if !id.is_empty() => Self::renewable(title, id),
            _ => Self::fallback(title, account_name),
        }
    }

    /// The raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loan as listed by the global overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoarseRecord {
    pub title: String,
    pub author: Option<String>,
    /// Raw due date as served
    pub due_date: Option<String>,
    /// Derived from `due_date` by the aggregator
    pub days_remaining: i64,
    pub is_renewable: bool,
    pub extend_id: Option<String>,
    /// Display name of the owning account
    pub account_name: Option<String>,
    pub library_name: Option<String>,
}

/// A loan as listed on an account's detail page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub loan_type: Option<String>,
    pub loan_from: Option<String>,
    /// Due date display string
    pub loan_till: Option<String>,
    pub days_remaining: i64,
    /// Renewal identifier; presence means the loan can be extended
    pub extend_id: Option<String>,
    /// Sub-library heading the entry was grouped under
    pub library_name: Option<String>,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    /// Page the record was scraped from
    pub source_url: Option<String>,
}

/// A loan in either of its two provenances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provenance", rename_all = "snake_case")]
pub enum LoanRecord {
    /// From the overview listing
    Coarse(CoarseRecord),
    /// From an account detail page
    Detail(DetailRecord),
}

/// The canonical, merged view of one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub key: LoanKey,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub loan_type: Option<String>,
    pub loan_from: Option<String>,
    /// Raw due date; format depends on which source supplied it
    pub due_date: Option<String>,
    /// Signed; negative means overdue
    pub days_remaining: i64,
    pub is_extendable: bool,
    pub extend_id: Option<String>,
    pub library_name: Option<String>,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub source_url: Option<String>,
    /// Detail-page data contributed to this record
    #[serde(default)]
    pub detailed: bool,
}

impl Loan {
    /// Whether the loan can go into a renewal batch at `max_days`
    pub fn is_eligible_for_extension(&self, max_days: i64) -> bool {
        self.is_extendable
            && self.extend_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.days_remaining <= max_days
    }
}

impl CoarseRecord {
    fn into_loan(self, key: LoanKey) -> Loan {
        Loan {
            key,
            title: self.title,
            author: self.author,
            cover_url: None,
            loan_type: None,
            loan_from: None,
            due_date: self.due_date,
            days_remaining: self.days_remaining,
            is_extendable: self.is_renewable,
            extend_id: self.extend_id,
            library_name: self.library_name,
            account_id: None,
            account_name: self.account_name,
            source_url: None,
            detailed: false,
        }
    }
}

impl DetailRecord {
    fn into_loan(self, key: LoanKey) -> Loan {
        let is_extendable = self.extend_id.as_deref().is_some_and(|id| !id.is_empty());
        Loan {
            key,
            title: self.title,
            author: self.author,
            cover_url: self.cover_url,
            loan_type: self.loan_type,
            loan_from: self.loan_from,
            due_date: self.loan_till,
            days_remaining: self.days_remaining,
            is_extendable,
            extend_id: self.extend_id,
            library_name: self.library_name,
            account_id: self.account_id,
            account_name: self.account_name,
            source_url: self.source_url,
            detailed: true,
        }
    }
}

impl LoanRecord {
    /// Canonical key of this record
    ///
    /// `fallback_account` is used when the record itself names no account.
    pub fn key(&self, fallback_account: &str) -> LoanKey {
        match self {
            LoanRecord::Coarse(r) => LoanKey::for_loan(
                &r.title,
                r.extend_id.as_deref(),
                r.account_name.as_deref().unwrap_or(fallback_account),
            ),
            LoanRecord::Detail(r) => LoanKey::for_loan(
                &r.title,
                r.extend_id.as_deref(),
                r.account_name.as_deref().unwrap_or(fallback_account),
            ),
        }
    }

    /// Convert a lone record into a loan
    pub fn into_loan(self, key: LoanKey) -> Loan {
        match self {
            LoanRecord::Coarse(r) => r.into_loan(key),
            LoanRecord::Detail(r) => r.into_loan(key),
        }
    }
}

/// Merge a new record into what is already known for the same identity
///
/// Detail data is authoritative for `days_remaining`, `extend_id` and
/// `is_extendable`. Every other field takes the detail value when present
/// and falls back to the coarse one. A second detail record for the same
/// key overwrites the first field by field; a second coarse record replaces
/// a coarse-only loan outright.
pub fn reconcile(existing: Option<Loan>, incoming: LoanRecord, key: LoanKey) -> Loan {
    let Some(existing) = existing else {
        return incoming.into_loan(key);
    };

    match incoming {
        LoanRecord::Detail(detail) => merge_detail_over(existing, detail.into_loan(key)),
        LoanRecord::Coarse(coarse) if existing.detailed => {
            merge_detail_over(coarse.into_loan(key), existing)
        }
        LoanRecord::Coarse(coarse) => coarse.into_loan(key),
    }
}

fn merge_detail_over(coarse: Loan, detail: Loan) -> Loan {
    Loan {
        key: detail.key,
        title: if detail.title.is_empty() { coarse.title } else { detail.title },
        author: detail.author.or(coarse.author),
        cover_url: detail.cover_url.or(coarse.cover_url),
        loan_type: detail.loan_type.or(coarse.loan_type),
        loan_from: detail.loan_from.or(coarse.loan_from),
        due_date: detail.due_date.or(coarse.due_date),
        days_remaining: detail.days_remaining,
        is_extendable: detail.is_extendable,
        extend_id: detail.extend_id,
        library_name: detail.library_name.or(coarse.library_name),
        account_id: detail.account_id.or(coarse.account_id),
        account_name: detail.account_name.or(coarse.account_name),
        source_url: detail.source_url.or(coarse.source_url),
        detailed: true,
    }
}

/// The complete state of all accounts and loans as of one refresh cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub accounts: BTreeMap<String, AccountView>,
    pub loans: BTreeMap<LoanKey, Loan>,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot from already-merged parts
    pub fn new(
        accounts: BTreeMap<String, AccountView>,
        loans: BTreeMap<LoanKey, Loan>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            accounts,
            loans,
            captured_at,
        }
    }

    /// Minimum days remaining over all loans; `None` without loans
    pub fn min_days_remaining(&self) -> Option<i64> {
        self.loans.values().map(|loan| loan.days_remaining).min()
    }

    /// Number of loans
    pub fn loan_count(&self) -> usize {
        self.loans.len()
    }

    /// Total reservations across accounts
    pub fn reservation_count(&self) -> u32 {
        self.accounts.values().map(AccountView::reservations).sum()
    }

    /// A snapshot with no accounts was never filled by a real cycle
    pub fn is_uninitialized(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Look up a loan
    pub fn loan(&self, key: &LoanKey) -> Option<&Loan> {
        self.loans.get(key)
    }

    /// The entry `loan` continues from this snapshot
    ///
    /// Matches on key first. A loan whose key changed between cycles (its
    /// renewal id appeared or disappeared with the detail page) is matched
    /// by title and account name, provided exactly one candidate exists.
    pub fn predecessor_of(&self, loan: &Loan) -> Option<&Loan> {
        if let Some(found) = self.loans.get(&loan.key) {
            return Some(found);
        }

        let mut candidates = self
            .loans
            .values()
            .filter(|p| p.title == loan.title && p.account_name == loan.account_name);
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}
