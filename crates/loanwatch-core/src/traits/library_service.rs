// # Library Service Trait
//
// Defines the interface to the remote library portal.
//
// ## Implementations
//
// - bibliotheek.be: `loanwatch-provider-bibliotheek` crate
//
// ## Usage
//
// ```rust,ignore
// use loanwatch_core::LibraryService;
//
// #[tokio::main]
// async fn main() -> loanwatch_core::Result<()> {
//     let service = /* LibraryService implementation */;
//
//     service.login().await?;
//     for account in service.memberships().await? {
//         let counts = service.activities(&account).await?;
//         println!("{}: {} loans", account.name, counts.loans);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::model::{Account, ActivityCounts, CoarseRecord, DetailRecord};

/// Outcome of one batch renewal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionResult {
    /// The renewal form was resubmitted
    Submitted {
        /// Number of renewal identifiers in the batch
        extended: usize,
        /// Status of the confirmation response
        status: u16,
    },
    /// The service served no renewal form for these loans
    NoForm,
    /// Dry-run: the form was found but not submitted
    DryRun {
        /// Number of renewal identifiers that would have been submitted
        would_extend: usize,
    },
}

impl ExtensionResult {
    /// Loans counted as extended
    pub fn extended(&self) -> usize {
        match self {
            ExtensionResult::Submitted { extended, .. } => *extended,
            ExtensionResult::NoForm | ExtensionResult::DryRun { .. } => 0,
        }
    }
}

/// Trait for library service implementations
///
/// The service owns the authenticated session and every assumption about
/// the portal's page and endpoint shapes. It hands typed records to the
/// core and never decides what to do with them.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Responsibilities
///
/// ## Owned by the service
/// - ✅ Running the login protocol and keeping the cookie jar
/// - ✅ Re-logging in once when a request bounces on a logged-out session
/// - ✅ Parsing HTML/JSON into [`Account`], [`CoarseRecord`], [`DetailRecord`]
///
/// ## Not owned by the service
/// - ❌ Merging records into a snapshot (owned by `LoanAggregator`)
/// - ❌ Deciding which loans to renew (owned by `ExtensionCoordinator`)
/// - ❌ Scheduling or retrying refreshes (owned by `LoanEngine`)
/// - ❌ Access to the state store
#[async_trait]
pub trait LibraryService: Send + Sync {
    /// Ensure the session is authenticated
    ///
    /// Short-circuits when the session is already logged in.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Authenticated
    /// - `Err(Error::Auth(_))`: Login protocol failed
    async fn login(&self) -> Result<(), crate::Error>;

    /// Fetch all linked memberships, flattened across regions
    async fn memberships(&self) -> Result<Vec<Account>, crate::Error>;

    /// Fetch the activity counters for one account
    async fn activities(&self, account: &Account) -> Result<ActivityCounts, crate::Error>;

    /// Fetch and parse the loan detail page of one account
    ///
    /// # Returns
    ///
    /// - `Ok(records)`: Possibly empty
    /// - `Err(Error)`: Fetch failure, or a page without the loan container
    async fn loan_details(&self, account: &Account) -> Result<Vec<DetailRecord>, crate::Error>;

    /// Fetch the global loan overview covering every account
    ///
    /// `days_remaining` on the returned records is left for the caller to
    /// derive from `due_date`.
    async fn loan_overview(&self) -> Result<Vec<CoarseRecord>, crate::Error>;

    /// Submit one batch renewal for loans of a single account
    ///
    /// # Parameters
    ///
    /// - `account_id`: The owning membership
    /// - `extend_ids`: Renewal identifiers of the loans in the batch
    async fn extend_batch(
        &self,
        account_id: &str,
        extend_ids: &[String],
    ) -> Result<ExtensionResult, crate::Error>;

    /// Get the service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}
