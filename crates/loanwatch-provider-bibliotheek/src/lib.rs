// # bibliotheek.be Library Service
//
// This crate provides the bibliotheek.be implementation of `LibraryService`.
//
// ## Implementation Status
//
// - ✅ Multi-step login through the portal's OAuth-style flow
// - ✅ One automatic re-login when a request bounces on an expired session
// - ✅ Membership, activity and overview JSON endpoints
// - ✅ Loan detail pages scraped per membership
// - ✅ Batch renewal by resubmitting the served confirmation form
// - ✅ Dry-run mode for safe testing
// - ✅ Library information and reading lists (service-specific extras)
// - ❌ NO retry logic (owned by LoanEngine's next cycle)
// - ❌ NO merging of records (owned by LoanAggregator)
// - ❌ NO background tasks (violates shutdown determinism)
// - ❌ NO state store access (owned by LoanEngine)
//
// ## Security Requirements
//
// - The password NEVER appears in logs or Debug output
// - Credentials come from configuration only
// - Construction fails fast on empty credentials
//
// ## Endpoints
//
// See [`endpoints::Endpoints`] for every URL the service touches.

pub mod endpoints;
pub mod parser;
pub mod session;

use async_trait::async_trait;
use loanwatch_core::config::ServiceConfig;
use loanwatch_core::model::{Account, ActivityCounts, CoarseRecord, DetailRecord};
use loanwatch_core::traits::{ExtensionResult, LibraryService};
use loanwatch_core::{Error, Result};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

pub use endpoints::Endpoints;
pub use parser::{LibraryInfo, ListItem, UserList};
pub use session::SessionClient;

use session::RequestOptions;

/// Name reported by [`LibraryService::service_name`]
const SERVICE_NAME: &str = "bibliotheek";

/// bibliotheek.be library service
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the service will:
/// - Perform every read request, including fetching renewal forms
/// - Log the renewal form it would have submitted
/// - **NOT** submit any renewal
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct BibliotheekService {
    session: SessionClient,

    username: String,

    /// ⚠️ NEVER log this value
    password: String,

    /// Dry-run mode: if true, fetch renewal forms but never submit them
    dry_run: bool,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for BibliotheekService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BibliotheekService")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("endpoints", self.session.endpoints())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl BibliotheekService {
    /// Create a new service
    ///
    /// # Parameters
    ///
    /// - `username`, `password`: Portal credentials
    /// - `endpoints`: Portal URLs
    /// - `timeout`: Applied to every HTTP request
    /// - `dry_run`: If true, renewal forms are fetched but not submitted
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: Empty credentials, or the HTTP client could not be built
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        endpoints: Endpoints,
        timeout: Duration,
        dry_run: bool,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();

        if username.trim().is_empty() {
            return Err(Error::config("bibliotheek username cannot be empty"));
        }
        if password.is_empty() {
            return Err(Error::config("bibliotheek password cannot be empty"));
        }

        Ok(Self {
            session: SessionClient::new(endpoints, timeout)?,
            username,
            password,
            dry_run,
        })
    }

    /// Build the service from its configuration section
    pub fn from_config(config: &ServiceConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        match config {
            ServiceConfig::Bibliotheek {
                username,
                password,
                base_url,
                auth_base_url,
                dry_run,
            } => {
                let endpoints = Endpoints::from_overrides(base_url.as_deref(), auth_base_url.as_deref())?;

                if *dry_run {
                    tracing::warn!("bibliotheek service running in DRY-RUN mode - no loans will be renewed");
                }

                Self::new(username.clone(), password.clone(), endpoints, timeout, *dry_run)
            }
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    /// Fetch a JSON endpoint
    async fn get_json(&self, url: &str) -> Result<Value> {
        self.session.ensure_authenticated().await?;
        let response = self.session.get_text(url).await?;
        serde_json::from_str(&response.body)
            .map_err(|e| Error::parse(format!("{} did not return JSON: {}", url, e)))
    }

    /// Scrape a library information page
    ///
    /// # Parameters
    ///
    /// - `url`: Absolute URL, or a path relative to the portal base
    pub async fn library_info(&self, url: &str) -> Result<LibraryInfo> {
        self.session.ensure_authenticated().await?;
        let endpoints = self.session.endpoints();
        let url = endpoints.resolve(endpoints.base(), url)?;

        let response = self.session.get_text(&url).await?;
        parser::parse_library_info(&response.body)
    }

    /// Fetch the reading lists together with their items
    ///
    /// A list whose items cannot be fetched is returned without items.
    pub async fn lists(&self) -> Result<Vec<UserList>> {
        self.session.ensure_authenticated().await?;
        let page = self.session.get_text(&self.session.endpoints().lists()).await?;
        let mut lists = parser::parse_lists(&page.body)?;

        for list in &mut lists {
            let url = self.session.endpoints().list_items(&list.id);
            match self.get_json(&url).await.and_then(|json| parser::parse_list_items(&json)) {
                Ok(items) => list.items = items,
                Err(e) => tracing::warn!("Failed to fetch items of list {}: {}", list.id, e),
            }
        }

        Ok(lists)
    }
}

#[async_trait]
impl LibraryService for BibliotheekService {
    async fn login(&self) -> Result<()> {
        if self.session.is_authenticated() {
            return Ok(());
        }
        self.session.login(&self.username, &self.password).await
    }

    async fn memberships(&self) -> Result<Vec<Account>> {
        let json = self.get_json(&self.session.endpoints().memberships()).await?;
        parser::parse_memberships(&json)
    }

    async fn activities(&self, account: &Account) -> Result<ActivityCounts> {
        let json = self
            .get_json(&self.session.endpoints().activities(&account.id))
            .await?;
        parser::parse_activities(&json)
    }

    async fn loan_details(&self, account: &Account) -> Result<Vec<DetailRecord>> {
        self.session.ensure_authenticated().await?;
        let url = self.session.endpoints().loan_details(&account.id);
        let response = self.session.get_text(&url).await?;

        let mut records = parser::parse_loan_details(&response.body, &response.url)?;
        for record in &mut records {
            record.account_id = Some(account.id.clone());
            record.account_name = Some(account.name.clone());
        }

        tracing::debug!("{} detail records for account {}", records.len(), account.id);
        Ok(records)
    }

    async fn loan_overview(&self) -> Result<Vec<CoarseRecord>> {
        let json = self.get_json(&self.session.endpoints().loan_overview()).await?;
        parser::parse_overview(&json)
    }

    /// Renew a batch of loans of one account
    ///
    /// # Flow
    ///
    /// 1. GET the renewal URL for the joined renewal identifiers
    /// 2. No renewal form on the page → [`ExtensionResult::NoForm`]
    /// 3. POST every served form field back to the same URL
    async fn extend_batch(&self, account_id: &str, extend_ids: &[String]) -> Result<ExtensionResult> {
        if extend_ids.is_empty() {
            return Ok(ExtensionResult::NoForm);
        }

        tracing::info!(
            "Renewing {} loans of account {} [mode: {}]",
            extend_ids.len(),
            account_id,
            if self.dry_run { "DRY-RUN" } else { "LIVE" }
        );

        self.session.ensure_authenticated().await?;
        let url = self.session.endpoints().renewal(account_id, extend_ids);

        let page = self.session.get_text(&url).await?;
        let Some(form) = parser::parse_renewal_form(&page.body) else {
            tracing::warn!("No renewal form served for account {}", account_id);
            return Ok(ExtensionResult::NoForm);
        };

        if self.dry_run {
            let field_names: Vec<&str> = form.fields.iter().map(|(name, _)| name.as_str()).collect();
            tracing::info!(
                "[DRY-RUN] Would submit renewal form (action {}) to {} with fields {:?}",
                form.action,
                url,
                field_names
            );
            return Ok(ExtensionResult::DryRun {
                would_extend: extend_ids.len(),
            });
        }

        let response = self
            .session
            .request(Method::POST, &url, &RequestOptions::form(form.fields))
            .await?
            .require_success()?;

        tracing::info!(
            "Renewal submitted for account {} ({} loans, status {})",
            account_id,
            extend_ids.len(),
            response.status
        );
        Ok(ExtensionResult::Submitted {
            extended: extend_ids.len(),
            status: response.status,
        })
    }

    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }
}
