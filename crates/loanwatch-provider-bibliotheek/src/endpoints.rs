// # Portal Endpoints
//
// Every URL the service talks to, built from two bases:
// - the portal (`https://bibliotheek.be`): library pages and JSON API
// - the identity provider (`https://mijn.bibliotheek.be`): login flow

use loanwatch_core::{Error, Result};
use reqwest::Url;

/// Default portal base URL
pub const DEFAULT_BASE_URL: &str = "https://bibliotheek.be";

/// Default identity provider base URL
pub const DEFAULT_AUTH_BASE_URL: &str = "https://mijn.bibliotheek.be";

/// Path of the protected page that starts the login flow
const LOGIN_START_PATH: &str = "/mijn-bibliotheek/aanmelden";

/// Path prefix of the identity provider's login pages
const AUTH_PATH_PREFIX: &str = "/openbibid";

/// URL builder for the bibliotheek.be portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
    auth_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_URL.to_string(),
            auth_base: DEFAULT_AUTH_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Endpoints rooted at custom bases
    ///
    /// Trailing slashes are trimmed.
    pub fn new(base: impl Into<String>, auth_base: impl Into<String>) -> Result<Self> {
        let base = base.into().trim_end_matches('/').to_string();
        let auth_base = auth_base.into().trim_end_matches('/').to_string();
        for url in [&base, &auth_base] {
            Url::parse(url).map_err(|e| Error::config(format!("Invalid base URL {}: {}", url, e)))?;
        }
        Ok(Self { base, auth_base })
    }

    /// Portal and identity provider served from one base
    pub fn with_base(base: impl Into<String>) -> Result<Self> {
        let base = base.into();
        Self::new(base.clone(), base)
    }

    /// Endpoints for optional overrides
    ///
    /// An unset identity provider follows a custom portal base, so that
    /// credentials never leave for the production login while the portal
    /// points elsewhere.
    pub fn from_overrides(base: Option<&str>, auth_base: Option<&str>) -> Result<Self> {
        match (base, auth_base) {
            (None, None) => Ok(Self::default()),
            (Some(base), None) => Self::with_base(base),
            (base, Some(auth_base)) => Self::new(base.unwrap_or(DEFAULT_BASE_URL), auth_base),
        }
    }

    pub fn auth_base(&self) -> &str {
        &self.auth_base
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Protected page whose redirect starts the login flow
    pub fn login_start(&self) -> String {
        format!("{}{}", self.base, LOGIN_START_PATH)
    }

    /// Credential submission
    pub fn credentials(&self) -> String {
        format!("{}{}/rest/auth/login", self.auth_base, AUTH_PATH_PREFIX)
    }

    /// Token exchange used when the credential hop redirects twice
    pub fn token_exchange(&self) -> String {
        format!("{}{}/rest/accessToken", self.auth_base, AUTH_PATH_PREFIX)
    }

    /// Protected resource used to verify a login
    pub fn verification(&self) -> String {
        self.memberships()
    }

    pub fn memberships(&self) -> String {
        format!("{}/api/my-library/memberships", self.base)
    }

    pub fn activities(&self, account_id: &str) -> String {
        format!("{}/api/my-library/{}/activities", self.base, account_id)
    }

    pub fn loan_details(&self, account_id: &str) -> String {
        format!(
            "{}/mijn-bibliotheek/lidmaatschappen/{}/uitleningen",
            self.base, account_id
        )
    }

    /// Global overview covering every linked membership
    pub fn loan_overview(&self) -> String {
        format!("{}/api/my-library/loans", self.base)
    }

    /// Renewal form for a batch of loans of one account
    pub fn renewal(&self, account_id: &str, extend_ids: &[String]) -> String {
        format!(
            "{}/verlengen?loan-ids={}",
            self.loan_details(account_id),
            extend_ids.join(",")
        )
    }

    pub fn lists(&self) -> String {
        format!("{}/mijn-bibliotheek/lijsten", self.base)
    }

    pub fn list_items(&self, list_id: &str) -> String {
        format!("{}/api/my-library/lists/{}/list-items", self.base, list_id)
    }

    /// Resolve a possibly relative `Location` against the URL it came from
    pub fn resolve(&self, from: &str, location: &str) -> Result<String> {
        let from = Url::parse(from)
            .or_else(|_| Url::parse(&self.base))
            .map_err(|e| Error::fetch(format!("Invalid URL {}: {}", from, e)))?;
        from.join(location)
            .map(String::from)
            .map_err(|e| Error::fetch(format!("Invalid redirect target {}: {}", location, e)))
    }

    /// Whether a redirect target sends the client back into the login flow
    pub fn is_login_redirect(&self, location: &str) -> bool {
        location.contains(LOGIN_START_PATH)
            || location.contains(&format!("{}/rest/auth", AUTH_PATH_PREFIX))
    }
}
