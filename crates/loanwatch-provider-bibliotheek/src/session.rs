// # Session Client
//
// Cookie-bearing HTTP transport for the portal, and the login protocol
// that makes it authenticated.
//
// ## Login Protocol
//
// ```text
// GET  login start ──(no redirect)──────────────────────────► authenticated
//        │ 3xx
//        ▼
// parse oauth_callback / oauth_token / hint from Location
//        ▼
// GET  authorization page
//        ▼
// POST credentials {hint, token, callback, email, password}
//        │ 200 ────────────────────────────────┐
//        │ 303                                 │
//        ▼                                     │
// GET  Location ──(3xx)──► POST token exchange │
//        │                    ▼ follow 3xx     │
//        ▼                    ▼                ▼
// GET  verification resource ── 200 ──────────────────────► authenticated
// ```
//
// Automatic redirects are disabled on the client so that every hop's
// `Set-Cookie` lands in the shared jar and the protocol can inspect each
// `Location`.

use loanwatch_core::{AuthError, Error, Result, SessionError};
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::{Method, Url};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::endpoints::Endpoints;

/// Upper bound on redirect hops followed in one chain
const MAX_REDIRECT_HOPS: usize = 10;

/// Options for one [`SessionClient::request`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// URL-encoded form body; turns the request into a form POST
    pub form: Option<Vec<(String, String)>>,
    /// Follow redirects to the final response
    pub follow_redirects: bool,
}

impl RequestOptions {
    /// GET that follows redirects
    pub fn follow() -> Self {
        Self {
            form: None,
            follow_redirects: true,
        }
    }

    /// Form submission that follows redirects
    pub fn form(fields: Vec<(String, String)>) -> Self {
        Self {
            form: Some(fields),
            follow_redirects: true,
        }
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    /// URL that produced this response
    pub url: String,
    /// `Location` header of a redirect
    pub location: Option<String>,
    pub body: String,
}

impl PortalResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error unless the status is 2xx
    pub fn require_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::fetch(format!("{} answered status {}", self.url, self.status)))
        }
    }
}

/// Parameters the login redirect carries into the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginParams {
    pub callback: String,
    pub token: String,
    pub hint: String,
}

impl LoginParams {
    /// Extract `oauth_callback`, `oauth_token` and `hint` from a redirect target
    pub fn from_redirect(target: &str) -> std::result::Result<Self, AuthError> {
        let url = Url::parse(target).map_err(|e| AuthError::MalformedRedirect(format!("{}: {}", target, e)))?;

        let mut callback = None;
        let mut token = None;
        let mut hint = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "oauth_callback" => callback = Some(value.into_owned()),
                "oauth_token" => token = Some(value.into_owned()),
                "hint" => hint = Some(value.into_owned()),
                _ => {}
            }
        }

        match (callback, token, hint) {
            (Some(callback), Some(token), Some(hint)) => Ok(Self {
                callback,
                token,
                hint,
            }),
            (callback, token, hint) => {
                let missing: Vec<&str> = [
                    ("oauth_callback", callback.is_none()),
                    ("oauth_token", token.is_none()),
                    ("hint", hint.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(AuthError::MissingParameters(missing.join(", ")))
            }
        }
    }

    fn form(&self, credentials: &Credentials) -> Vec<(String, String)> {
        vec![
            ("hint".to_string(), self.hint.clone()),
            ("token".to_string(), self.token.clone()),
            ("callback".to_string(), self.callback.clone()),
            ("email".to_string(), credentials.username.clone()),
            ("password".to_string(), credentials.password.clone()),
        ]
    }
}

#[derive(Clone)]
struct Credentials {
    username: String,
    /// ⚠️ NEVER log this value
    password: String,
}

// Keeps the password out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Authenticated, cookie-bearing HTTP session
///
/// # Security
///
/// The Debug implementation does NOT expose the stored password.
pub struct SessionClient {
    client: reqwest::Client,
    endpoints: Endpoints,
    authenticated: AtomicBool,
    /// Set by the first login; reused for automatic re-login
    credentials: Mutex<Option<Credentials>>,
    /// Serializes runs of the login protocol
    login_lock: Mutex<()>,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("endpoints", &self.endpoints)
            .field("authenticated", &self.is_authenticated())
            .field("credentials", &"<REDACTED>")
            .finish()
    }
}

impl SessionClient {
    /// Create a session with an empty cookie jar
    ///
    /// # Parameters
    ///
    /// - `endpoints`: Portal URLs
    /// - `timeout`: Applied to every request
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent(concat!("loanwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            authenticated: AtomicBool::new(false),
            credentials: Mutex::new(None),
            login_lock: Mutex::new(()),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Run the login protocol
    ///
    /// The credentials are kept for automatic re-login.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Authenticated
    /// - `Err(Error::Auth(_))`: The protocol failed at one of its steps
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        *self.credentials.lock().await = Some(credentials.clone());

        let _guard = self.login_lock.lock().await;
        self.run_login(&credentials).await
    }

    /// Log in with the stored credentials unless already authenticated
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            return Ok(());
        }
        self.relogin().await
    }

    async fn relogin(&self) -> Result<()> {
        let _guard = self.login_lock.lock().await;
        // Another task may have finished logging in while we waited
        if self.is_authenticated() {
            return Ok(());
        }
        let credentials = self
            .credentials
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NotAuthenticated)?;
        self.run_login(&credentials).await
    }

    async fn run_login(&self, credentials: &Credentials) -> Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        let endpoints = &self.endpoints;

        // Step 1: protected start page
        let start_url = endpoints.login_start();
        let start = self.login_hop(Method::GET, &start_url, None).await?;
        if !start.is_redirect() {
            debug!("Session already authenticated");
            self.authenticated.store(true, Ordering::SeqCst);
            return Ok(());
        }

        // Step 2: protocol parameters from the redirect
        let authorize_url = self.redirect_target(&start)?;
        let params = LoginParams::from_redirect(&authorize_url)?;
        let form = params.form(credentials);

        // Step 3: authorization page (sets identity provider cookies)
        self.login_hop(Method::GET, &authorize_url, None).await?;

        // Step 4: credentials
        let submitted = self
            .login_hop(Method::POST, &endpoints.credentials(), Some(&form))
            .await?;
        match submitted.status {
            200 => {}
            303 => {
                // Step 5: follow the confirmation; a second redirect asks for the token exchange
                let confirm_url = self.redirect_target(&submitted)?;
                let confirmed = self.login_hop(Method::GET, &confirm_url, None).await?;
                if confirmed.is_redirect() {
                    debug!("Exchanging login token");
                    let exchanged = self
                        .login_hop(Method::POST, &endpoints.token_exchange(), Some(&form))
                        .await?;
                    self.follow_login_redirects(exchanged).await?;
                }
            }
            status => return Err(AuthError::CredentialsRejected(status).into()),
        }

        // Step 6: verification
        let verified = self
            .login_hop(Method::GET, &endpoints.verification(), None)
            .await?;
        if verified.status != 200 {
            return Err(AuthError::VerificationFailed(verified.status).into());
        }

        self.authenticated.store(true, Ordering::SeqCst);
        info!("Logged in to {}", endpoints.base());
        Ok(())
    }

    async fn follow_login_redirects(&self, mut response: PortalResponse) -> Result<PortalResponse> {
        for _ in 0..MAX_REDIRECT_HOPS {
            if !response.is_redirect() {
                return Ok(response);
            }
            let next = self.redirect_target(&response)?;
            response = self.login_hop(Method::GET, &next, None).await?;
        }
        Err(AuthError::MalformedRedirect(format!(
            "more than {} redirects after token exchange",
            MAX_REDIRECT_HOPS
        ))
        .into())
    }

    /// One request of the login protocol; transport failures become [`AuthError::Network`]
    async fn login_hop(
        &self,
        method: Method,
        url: &str,
        form: Option<&Vec<(String, String)>>,
    ) -> Result<PortalResponse> {
        self.send_once(method, url, form)
            .await
            .map_err(|e| AuthError::Network(e.to_string()).into())
    }

    fn redirect_target(&self, response: &PortalResponse) -> Result<String> {
        let location = response.location.as_deref().ok_or_else(|| {
            AuthError::MalformedRedirect(format!("{} redirected without Location", response.url))
        })?;
        self.endpoints
            .resolve(&response.url, location)
            .map_err(|e| AuthError::MalformedRedirect(e.to_string()).into())
    }

    /// Issue an authenticated request
    ///
    /// A response that looks logged out (401/403, or a redirect into the
    /// login flow) triggers exactly one re-login and replay.
    ///
    /// # Returns
    ///
    /// - `Ok(response)`: Any status; callers decide what is acceptable
    /// - `Err(Error::Session(_))`: No prior successful login
    /// - `Err(Error::Fetch(_))`: Transport failure or timeout
    pub async fn request(&self, method: Method, url: &str, options: &RequestOptions) -> Result<PortalResponse> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated.into());
        }

        let response = self.send(method.clone(), url, options).await?;
        if !self.looks_logged_out(&response) {
            return Ok(response);
        }

        warn!("Session expired while requesting {}, logging in again", url);
        self.authenticated.store(false, Ordering::SeqCst);
        self.relogin().await?;

        let replayed = self.send(method, url, options).await?;
        if self.looks_logged_out(&replayed) {
            return Err(Error::fetch(format!(
                "{} still requires login after re-authentication (status {})",
                url, replayed.status
            )));
        }
        Ok(replayed)
    }

    /// GET that follows redirects and requires a 2xx answer
    pub async fn get_text(&self, url: &str) -> Result<PortalResponse> {
        self.request(Method::GET, url, &RequestOptions::follow())
            .await?
            .require_success()
    }

    /// Whether a response means the session is no longer logged in
    pub fn looks_logged_out(&self, response: &PortalResponse) -> bool {
        matches!(response.status, 401 | 403)
            || (response.is_redirect()
                && response
                    .location
                    .as_deref()
                    .is_some_and(|location| self.endpoints.is_login_redirect(location)))
    }

    async fn send(&self, method: Method, url: &str, options: &RequestOptions) -> Result<PortalResponse> {
        let mut response = self.send_once(method, url, options.form.as_ref()).await?;
        if !options.follow_redirects {
            return Ok(response);
        }

        for _ in 0..MAX_REDIRECT_HOPS {
            if !response.is_redirect() || self.looks_logged_out(&response) {
                return Ok(response);
            }
            let Some(location) = response.location.as_deref() else {
                return Ok(response);
            };
            let next = self.endpoints.resolve(&response.url, location)?;
            response = self.send_once(Method::GET, &next, None).await?;
        }

        Err(Error::fetch(format!(
            "{}: more than {} redirects",
            url, MAX_REDIRECT_HOPS
        )))
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        form: Option<&Vec<(String, String)>>,
    ) -> Result<PortalResponse> {
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method.clone(), url);
        if let Some(fields) = form {
            builder = builder.form(fields);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::fetch(format!("{} {} timed out", method, url))
            } else {
                Error::fetch(format!("{} {} failed: {}", method, url, e))
            }
        })?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| Error::fetch(format!("Failed to read body of {}: {}", url, e)))?;

        Ok(PortalResponse {
            status,
            url: url.to_string(),
            location,
            body,
        })
    }
}
