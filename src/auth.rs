//! OAuth2 sign-in against the Microsoft identity platform.
//!
//! Two flows are supported:
//! - [`AuthFlow::AuthorizationCode`]: confidential client. The user signs in
//!   in a browser and pastes the authorization code back into the terminal.
//! - [`AuthFlow::Interactive`]: public client with PKCE. A one-shot loopback
//!   listener receives the redirect directly.
//!
//! Browser and console access go through [`UserInteraction`] so the flows can
//! be driven by canned responses in tests.

use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use url::Url;

use crate::config::{Credentials, Endpoints, Timeouts};
use crate::error::{DriveError, Result};
use crate::models::TokenResponse;
use crate::url_parser::{parse_pasted_redirect, redirect_from_query};

/// Redirect URI registered for the authorization-code flow.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/redirect";

/// Loopback port used by the interactive flow.
pub const DEFAULT_LOOPBACK_PORT: u16 = 8400;

/// Bearer token for one run. Never cached or refreshed.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// How to obtain the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthFlow {
    #[default]
    AuthorizationCode,
    Interactive,
}

/// What the loopback listener received from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRedirect {
    pub code: String,
    pub state: Option<String>,
}

/// Side-effecting user interaction needed by the sign-in flows.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Show the authorization URL and return the code the user pastes back.
    async fn prompt_for_code(&self, authorize_url: &Url) -> Result<String>;

    /// Show the authorization URL and wait for the redirect on `port`.
    async fn await_redirect(&self, authorize_url: &Url, port: u16) -> Result<AuthRedirect>;
}

/// PKCE (Proof Key for Code Exchange) verifier and CSRF state.
#[derive(Debug, Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// 32-byte verifier and 16-byte state, both base64url without padding.
    pub fn new() -> Self {
        Self {
            verifier: random_token(32),
            state: random_token(16),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 challenge: BASE64URL(SHA256(code_verifier)).
    pub fn challenge(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Obtains bearer tokens for the configured app registration.
pub struct TokenProvider {
    credentials: Credentials,
    endpoints: Endpoints,
    timeouts: Timeouts,
    redirect_uri: String,
    loopback_port: u16,
    interaction: Box<dyn UserInteraction>,
    http: Client,
}

impl TokenProvider {
    pub fn new(credentials: Credentials, interaction: impl UserInteraction + 'static) -> Self {
        Self {
            credentials,
            endpoints: Endpoints::default(),
            timeouts: Timeouts::default(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            loopback_port: DEFAULT_LOOPBACK_PORT,
            interaction: Box::new(interaction),
            http: Client::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_loopback_port(mut self, port: u16) -> Self {
        self.loopback_port = port;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Obtain a fresh token. An empty `scopes` slice requests the configured scopes.
    pub async fn acquire_token(&self, flow: AuthFlow, scopes: &[String]) -> Result<AccessToken> {
        let scopes = if scopes.is_empty() {
            self.credentials.scopes()
        } else {
            scopes.to_vec()
        };

        match flow {
            AuthFlow::AuthorizationCode => self.authorization_code_flow(&scopes).await,
            AuthFlow::Interactive => self.interactive_flow(&scopes).await,
        }
    }

    /// Build the URL the user visits to sign in.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
        pkce: Option<&PkceVerifier>,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.endpoints.authorize_url(self.credentials.tenant_id()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", self.credentials.client_id());
            query.append_pair("response_type", "code");
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("response_mode", "query");
            query.append_pair("scope", &scopes.join(" "));
            query.append_pair("state", state);
            if let Some(pkce) = pkce {
                query.append_pair("code_challenge", &pkce.challenge());
                query.append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    async fn authorization_code_flow(&self, scopes: &[String]) -> Result<AccessToken> {
        let state = random_token(16);
        let url = self.authorization_url(scopes, &self.redirect_uri, &state, None)?;
        debug!("Authorization URL: {}", url);

        let pasted = self
            .with_login_timeout(self.interaction.prompt_for_code(&url))
            .await?;
        let pasted = parse_pasted_redirect(&pasted)?;

        // A bare code carries no state; a pasted redirect URL must echo ours.
        if let Some(returned) = pasted.state.as_deref() {
            if returned != state {
                warn!("OAuth state mismatch in pasted redirect");
                return Err(DriveError::AuthError(
                    "state returned by the identity provider does not match".to_string(),
                ));
            }
        }

        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", self.credentials.client_id().to_string()),
            ("code", pasted.code),
            ("redirect_uri", self.redirect_uri.clone()),
            ("scope", scopes.join(" ")),
        ];
        match self.credentials.client_secret() {
            Some(secret) => params.push(("client_secret", secret.to_string())),
            None => warn!("No client secret configured; exchanging code as a public client"),
        }

        self.exchange(&params).await
    }

    async fn interactive_flow(&self, scopes: &[String]) -> Result<AccessToken> {
        let pkce = PkceVerifier::new();
        let redirect_uri = format!("http://127.0.0.1:{}", self.loopback_port);
        let url = self.authorization_url(scopes, &redirect_uri, pkce.state(), Some(&pkce))?;
        debug!("Authorization URL: {}", url);

        let redirect = self
            .with_login_timeout(self.interaction.await_redirect(&url, self.loopback_port))
            .await?;

        if redirect.state.as_deref() != Some(pkce.state()) {
            warn!("OAuth state mismatch in sign-in redirect");
            return Err(DriveError::AuthError(
                "state returned by the identity provider does not match".to_string(),
            ));
        }

        let params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", self.credentials.client_id().to_string()),
            ("code", redirect.code),
            ("redirect_uri", redirect_uri),
            ("scope", scopes.join(" ")),
            ("code_verifier", pkce.verifier().to_string()),
        ];

        self.exchange(&params).await
    }

    async fn with_login_timeout<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeouts.login, fut)
            .await
            .map_err(|_| {
                DriveError::Timeout(format!(
                    "no sign-in completed within {}s",
                    self.timeouts.login.as_secs()
                ))
            })?
    }

    /// POST to the token endpoint and validate the response.
    async fn exchange(&self, params: &[(&str, String)]) -> Result<AccessToken> {
        let token_url = self.endpoints.token_url(self.credentials.tenant_id());
        debug!("Exchanging authorization code at {}", token_url);

        let response = self
            .http
            .post(&token_url)
            .timeout(self.timeouts.http)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DriveError::Timeout(format!("POST {}", token_url))
                } else {
                    DriveError::HttpError(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let token: TokenResponse = match serde_json::from_str(&body) {
            Ok(token) => token,
            Err(_) if !status.is_success() => {
                return Err(DriveError::AuthError(format!(
                    "token endpoint returned {}: {}",
                    status, body
                )));
            }
            Err(e) => {
                return Err(DriveError::AuthError(format!(
                    "unreadable token response: {}",
                    e
                )));
            }
        };

        if let Some(error) = token.error {
            let description = token.error_description.unwrap_or_default();
            return Err(DriveError::AuthError(format!("{}: {}", error, description)));
        }

        if !status.is_success() {
            return Err(DriveError::AuthError(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let secret = token
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                DriveError::AuthError("token response did not contain an access token".to_string())
            })?;

        let expires_at = token.expires_in.and_then(expiry_after);

        info!(
            "Acquired access token (expires in {}s)",
            token
                .expires_in
                .map(|s| s.to_string())
                .unwrap_or_else(|| "?".to_string())
        );

        Ok(AccessToken::new(secret, expires_at))
    }
}

/// `now + secs`, or `None` when the lifetime does not fit a timestamp.
fn expiry_after(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    let lifetime = chrono::TimeDelta::try_seconds(secs)?;
    Utc::now().checked_add_signed(lifetime)
}

/// Read one line on a plain thread. Dropping the receiver abandons the read
/// without holding up runtime shutdown, unlike `tokio::io::stdin`.
fn read_line_detached<R>(mut reader: R) -> oneshot::Receiver<std::io::Result<String>>
where
    R: std::io::BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let result = reader.read_line(&mut line).map(|_| line);
        let _ = tx.send(result);
    });
    rx
}

/// Terminal and browser based [`UserInteraction`].
#[derive(Debug, Clone)]
pub struct ConsoleInteraction {
    open_browser: bool,
}

impl ConsoleInteraction {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }

    fn show(&self, url: &Url) {
        if self.open_browser {
            match open::that_detached(url.as_str()) {
                Ok(()) => eprintln!("Opening the sign-in page in your browser..."),
                Err(e) => warn!("Could not open a browser: {}", e),
            }
        }
        eprintln!("If no browser opened, visit this URL to sign in:\n{}\n", url);
    }
}

impl Default for ConsoleInteraction {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl UserInteraction for ConsoleInteraction {
    async fn prompt_for_code(&self, authorize_url: &Url) -> Result<String> {
        self.show(authorize_url);
        eprint!("Paste the authorization code (or the full redirect URL): ");
        std::io::stderr().flush()?;

        let line = read_line_detached(std::io::BufReader::new(std::io::stdin()))
            .await
            .map_err(|_| DriveError::AuthError("terminal input closed".to_string()))??;
        Ok(line.trim().to_string())
    }

    async fn await_redirect(&self, authorize_url: &Url, port: u16) -> Result<AuthRedirect> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        self.show(authorize_url);

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Loopback connection from {}", peer);
            if let Some(redirect) = read_redirect(stream).await? {
                return Ok(redirect);
            }
        }
    }
}

/// Handle one loopback request. Requests without `code`/`error` (favicon and
/// the like) get a 404 and yield `None`.
async fn read_redirect(mut stream: TcpStream) -> Result<Option<AuthRedirect>> {
    let mut request_line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        reader.read_line(&mut request_line).await?;

        // Drain the headers so the reply is not cut off by unread input.
        let mut header = String::new();
        loop {
            header.clear();
            let read = reader.read_line(&mut header).await?;
            if read == 0 || header.trim_end().is_empty() {
                break;
            }
        }
    }

    let target = match request_line.split_whitespace().nth(1) {
        Some(target) => target.to_string(),
        None => return Ok(None),
    };
    let url = Url::parse(&format!("http://localhost{}", target))?;

    let is_callback = url
        .query_pairs()
        .any(|(key, _)| key == "code" || key == "error");
    if !is_callback {
        respond(&mut stream, "404 Not Found", "").await?;
        return Ok(None);
    }

    let outcome = redirect_from_query(&url);
    let message = if outcome.is_ok() {
        "Sign-in complete. You can close this window and return to the terminal."
    } else {
        "Sign-in failed. Return to the terminal for details."
    };
    respond(&mut stream, "200 OK", message).await?;

    Ok(Some(outcome?))
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
