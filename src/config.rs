//! Credentials, endpoints and timeouts.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::{DriveError, Result};

/// Microsoft identity platform host.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Microsoft Graph v1.0 base URL.
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Tenant used when none is configured; accepts work and personal accounts.
pub const DEFAULT_TENANT: &str = "common";

pub const DEFAULT_SCOPES: &[&str] = &["Files.Read.All", "User.Read"];

/// App registration details used to sign in. Immutable once built.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: Option<String>,
    tenant_id: String,
    scopes: BTreeSet<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            tenant_id: tenant_id.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.client_secret = if secret.is_empty() { None } else { Some(secret) };
        self
    }

    /// Replace the requested scopes. An empty list keeps the defaults.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: BTreeSet<String> = scopes
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    /// Build credentials from a key lookup.
    ///
    /// Reads `APPLICATION_ID` (or `CLIENT_ID`), `CLIENT_SECRET`, `TENANT_ID`
    /// and `SCOPES`; only the client ID is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = non_empty("APPLICATION_ID")
            .or_else(|| non_empty("CLIENT_ID"))
            .ok_or_else(|| DriveError::MissingEnvVar("APPLICATION_ID".to_string()))?;
        let tenant_id = non_empty("TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT.to_string());

        let mut credentials = Self::new(client_id, tenant_id);
        if let Some(secret) = non_empty("CLIENT_SECRET") {
            credentials = credentials.with_secret(secret);
        }
        if let Some(scopes) = non_empty("SCOPES") {
            credentials = credentials.with_scopes(split_scopes(&scopes));
        }
        Ok(credentials)
    }

    /// Build credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build credentials from a dotenv file without touching the process environment.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut vars = HashMap::new();
        for entry in dotenvy::from_path_iter(path.as_ref())? {
            let (key, value) = entry?;
            vars.insert(key, value);
        }
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scopes.iter().cloned().collect()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Split a `SCOPES` value on commas and whitespace.
pub fn split_scopes(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Base URLs of the identity provider and the Graph API.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authority: String,
    pub graph: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.to_string(),
            graph: DEFAULT_GRAPH_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// Point both the identity provider and Graph at one host (mock servers).
    pub fn single_host(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            authority: base.clone(),
            graph: base,
        }
    }

    pub fn authorize_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority.trim_end_matches('/'),
            tenant_id
        )
    }

    pub fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            tenant_id
        )
    }
}

/// Limits applied to each HTTP call and to the browser sign-in wait.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub http: Duration,
    pub login: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http: Duration::from_secs(30),
            login: Duration::from_secs(300),
        }
    }
}
