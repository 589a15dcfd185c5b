//! YouTube OAuth credential handling.
//!
//! The bot posts chat messages with an authorized-user OAuth credential
//! that lives in a small JSON file (`youtube_token.json` in the
//! workspace). This module owns the store, the expiry check, and the
//! refresh-or-absent contract the run loop depends on: `get_credential`
//! never propagates an error; every failure collapses into a typed
//! `RelayError::Auth` carrying the cause.

use crate::error::RelayError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Google OAuth 2.0 token endpoint.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh when the token expires within this window (seconds).
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Initial-deploy seed: written to the store on first boot when set.
const TOKEN_SEED_ENV: &str = "LIVERELAY_YOUTUBE_TOKEN_JSON";

// ── Credential ──────────────────────────────────────────────────────

/// A refreshable OAuth credential in the authorized-user layout: the
/// client id/secret travel with the token so refresh needs no extra
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as RFC3339 string (e.g. "2025-12-31T23:59:59Z").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl Credential {
    /// True when the expiry timestamp is inside the buffer window or
    /// unparseable. A credential without an expiry is treated as valid.
    pub fn is_expired(&self, buffer_secs: i64) -> bool {
        match self.expiry.as_deref() {
            Some(expiry) => is_timestamp_expired(expiry, buffer_secs),
            None => false,
        }
    }
}

/// Check if an RFC3339 timestamp has passed (with buffer seconds).
pub fn is_timestamp_expired(expiry: &str, buffer_secs: i64) -> bool {
    if let Ok(expiry_time) = chrono::DateTime::parse_from_rfc3339(expiry) {
        let now = chrono::Utc::now();
        let buffer = chrono::Duration::seconds(buffer_secs);
        expiry_time < now + buffer
    } else {
        // Unparseable expiry: assume expired for safety
        true
    }
}

// ── Token store ─────────────────────────────────────────────────────

/// Narrow persistence contract for the credential. The core never sees
/// the backing layout.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// JSON-file store with owner-only permissions.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read credentials from {}", self.path.display()))?;
        let credential = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse credentials from {}", self.path.display()))?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)?;
        write_file_secure(&self.path, &json)
    }
}

/// Write content to a file with owner-only permissions (0o600 on Unix).
fn write_file_secure(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(content.as_bytes())
            .context("failed to write credential file")?;
        std::fs::set_permissions(path, Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}

/// Initial-deploy bootstrap: seed the token store from the environment
/// when the file does not exist yet. Never overwrites an existing file.
pub fn seed_token_from_env(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let Ok(raw) = std::env::var(TOKEN_SEED_ENV) else {
        return Ok(());
    };
    if raw.trim().is_empty() {
        return Ok(());
    }
    // Validate before writing so a malformed env var fails loudly at boot.
    let credential: Credential = serde_json::from_str(&raw)
        .with_context(|| format!("{TOKEN_SEED_ENV} does not contain a valid credential JSON"))?;
    FileTokenStore::new(path).save(&credential)?;
    tracing::info!("seeded YouTube credential from {TOKEN_SEED_ENV}");
    Ok(())
}

// ── Credential acquisition ──────────────────────────────────────────

/// The run loop's view of authentication: a valid credential, or a typed
/// absence with the cause. Implementations must not propagate raw errors.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_credential(&self) -> Result<Credential, RelayError>;
}

/// Reads the last-persisted credential, refreshing and re-persisting it
/// when expired-but-refreshable.
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    token_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self::with_token_url(store, None)
    }

    /// Defaults to the Google token endpoint when `token_url` is `None`.
    pub fn with_token_url(store: Arc<dyn TokenStore>, token_url: Option<&str>) -> Self {
        Self {
            store,
            token_url: token_url.unwrap_or(TOKEN_URL).to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, RelayError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| RelayError::Auth("token expired and no refresh token stored".into()))?;
        let client_id = credential
            .client_id
            .as_deref()
            .ok_or_else(|| RelayError::Auth("stored credential has no client_id".into()))?;
        let client_secret = credential
            .client_secret
            .as_deref()
            .ok_or_else(|| RelayError::Auth("stored credential has no client_secret".into()))?;

        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("token refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Auth(format!(
                "token refresh rejected ({status}): {body}"
            )));
        }

        let parsed: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("token refresh response unreadable: {e}")))?;

        let expiry = parsed.expires_in.map(|secs| {
            (chrono::Utc::now() + chrono::Duration::seconds(secs as i64)).to_rfc3339()
        });

        let mut refreshed = credential.clone();
        refreshed.access_token = parsed.access_token;
        refreshed.expiry = expiry;

        // The refreshed token is valid either way; a failed persist only
        // costs another refresh next run.
        if let Err(e) = self.store.save(&refreshed) {
            tracing::warn!("failed to persist refreshed credential: {e}");
        }

        Ok(refreshed)
    }
}

#[async_trait]
impl CredentialSource for CredentialManager {
    async fn get_credential(&self) -> Result<Credential, RelayError> {
        let stored = self
            .store
            .load()
            .map_err(|e| RelayError::Auth(format!("token store unreadable: {e}")))?;

        let Some(credential) = stored else {
            return Err(RelayError::Auth(
                "no stored credential — complete the OAuth flow and seed the token store".into(),
            ));
        };

        if !credential.is_expired(EXPIRY_BUFFER_SECS) {
            return Ok(credential);
        }

        tracing::debug!("stored credential expired — attempting refresh");
        self.refresh(&credential).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
