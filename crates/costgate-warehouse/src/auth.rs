//! Credential providers for the BigQuery REST API.
//!
//! Two modes, mirroring [`AuthMode`]:
//!
//! - **Ambient**: `GOOGLE_OAUTH_ACCESS_TOKEN`, then the application default
//!   credentials file (`GOOGLE_APPLICATION_CREDENTIALS` or gcloud's well-known
//!   location), then `gcloud auth print-access-token`.
//! - **Service account**: an explicit key file; a self-signed RS256 assertion
//!   is exchanged for an access token at the key's `token_uri`.
//!
//! Tokens are cached until 60 seconds before they expire.

use crate::api::TokenResponse;
use async_trait::async_trait;
use costgate_core::{AuthMode, CoreError, CoreResult, WarehouseError};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// OAuth scope requested for every token.
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const GCLOUD_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Supplies bearer tokens for warehouse requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, WarehouseError>;

    /// Project implied by the credentials, if any.
    fn project_id(&self) -> Option<String> {
        None
    }
}

/// Build the provider for the configured credential mode.
pub fn token_provider(auth: &AuthMode) -> CoreResult<Arc<dyn TokenProvider>> {
    match auth {
        AuthMode::ServiceAccount { path } => {
            info!(path = %path.display(), "using service account credentials");
            Ok(Arc::new(ServiceAccountToken::from_file(path)?))
        }
        AuthMode::Ambient => ambient_provider(),
    }
}

fn ambient_provider() -> CoreResult<Arc<dyn TokenProvider>> {
    if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
        if !token.trim().is_empty() {
            info!("using access token from GOOGLE_OAUTH_ACCESS_TOKEN");
            return Ok(Arc::new(StaticToken::new(token.trim())));
        }
    }

    if let Some(path) = default_credentials_path() {
        info!(path = %path.display(), "using application default credentials");
        return credentials_from_file(&path);
    }

    info!("falling back to gcloud CLI credentials");
    Ok(Arc::new(GcloudCliToken::default()))
}

fn default_credentials_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
        return Some(PathBuf::from(path));
    }

    let config_dir = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
    }?;

    let path = config_dir
        .join("gcloud")
        .join("application_default_credentials.json");
    path.is_file().then_some(path)
}

#[derive(Deserialize)]
struct CredentialsKind {
    #[serde(rename = "type")]
    kind: String,
}

/// Dispatch on the `type` field of a Google credentials JSON file.
pub fn credentials_from_file(path: &Path) -> CoreResult<Arc<dyn TokenProvider>> {
    let text = read_credentials(path)?;
    let kind: CredentialsKind = serde_json::from_str(&text)?;
    match kind.kind.as_str() {
        "service_account" => Ok(Arc::new(ServiceAccountToken::new(serde_json::from_str(
            &text,
        )?))),
        "authorized_user" => Ok(Arc::new(AuthorizedUserToken::new(serde_json::from_str(
            &text,
        )?))),
        other => Err(CoreError::validation(format!(
            "unsupported credentials type `{other}` in {}",
            path.display()
        ))),
    }
}

fn read_credentials(path: &Path) -> CoreResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CoreError::validation(format!(
            "cannot read credentials file {}: {e}",
            path.display()
        ))
    })
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    /// Check if token is expired (with 60s buffer).
    fn is_expired(&self) -> bool {
        Instant::now() + Duration::from_secs(60) >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct TokenCache(Mutex<Option<CachedToken>>);

impl TokenCache {
    fn current(&self) -> Option<String> {
        self.0
            .lock()
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone())
    }

    fn store(&self, access_token: String, lifetime: Duration) -> String {
        *self.0.lock() = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        access_token
    }
}

async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, WarehouseError> {
    let resp = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| WarehouseError::Transport(format!("token request failed: {e}")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(WarehouseError::Unauthorized(format!(
            "token request failed: {status} - {body}"
        )));
    }

    resp.json::<TokenResponse>()
        .await
        .map_err(|e| WarehouseError::Decode(format!("invalid token response: {e}")))
}

/// A fixed bearer token.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        Ok(self.token.clone())
    }
}

/// Fields of a service account key file that the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Service account credentials via the JWT-bearer grant.
pub struct ServiceAccountToken {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cache: TokenCache,
}

impl ServiceAccountToken {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            http: reqwest::Client::new(),
            cache: TokenCache::default(),
        }
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let key: ServiceAccountKey = serde_json::from_str(&read_credentials(path)?)?;
        Ok(Self::new(key))
    }

    fn assertion(&self) -> Result<String, WarehouseError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| WarehouseError::Unauthorized(e.to_string()))?
            .as_secs();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| WarehouseError::Unauthorized(format!("invalid private key: {e}")))?;

        encode(&header, &claims, &encoding_key)
            .map_err(|e| WarehouseError::Unauthorized(format!("cannot sign assertion: {e}")))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountToken {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        if let Some(token) = self.cache.current() {
            return Ok(token);
        }

        debug!(account = %self.key.client_email, "exchanging service account assertion");
        let assertion = self.assertion()?;
        let response = request_token(
            &self.http,
            &self.key.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
        )
        .await?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        Ok(self.cache.store(response.access_token, lifetime))
    }

    fn project_id(&self) -> Option<String> {
        self.key.project_id.clone()
    }
}

/// User credentials written by `gcloud auth application-default login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
}

/// Refresh-token grant for application default user credentials.
pub struct AuthorizedUserToken {
    key: AuthorizedUserKey,
    http: reqwest::Client,
    cache: TokenCache,
}

impl AuthorizedUserToken {
    pub fn new(key: AuthorizedUserKey) -> Self {
        Self {
            key,
            http: reqwest::Client::new(),
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenProvider for AuthorizedUserToken {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        if let Some(token) = self.cache.current() {
            return Ok(token);
        }

        debug!("refreshing application default user token");
        let response = request_token(
            &self.http,
            &self.key.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", self.key.client_id.as_str()),
                ("client_secret", self.key.client_secret.as_str()),
                ("refresh_token", self.key.refresh_token.as_str()),
            ],
        )
        .await?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        Ok(self.cache.store(response.access_token, lifetime))
    }

    fn project_id(&self) -> Option<String> {
        self.key.quota_project_id.clone()
    }
}

/// Asks the gcloud CLI for a token.
#[derive(Debug, Default)]
pub struct GcloudCliToken {
    cache: TokenCache,
}

#[async_trait]
impl TokenProvider for GcloudCliToken {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        if let Some(token) = self.cache.current() {
            return Ok(token);
        }

        let output = tokio::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| {
                WarehouseError::Unauthorized(format!(
                    "no ambient credentials found and gcloud is unavailable: {e}"
                ))
            })?;

        if !output.status.success() {
            return Err(WarehouseError::Unauthorized(format!(
                "gcloud auth print-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(WarehouseError::Unauthorized(
                "gcloud returned an empty access token".to_string(),
            ));
        }
        Ok(self.cache.store(token, GCLOUD_TOKEN_LIFETIME))
    }
}
