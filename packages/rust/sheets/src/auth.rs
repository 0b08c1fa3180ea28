//! OAuth access tokens for the Sheets API.
//!
//! A service-account key signs a short-lived RS256 JWT which is exchanged at
//! the key's `token_uri` for a bearer token. Tokens are cached until shortly
//! before they expire.

use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use ring::signature::RsaKeyPair;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use jobsync_shared::{Result, SyncError};

/// Read/write access to spreadsheets.
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion, in seconds.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens are refreshed this many seconds before their reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Where the client gets its bearer token from.
pub enum Auth {
    /// A pre-issued token, used as-is.
    Static(String),
    /// A Google service account.
    ServiceAccount(ServiceAccountAuth),
}

impl Auth {
    /// A bearer token valid for at least the next minute.
    pub async fn access_token(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(sa) => sa.access_token().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Service account
// ---------------------------------------------------------------------------

/// The fields of a service-account JSON key that token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

/// Service-account token source with an in-memory cache.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    key_pair: RsaKeyPair,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Parse a service-account JSON key and load its private key.
    pub fn from_json(json: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| SyncError::Auth(format!("invalid service account key: {e}")))?;
        Self::new(key)
    }

    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let key_pair = load_key_pair(&key.private_key)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        info!(client_email = %key.client_email, "loaded service account");

        Ok(Self {
            key,
            key_pair,
            client,
            cached: Mutex::new(None),
        })
    }

    /// A cached token, or a freshly exchanged one once the cache is stale.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if now < token.refresh_at {
                return Ok(token.token.clone());
            }
        }

        let response = self.exchange(now).await?;
        let lifetime = TimeDelta::seconds(response.expires_in.max(0));
        let token = CachedToken {
            token: response.access_token,
            refresh_at: now + lifetime - TimeDelta::seconds(EXPIRY_MARGIN_SECS),
        };
        debug!(refresh_at = %token.refresh_at, "obtained access token");

        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<TokenResponse> {
        let assertion = self.sign_assertion(now)?;
        let params = [("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())];

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("token exchange failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(format!("token exchange body read failed: {e}")))?;

        if !status.is_success() {
            return Err(SyncError::Auth(format!(
                "token exchange rejected (HTTP {status}): {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| SyncError::Auth(format!("invalid token response: {e}")))
    }

    /// Build and sign the JWT bearer assertion.
    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.key.private_key_id.as_deref(),
        };
        let claims = JwtClaims {
            iss: &self.key.client_email,
            scope: SPREADSHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let header_json = serde_json::to_string(&header)
            .map_err(|e| SyncError::Auth(format!("failed to encode jwt header: {e}")))?;
        let claims_json = serde_json::to_string(&claims)
            .map_err(|e| SyncError::Auth(format!("failed to encode jwt claims: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(header_json),
            BASE64_URL_SAFE_NO_PAD.encode(claims_json)
        );

        let mut signature = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &ring::signature::RSA_PKCS1_SHA256,
                &ring::rand::SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|_| SyncError::Auth("failed to sign jwt".into()))?;

        Ok(format!(
            "{signing_input}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(&signature)
        ))
    }
}

/// Decode a PEM private key (PKCS#8 or PKCS#1) into an RSA key pair.
fn load_key_pair(pem: &str) -> Result<RsaKeyPair> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let item = rustls_pemfile::read_one(&mut reader)
        .map_err(|e| SyncError::Auth(format!("invalid PEM private key: {e}")))?;

    match item {
        Some(rustls_pemfile::Item::Pkcs8Key(der)) => RsaKeyPair::from_pkcs8(der.secret_pkcs8_der())
            .map_err(|e| SyncError::Auth(format!("rejected pkcs8 key: {e}"))),
        Some(rustls_pemfile::Item::Pkcs1Key(der)) => RsaKeyPair::from_der(der.secret_pkcs1_der())
            .map_err(|e| SyncError::Auth(format!("rejected pkcs1 key: {e}"))),
        _ => Err(SyncError::Auth("no RSA private key found in PEM".into())),
    }
}
