use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ServiceAccountKey;
use crate::error::StoreError;
use crate::util::http;

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
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

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// OAuth2 access tokens for a Google service account, cached until
/// shortly before expiry.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            cached: Mutex::new(None),
        }
    }

    /// A valid bearer token, exchanging a fresh JWT when needed.
    pub async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion(now)?;
        let resp = http::client()
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange failed ({status}): {text}")));
        }

        let token: TokenResponse = resp.json().await?;
        debug!("Obtained access token for {}", self.key.client_email);
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(value)
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let claims = self.claims(now);
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid private key: {e}")))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| StoreError::Auth(format!("failed to sign assertion: {e}")))
    }

    fn claims(&self, now: DateTime<Utc>) -> Claims<'_> {
        let iat = now.timestamp();
        Claims {
            iss: &self.key.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + 3600,
        }
    }
}
