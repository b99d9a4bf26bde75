//! Access/refresh token session.

use crate::{AuthError, AuthResult, Credentials, HttpRequest, HttpResponse, HttpTransport};
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info, warn};

const AUTH_PATH: &str = "/stream/auth";
const REFRESH_PATH: &str = "/stream/auth/refresh";

/// Status the ingestion API uses for an expired access token.
const STATUS_FORBIDDEN: u16 = 403;

/// Short-lived access token and the token that renews it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signing key sent on `/stream/auth`: base64 of SHA-1 over
/// `secret || tenant || unix_timestamp`.
pub fn compute_key(secret: &str, tenant_id: &str, timestamp: i64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(secret.as_bytes());
    hasher.update(tenant_id.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Tenant-scoped streaming session.
///
/// Authenticates lazily on the first request. A 403 triggers exactly one
/// refresh and one replay of the same request; a second 403 is fatal.
///
/// Concurrent requests that all hit 403 each refresh on their own, there is
/// no single-flight deduplication.
pub struct AuthSession {
    transport: Arc<dyn HttpTransport>,
    credentials: Credentials,
    tokens: Mutex<Option<TokenPair>>,
}

impl AuthSession {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            tokens: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current token pair, if authenticated.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.tokens.lock().clone()
    }

    /// Drop the token pair; the next request authenticates again.
    pub fn clear(&self) {
        *self.tokens.lock() = None;
    }

    /// Exchange the long-lived credentials for a fresh token pair.
    pub async fn authenticate(&self) -> AuthResult<TokenPair> {
        let timestamp = chrono::Utc::now().timestamp();
        let tenant_id = self.credentials.auth_tenant();
        let body = json!({
            "tenantId": tenant_id,
            "key": compute_key(&self.credentials.secret, tenant_id, timestamp),
            "timestamp": timestamp,
        });

        let request = HttpRequest::post(AUTH_PATH, body)
            .with_authorization(self.credentials.authorization_token.clone());
        let response = self.transport.execute(&request).await?;

        match response.status {
            200 => {
                let tokens: TokenPair = serde_json::from_value(response.body)?;
                *self.tokens.lock() = Some(tokens.clone());
                info!(tenant_id = %tenant_id, "Stream session authenticated");
                Ok(tokens)
            }
            401 | 403 => Err(AuthError::InvalidCredentials),
            status => Err(AuthError::Rejected {
                status,
                message: response.message(),
            }),
        }
    }

    /// Renew the token pair with the refresh token.
    ///
    /// Falls back to a full authentication when no refresh token is held.
    pub async fn refresh(&self) -> AuthResult<TokenPair> {
        let refresh_token = self.tokens.lock().as_ref().map(|t| t.refresh_token.clone());
        let Some(refresh_token) = refresh_token else {
            return self.authenticate().await;
        };

        let request = HttpRequest::get(REFRESH_PATH).with_authorization(refresh_token);
        let response = self.transport.execute(&request).await?;

        if !response.is_ok() {
            return Err(AuthError::Refresh {
                status: response.status,
                message: response.message(),
            });
        }

        let tokens: TokenPair = serde_json::from_value(response.body)?;
        *self.tokens.lock() = Some(tokens.clone());
        debug!("Stream tokens refreshed");
        Ok(tokens)
    }

    /// Send `request` bearing the access token.
    ///
    /// Any status other than 403 is returned to the caller as-is.
    pub async fn request(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let access_token = self.tokens.lock().as_ref().map(|t| t.access_token.clone());
        let access_token = match access_token {
            Some(token) => token,
            None => self.authenticate().await?.access_token,
        };

        let response = self
            .transport
            .execute(&request.clone().with_authorization(access_token))
            .await?;
        if response.status != STATUS_FORBIDDEN {
            return Ok(response);
        }

        warn!(path = %request.path, "Access token rejected, refreshing once");
        let tokens = self.refresh().await?;

        let path = request.path.clone();
        let replay = self
            .transport
            .execute(&request.with_authorization(tokens.access_token))
            .await?;
        if replay.status == STATUS_FORBIDDEN {
            return Err(AuthError::Forbidden(path));
        }
        Ok(replay)
    }
}
