//! Long-lived stream credentials.

use crate::{AuthError, AuthResult};

/// Tenant id sent to the auth endpoint when running in multi-tenant mode.
pub const WILDCARD_TENANT: &str = "*";

const AUTHORIZATION_TOKEN_ENV: &str = "STREAM_AUTHORIZATION_TOKEN";
const SECRET_ENV: &str = "STREAM_SECRET";

/// Credentials used to open a stream session.
///
/// A `tenant_id` of `None` selects multi-tenant mode: every operation must
/// then name its own tenant.
#[derive(Clone)]
pub struct Credentials {
    pub authorization_token: String,
    pub secret: String,
    pub tenant_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authorization_token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl Credentials {
    pub fn new(
        authorization_token: impl Into<String>,
        secret: impl Into<String>,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            authorization_token: authorization_token.into(),
            secret: secret.into(),
            tenant_id: tenant_id.filter(|t| !t.trim().is_empty() && t != WILDCARD_TENANT),
        }
    }

    /// Build credentials, reading any missing token or secret from the
    /// environment, and validate them.
    pub fn resolve(
        authorization_token: Option<String>,
        secret: Option<String>,
        tenant_id: Option<String>,
    ) -> AuthResult<Self> {
        let authorization_token = authorization_token
            .or_else(|| std::env::var(AUTHORIZATION_TOKEN_ENV).ok())
            .unwrap_or_default();
        let secret = secret
            .or_else(|| std::env::var(SECRET_ENV).ok())
            .unwrap_or_default();

        let credentials = Self::new(authorization_token, secret, tenant_id);
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.authorization_token.trim().is_empty() {
            return Err(AuthError::Config("authorization token is required".into()));
        }
        if self.secret.trim().is_empty() {
            return Err(AuthError::Config("secret is required".into()));
        }
        Ok(())
    }

    pub fn is_multi_tenant(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// Tenant sent on `/stream/auth`.
    pub fn auth_tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(WILDCARD_TENANT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_tenant_means_multi_tenant() {
        let creds = Credentials::new("token", "secret", Some("*".into()));
        assert!(creds.is_multi_tenant());
        assert_eq!(creds.auth_tenant(), WILDCARD_TENANT);

        let creds = Credentials::new("token", "secret", Some("03992843467".into()));
        assert!(!creds.is_multi_tenant());
        assert_eq!(creds.auth_tenant(), "03992843467");
    }

    #[test]
    fn validate_requires_token_and_secret() {
        let creds = Credentials::new("", "secret", None);
        assert!(matches!(creds.validate(), Err(AuthError::Config(_))));

        let creds = Credentials::new("token", "  ", None);
        assert!(matches!(creds.validate(), Err(AuthError::Config(_))));

        assert!(Credentials::new("token", "secret", None).validate().is_ok());
    }

    #[test]
    fn resolve_prefers_explicit_values() {
        let creds = Credentials::resolve(
            Some("explicit-token".into()),
            Some("explicit-secret".into()),
            None,
        )
        .unwrap();
        assert_eq!(creds.authorization_token, "explicit-token");
        assert_eq!(creds.secret, "explicit-secret");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("token-value", "secret-value", None);
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("token-value"));
        assert!(!debug.contains("secret-value"));
    }
}
