//! Azure storage credentials.

use std::fmt;
use std::sync::Arc;

use super::{AmbientEnvironment, CredentialProvider, DetectionError, StorageOptions};

/// OAuth scope for Azure Storage bearer tokens.
pub const AZURE_STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Source of Azure AD bearer tokens.
///
/// `DefaultAzureTokenSource` implements the default-credential chain;
/// embedders may plug in whatever token acquisition they already use.
pub trait AzureTokenSource: Send + Sync {
    /// Acquires a token for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::TokenSource`] when no token can be acquired.
    fn token(&self, scope: &str) -> Result<String, DetectionError>;
}

/// Detects Azure credentials.
///
/// Tried in order: a pre-acquired `AZURE_STORAGE_TOKEN`, the configured
/// [`AzureTokenSource`], an account key, a service principal.
#[derive(Clone, Default)]
pub struct AzureCredentialProvider {
    token_source: Option<Arc<dyn AzureTokenSource>>,
}

impl fmt::Debug for AzureCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentialProvider")
            .field("token_source", &self.token_source.is_some())
            .finish()
    }
}

impl AzureCredentialProvider {
    /// Provider that asks `source` for a bearer token.
    #[must_use]
    pub fn with_token_source(source: Arc<dyn AzureTokenSource>) -> Self {
        Self {
            token_source: Some(source),
        }
    }
}

impl CredentialProvider for AzureCredentialProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn detect(&self, env: &dyn AmbientEnvironment) -> Result<StorageOptions, DetectionError> {
        let mut options = StorageOptions::new();
        if let Some(account) = env.var("AZURE_STORAGE_ACCOUNT_NAME") {
            options.insert("AZURE_STORAGE_ACCOUNT_NAME", account);
        }

        if let Some(token) = env.var("AZURE_STORAGE_TOKEN") {
            options.insert("AZURE_STORAGE_TOKEN", token);
            return Ok(options);
        }

        let mut token_error = None;
        if let Some(source) = &self.token_source {
            match source.token(AZURE_STORAGE_SCOPE) {
                Ok(token) => {
                    options.insert("AZURE_STORAGE_TOKEN", token);
                    return Ok(options);
                }
                Err(e) => token_error = Some(e),
            }
        }

        if options.contains_key("AZURE_STORAGE_ACCOUNT_NAME") {
            if let Some(key) = env.var("AZURE_STORAGE_ACCOUNT_KEY") {
                options.insert("AZURE_STORAGE_ACCOUNT_KEY", key);
                return Ok(options);
            }
        }

        if let (Some(client_id), Some(secret), Some(tenant)) = (
            env.var("AZURE_CLIENT_ID"),
            env.var("AZURE_CLIENT_SECRET"),
            env.var("AZURE_TENANT_ID"),
        ) {
            options.insert("AZURE_CLIENT_ID", client_id);
            options.insert("AZURE_CLIENT_SECRET", secret);
            options.insert("AZURE_TENANT_ID", tenant);
            return Ok(options);
        }

        Err(token_error.unwrap_or(DetectionError::NotConfigured("Azure credentials")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticEnvironment;

    struct FixedToken(Result<&'static str, &'static str>);

    impl AzureTokenSource for FixedToken {
        fn token(&self, scope: &str) -> Result<String, DetectionError> {
            assert_eq!(scope, AZURE_STORAGE_SCOPE);
            self.0
                .map(str::to_string)
                .map_err(|e| DetectionError::TokenSource(e.to_string()))
        }
    }

    #[test]
    fn test_token_source_used() {
        let provider = AzureCredentialProvider::with_token_source(Arc::new(FixedToken(Ok("t0k"))));
        let options = provider.detect(&StaticEnvironment::new()).unwrap();
        assert_eq!(options.get("AZURE_STORAGE_TOKEN"), Some("t0k"));
    }

    #[test]
    fn test_env_token_beats_token_source() {
        let provider = AzureCredentialProvider::with_token_source(Arc::new(FixedToken(Ok("chain"))));
        let env = StaticEnvironment::new().with_var("AZURE_STORAGE_TOKEN", "preset");
        let options = provider.detect(&env).unwrap();
        assert_eq!(options.get("AZURE_STORAGE_TOKEN"), Some("preset"));
    }

    #[test]
    fn test_falls_back_to_account_key() {
        let provider =
            AzureCredentialProvider::with_token_source(Arc::new(FixedToken(Err("no chain"))));
        let env = StaticEnvironment::new()
            .with_var("AZURE_STORAGE_ACCOUNT_NAME", "acct")
            .with_var("AZURE_STORAGE_ACCOUNT_KEY", "key==");
        let options = provider.detect(&env).unwrap();
        assert_eq!(options.get("AZURE_STORAGE_ACCOUNT_KEY"), Some("key=="));
        assert!(!options.contains_key("AZURE_STORAGE_TOKEN"));
    }

    #[test]
    fn test_token_failure_reported_when_nothing_else() {
        let provider =
            AzureCredentialProvider::with_token_source(Arc::new(FixedToken(Err("expired"))));
        assert!(matches!(
            provider.detect(&StaticEnvironment::new()),
            Err(DetectionError::TokenSource(_))
        ));
    }
}
