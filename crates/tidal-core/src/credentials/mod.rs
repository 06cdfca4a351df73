//! Storage options and best-effort credential detection.
//!
//! [`StorageOptionsResolver::resolve`] combines two sources of storage
//! options for a table URI:
//!
//! 1. **Auto-detected** options, produced by the [`CredentialProvider`] that
//!    matches the URI scheme, reading only the [`AmbientEnvironment`].
//! 2. **Caller overrides**, which replace auto-detected values key by key.
//!
//! Detection never fails the resolve. A provider that finds nothing, or fails
//! part-way, contributes an empty set and the miss is logged at `debug`.
//! Nothing is cached: each call re-reads the environment.

mod aws;
mod azure;
#[cfg(feature = "azure-default-credential")]
mod azure_default;
mod environment;
mod gcs;

pub use aws::AwsCredentialProvider;
pub use azure::{AzureCredentialProvider, AzureTokenSource, AZURE_STORAGE_SCOPE};
#[cfg(feature = "azure-default-credential")]
pub use azure_default::DefaultAzureTokenSource;
pub use environment::{AmbientEnvironment, ProcessEnvironment, StaticEnvironment};
pub use gcs::GcsCredentialProvider;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::uri::{StorageScheme, TableUri};

/// Option keys whose values are never printed.
const SENSITIVE_MARKERS: &[&str] = &["SECRET", "TOKEN", "KEY", "PASSWORD", "SAS", "CREDENTIAL"];

/// Mapping from option name to string value.
///
/// Keys keep the case they were inserted with; the object-store layer matches
/// them case-insensitively.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageOptions(BTreeMap<String, String>);

impl StorageOptions {
    /// Creates an empty set of options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Replaces every key present in `overrides`; other keys are kept.
    pub fn merge_overrides(&mut self, overrides: &StorageOptions) {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_sensitive(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|m| upper.contains(m))
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if is_sensitive(key) {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StorageOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for StorageOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl From<std::collections::HashMap<String, String>> for StorageOptions {
    fn from(map: std::collections::HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// Why a provider produced no options.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// No credential source was configured in the environment.
    #[error("no {0} found in the environment")]
    NotConfigured(&'static str),

    /// A credential source exists but could not be parsed.
    #[error("malformed {what}: {message}")]
    Malformed {
        /// The source that failed to parse.
        what: String,
        /// Parse failure detail.
        message: String,
    },

    /// An external token source failed.
    #[error("token acquisition failed: {0}")]
    TokenSource(String),
}

/// A scheme-specific source of ambient credentials.
pub trait CredentialProvider: Send + Sync {
    /// Short provider name, used in logs.
    fn name(&self) -> &'static str;

    /// Reads credentials from the ambient environment.
    ///
    /// # Errors
    ///
    /// Returns a [`DetectionError`] when nothing usable is found. Callers treat
    /// every error as "no auto-detected options".
    fn detect(&self, env: &dyn AmbientEnvironment) -> Result<StorageOptions, DetectionError>;
}

/// Resolves the storage options for a table URI.
///
/// The provider chosen for a URI is a pure function of its scheme; the
/// environment is injectable so resolution is testable without real cloud
/// credentials.
pub struct StorageOptionsResolver {
    env: Arc<dyn AmbientEnvironment>,
    aws: AwsCredentialProvider,
    azure: AzureCredentialProvider,
    gcs: GcsCredentialProvider,
}

impl fmt::Debug for StorageOptionsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageOptionsResolver")
            .field("azure", &self.azure)
            .finish_non_exhaustive()
    }
}

impl Default for StorageOptionsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageOptionsResolver {
    /// Resolver reading the real process environment.
    ///
    /// With the `azure-default-credential` feature, Azure URIs also try the
    /// default-credential chain for a bearer token.
    #[must_use]
    pub fn new() -> Self {
        let env: Arc<dyn AmbientEnvironment> = Arc::new(ProcessEnvironment);
        let resolver = Self::with_environment(env.clone());
        #[cfg(feature = "azure-default-credential")]
        let resolver =
            resolver.with_azure_token_source(Arc::new(DefaultAzureTokenSource::new(env)));
        #[cfg(not(feature = "azure-default-credential"))]
        let _ = env;
        resolver
    }

    /// Resolver reading an injected environment.
    #[must_use]
    pub fn with_environment(env: Arc<dyn AmbientEnvironment>) -> Self {
        Self {
            env,
            aws: AwsCredentialProvider,
            azure: AzureCredentialProvider::default(),
            gcs: GcsCredentialProvider,
        }
    }

    /// Sets the Azure default-credential token source.
    #[must_use]
    pub fn with_azure_token_source(mut self, source: Arc<dyn AzureTokenSource>) -> Self {
        self.azure = AzureCredentialProvider::with_token_source(source);
        self
    }

    /// Returns the provider responsible for a scheme, if any.
    #[must_use]
    pub fn provider_for(&self, scheme: &StorageScheme) -> Option<&dyn CredentialProvider> {
        match scheme {
            StorageScheme::Aws => Some(&self.aws),
            StorageScheme::Azure => Some(&self.azure),
            StorageScheme::Gcs => Some(&self.gcs),
            StorageScheme::Local | StorageScheme::Memory | StorageScheme::Other(_) => None,
        }
    }

    /// Returns auto-detected options for the URI, or an empty set.
    #[must_use]
    pub fn detect(&self, uri: &TableUri) -> StorageOptions {
        let Some(provider) = self.provider_for(uri.scheme()) else {
            return StorageOptions::new();
        };
        match provider.detect(self.env.as_ref()) {
            Ok(options) => {
                tracing::debug!(
                    provider = provider.name(),
                    keys = ?options.keys().collect::<Vec<_>>(),
                    "auto-detected storage credentials"
                );
                options
            }
            Err(error) => {
                tracing::debug!(
                    provider = provider.name(),
                    %error,
                    "no ambient storage credentials"
                );
                StorageOptions::new()
            }
        }
    }

    /// Auto-detected options with every key in `overrides` replaced.
    #[must_use]
    pub fn resolve(&self, uri: &TableUri, overrides: &StorageOptions) -> StorageOptions {
        let mut options = self.detect(uri);
        options.merge_overrides(overrides);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides_is_shallow_union() {
        let mut auto: StorageOptions = [("AWS_REGION", "us-east-1"), ("AWS_ACCESS_KEY_ID", "auto")]
            .into_iter()
            .collect();
        let overrides: StorageOptions = [("AWS_ACCESS_KEY_ID", "mine"), ("AWS_ENDPOINT_URL", "http://minio")]
            .into_iter()
            .collect();

        auto.merge_overrides(&overrides);

        assert_eq!(auto.len(), 3);
        assert_eq!(auto.get("AWS_ACCESS_KEY_ID"), Some("mine"));
        assert_eq!(auto.get("AWS_REGION"), Some("us-east-1"));
        assert_eq!(auto.get("AWS_ENDPOINT_URL"), Some("http://minio"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let options: StorageOptions = [
            ("AWS_SECRET_ACCESS_KEY", "very-secret"),
            ("AZURE_STORAGE_TOKEN", "tok"),
            ("AWS_REGION", "eu-west-1"),
        ]
        .into_iter()
        .collect();

        let rendered = format!("{options:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("\"tok\""));
        assert!(rendered.contains("eu-west-1"));
    }

    #[cfg(feature = "azure-default-credential")]
    #[test]
    fn test_default_resolver_carries_azure_chain() {
        let resolver = StorageOptionsResolver::new();
        assert!(format!("{resolver:?}").contains("token_source: true"));
    }

    #[test]
    fn test_local_uri_has_no_provider() {
        let resolver = StorageOptionsResolver::with_environment(Arc::new(
            StaticEnvironment::new().with_var("AWS_ACCESS_KEY_ID", "AKID"),
        ));
        let uri = TableUri::parse("/tmp/events").unwrap();
        assert!(resolver.provider_for(uri.scheme()).is_none());
        assert!(resolver.resolve(&uri, &StorageOptions::new()).is_empty());
    }
}
