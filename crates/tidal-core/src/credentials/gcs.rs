//! Google Cloud Storage credentials.

use super::{AmbientEnvironment, CredentialProvider, DetectionError, StorageOptions};

/// Detects a service-account key file path.
///
/// Only the path is forwarded; the object-store layer reads the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcsCredentialProvider;

impl CredentialProvider for GcsCredentialProvider {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn detect(&self, env: &dyn AmbientEnvironment) -> Result<StorageOptions, DetectionError> {
        let path = env
            .var("GOOGLE_APPLICATION_CREDENTIALS")
            .or_else(|| env.var("GOOGLE_SERVICE_ACCOUNT"))
            .ok_or(DetectionError::NotConfigured("GCS service account"))?;

        let mut options = StorageOptions::new();
        options.insert("GOOGLE_APPLICATION_CREDENTIALS", path);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticEnvironment;

    #[test]
    fn test_service_account_path() {
        let env = StaticEnvironment::new().with_var("GOOGLE_SERVICE_ACCOUNT", "/keys/sa.json");
        let options = GcsCredentialProvider.detect(&env).unwrap();
        assert_eq!(options.get("GOOGLE_APPLICATION_CREDENTIALS"), Some("/keys/sa.json"));
    }

    #[test]
    fn test_nothing_configured() {
        assert!(GcsCredentialProvider.detect(&StaticEnvironment::new()).is_err());
    }
}
