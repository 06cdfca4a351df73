//! AWS session credentials.
//!
//! Lookup order:
//! 1. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//! 2. the shared credentials file for `AWS_PROFILE` (default `default`)
//!
//! Region comes from `AWS_REGION`, `AWS_DEFAULT_REGION`, then the profile's
//! `region` in the config file, then `us-east-1`.

use std::collections::HashMap;
use std::path::PathBuf;

use super::{AmbientEnvironment, CredentialProvider, DetectionError, StorageOptions};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PROFILE: &str = "default";

/// Detects AWS credentials from environment variables and shared files.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsCredentialProvider;

struct SessionCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentialProvider {
    fn from_env_vars(env: &dyn AmbientEnvironment) -> Option<SessionCredentials> {
        Some(SessionCredentials {
            access_key_id: env.var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: env.var("AWS_SECRET_ACCESS_KEY")?,
            session_token: env.var("AWS_SESSION_TOKEN"),
        })
    }

    fn from_shared_file(
        env: &dyn AmbientEnvironment,
        profile: &str,
    ) -> Result<SessionCredentials, DetectionError> {
        let path = env
            .var("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .or_else(|| env.home_dir().map(|h| h.join(".aws").join("credentials")))
            .ok_or(DetectionError::NotConfigured("AWS credentials"))?;
        let contents = env
            .read_to_string(&path)
            .map_err(|_| DetectionError::NotConfigured("AWS credentials"))?;

        let sections = parse_ini(&contents);
        let section = sections.get(profile).ok_or_else(|| DetectionError::Malformed {
            what: path.display().to_string(),
            message: format!("profile '{profile}' not found"),
        })?;

        let field = |key: &str| section.get(key).cloned();
        match (field("aws_access_key_id"), field("aws_secret_access_key")) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(SessionCredentials {
                access_key_id,
                secret_access_key,
                session_token: field("aws_session_token"),
            }),
            _ => Err(DetectionError::Malformed {
                what: path.display().to_string(),
                message: format!("profile '{profile}' has no access key pair"),
            }),
        }
    }

    fn region(env: &dyn AmbientEnvironment, profile: &str) -> String {
        if let Some(region) = env.var("AWS_REGION").or_else(|| env.var("AWS_DEFAULT_REGION")) {
            return region;
        }

        let config_path = env
            .var("AWS_CONFIG_FILE")
            .map(PathBuf::from)
            .or_else(|| env.home_dir().map(|h| h.join(".aws").join("config")));
        let from_config = config_path
            .and_then(|path| env.read_to_string(&path).ok())
            .and_then(|contents| {
                let sections = parse_ini(&contents);
                // The config file names non-default profiles "profile <name>".
                let section = sections
                    .get(&format!("profile {profile}"))
                    .or_else(|| sections.get(profile))?;
                section.get("region").cloned()
            });

        from_config.unwrap_or_else(|| DEFAULT_REGION.to_string())
    }
}

impl CredentialProvider for AwsCredentialProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn detect(&self, env: &dyn AmbientEnvironment) -> Result<StorageOptions, DetectionError> {
        let profile = env
            .var("AWS_PROFILE")
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        let credentials = match Self::from_env_vars(env) {
            Some(credentials) => credentials,
            None => Self::from_shared_file(env, &profile)?,
        };

        let mut options = StorageOptions::new();
        options.insert("AWS_ACCESS_KEY_ID", credentials.access_key_id);
        options.insert("AWS_SECRET_ACCESS_KEY", credentials.secret_access_key);
        if let Some(token) = credentials.session_token {
            options.insert("AWS_SESSION_TOKEN", token);
        }
        options.insert("AWS_REGION", Self::region(env, &profile));
        if let Some(endpoint) = env.var("AWS_ENDPOINT_URL") {
            options.insert("AWS_ENDPOINT_URL", endpoint);
        }
        Ok(options)
    }
}

/// Minimal INI reader for the AWS shared files: `[section]` headers and
/// `key = value` lines; `#` and `;` start comments.
fn parse_ini(contents: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticEnvironment;

    #[test]
    fn test_env_vars_take_priority() {
        let env = StaticEnvironment::new()
            .with_var("AWS_ACCESS_KEY_ID", "AKIDENV")
            .with_var("AWS_SECRET_ACCESS_KEY", "secret")
            .with_var("AWS_SESSION_TOKEN", "session")
            .with_home("/home/u")
            .with_file(
                "/home/u/.aws/credentials",
                "[default]\naws_access_key_id = AKIDFILE\naws_secret_access_key = s\n",
            );

        let options = AwsCredentialProvider.detect(&env).unwrap();
        assert_eq!(options.get("AWS_ACCESS_KEY_ID"), Some("AKIDENV"));
        assert_eq!(options.get("AWS_SESSION_TOKEN"), Some("session"));
        assert_eq!(options.get("AWS_REGION"), Some("us-east-1"));
    }

    #[test]
    fn test_shared_file_profile_and_region() {
        let env = StaticEnvironment::new()
            .with_var("AWS_PROFILE", "analytics")
            .with_home("/home/u")
            .with_file(
                "/home/u/.aws/credentials",
                "[default]\naws_access_key_id = A\naws_secret_access_key = B\n\n\
                 [analytics]\naws_access_key_id = AKIDANALYTICS\naws_secret_access_key = S\n",
            )
            .with_file(
                "/home/u/.aws/config",
                "[default]\nregion = us-west-2\n[profile analytics]\nregion = eu-central-1\n",
            );

        let options = AwsCredentialProvider.detect(&env).unwrap();
        assert_eq!(options.get("AWS_ACCESS_KEY_ID"), Some("AKIDANALYTICS"));
        assert_eq!(options.get("AWS_REGION"), Some("eu-central-1"));
        assert!(!options.contains_key("AWS_SESSION_TOKEN"));
    }

    #[test]
    fn test_nothing_configured() {
        let env = StaticEnvironment::new();
        assert!(matches!(
            AwsCredentialProvider.detect(&env),
            Err(DetectionError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_missing_profile_is_malformed() {
        let env = StaticEnvironment::new()
            .with_var("AWS_SHARED_CREDENTIALS_FILE", "/creds")
            .with_var("AWS_PROFILE", "missing")
            .with_file("/creds", "[default]\naws_access_key_id = A\n");
        assert!(matches!(
            AwsCredentialProvider.detect(&env),
            Err(DetectionError::Malformed { .. })
        ));
    }
}
