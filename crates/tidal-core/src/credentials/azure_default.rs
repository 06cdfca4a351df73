//! Azure AD default-credential chain.
//!
//! [`DefaultAzureTokenSource`] tries, in order:
//!
//! | Source | Configured by |
//! |---|---|
//! | Client secret | `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET` |
//! | Workload identity | `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_FEDERATED_TOKEN_FILE` |
//! | Managed identity | App Service `IDENTITY_ENDPOINT`/`IDENTITY_HEADER`, else IMDS |
//! | Azure CLI | `az account get-access-token` |
//!
//! The first token acquired is cached until five minutes before it expires.

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;

use super::{AmbientEnvironment, AzureTokenSource, DetectionError};

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const IMDS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const REFRESH_MARGIN_SECS: i64 = 300;
const CLI_FALLBACK_LIFETIME_SECS: i64 = 1800;

#[derive(Debug, Clone, PartialEq, Eq)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    scope: String,
    token: AccessToken,
}

/// Bearer tokens from the Azure default-credential chain.
pub struct DefaultAzureTokenSource {
    env: Arc<dyn AmbientEnvironment>,
    cli_program: String,
    use_managed_identity: bool,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for DefaultAzureTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAzureTokenSource")
            .field("cli_program", &self.cli_program)
            .field("use_managed_identity", &self.use_managed_identity)
            .finish_non_exhaustive()
    }
}

impl DefaultAzureTokenSource {
    /// Chain reading configuration from `env`.
    #[must_use]
    pub fn new(env: Arc<dyn AmbientEnvironment>) -> Self {
        let cli_program = if cfg!(windows) { "az.cmd" } else { "az" };
        Self {
            env,
            cli_program: cli_program.to_string(),
            use_managed_identity: true,
            cache: Mutex::new(None),
        }
    }

    /// Runs `program` instead of `az` for the CLI step.
    #[must_use]
    pub fn with_cli_program(mut self, program: impl Into<String>) -> Self {
        self.cli_program = program.into();
        self
    }

    /// Skips the managed identity step.
    #[must_use]
    pub fn without_managed_identity(mut self) -> Self {
        self.use_managed_identity = false;
        self
    }

    fn cached(&self, scope: &str) -> Option<String> {
        let refresh_after = Utc::now() + TimeDelta::seconds(REFRESH_MARGIN_SECS);
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|c| c.scope == scope && c.token.expires_at > refresh_after)
            .map(|c| c.token.token.clone())
    }

    fn remember(&self, scope: &str, token: &AccessToken) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(CachedToken {
                scope: scope.to_string(),
                token: token.clone(),
            });
        }
    }

    fn acquire(&self, scope: &str) -> Result<AccessToken, DetectionError> {
        let mut failures = Vec::new();

        let steps: [(&str, fn(&Self, &str) -> Result<Option<AccessToken>, String>); 4] = [
            ("client secret", Self::client_secret),
            ("workload identity", Self::workload_identity),
            ("managed identity", Self::managed_identity),
            ("azure cli", Self::azure_cli),
        ];
        for (name, step) in steps {
            match step(self, scope) {
                Ok(Some(token)) => {
                    tracing::debug!(source = name, "acquired azure storage token");
                    return Ok(token);
                }
                Ok(None) => {}
                Err(reason) => failures.push(format!("{name}: {reason}")),
            }
        }

        if failures.is_empty() {
            return Err(DetectionError::NotConfigured("Azure default credential"));
        }
        Err(DetectionError::TokenSource(failures.join("; ")))
    }

    fn token_endpoint(&self, tenant: &str) -> String {
        let host = self
            .env
            .var("AZURE_AUTHORITY_HOST")
            .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());
        format!("{}/{tenant}/oauth2/v2.0/token", host.trim_end_matches('/'))
    }

    fn client_secret(&self, scope: &str) -> Result<Option<AccessToken>, String> {
        let (Some(tenant), Some(client_id), Some(secret)) = (
            self.env.var("AZURE_TENANT_ID"),
            self.env.var("AZURE_CLIENT_ID"),
            self.env.var("AZURE_CLIENT_SECRET"),
        ) else {
            return Ok(None);
        };
        let url = self.token_endpoint(&tenant);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scope", scope),
        ];
        send(HTTP_TIMEOUT, |client| client.post(&url).form(&form)).map(Some)
    }

    fn workload_identity(&self, scope: &str) -> Result<Option<AccessToken>, String> {
        let (Some(tenant), Some(client_id), Some(file)) = (
            self.env.var("AZURE_TENANT_ID"),
            self.env.var("AZURE_CLIENT_ID"),
            self.env.var("AZURE_FEDERATED_TOKEN_FILE"),
        ) else {
            return Ok(None);
        };
        let assertion = self
            .env
            .read_to_string(Path::new(&file))
            .map_err(|e| format!("cannot read {file}: {e}"))?;
        let url = self.token_endpoint(&tenant);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", assertion.trim()),
            ("scope", scope),
        ];
        send(HTTP_TIMEOUT, |client| client.post(&url).form(&form)).map(Some)
    }

    fn managed_identity(&self, scope: &str) -> Result<Option<AccessToken>, String> {
        if !self.use_managed_identity {
            return Ok(None);
        }
        let resource = scope_to_resource(scope);
        let client_id = self.env.var("AZURE_CLIENT_ID");

        if let (Some(endpoint), Some(header)) = (
            self.env.var("IDENTITY_ENDPOINT"),
            self.env.var("IDENTITY_HEADER"),
        ) {
            return send(HTTP_TIMEOUT, |client| {
                let mut request = client
                    .get(&endpoint)
                    .header("X-IDENTITY-HEADER", &header)
                    .query(&[("api-version", "2019-08-01"), ("resource", resource)]);
                if let Some(id) = &client_id {
                    request = request.query(&[("client_id", id)]);
                }
                request
            })
            .map(Some);
        }

        send(IMDS_CONNECT_TIMEOUT, |client| {
            let mut request = client
                .get(IMDS_ENDPOINT)
                .header("Metadata", "true")
                .query(&[("api-version", "2018-02-01"), ("resource", resource)]);
            if let Some(id) = &client_id {
                request = request.query(&[("client_id", id)]);
            }
            request
        })
        .map(Some)
    }

    fn azure_cli(&self, scope: &str) -> Result<Option<AccessToken>, String> {
        let output = Command::new(&self.cli_program)
            .args(["account", "get-access-token", "--scope", scope, "--output", "json"])
            .output()
            .map_err(|e| format!("cannot run {}: {e}", self.cli_program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.cli_program,
                output.status,
                stderr.trim()
            ));
        }
        parse_cli_output(&output.stdout).map(Some)
    }
}

impl AzureTokenSource for DefaultAzureTokenSource {
    fn token(&self, scope: &str) -> Result<String, DetectionError> {
        if let Some(token) = self.cached(scope) {
            return Ok(token);
        }
        let token = self.acquire(scope)?;
        self.remember(scope, &token);
        Ok(token.token)
    }
}

/// `https://storage.azure.com/.default` becomes `https://storage.azure.com/`.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix(".default").unwrap_or(scope)
}

/// Sends one token request on a dedicated thread, so the blocking client never
/// runs on an async executor's worker.
fn send<F>(timeout: Duration, build: F) -> Result<AccessToken, String>
where
    F: FnOnce(&Client) -> RequestBuilder + Send,
{
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let client = Client::builder()
                    .connect_timeout(timeout)
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(|e| format!("http client: {e}"))?;
                let response = build(&client).send().map_err(|e| e.to_string())?;
                let status = response.status();
                let body = response.bytes().map_err(|e| e.to_string())?;
                if !status.is_success() {
                    return Err(format!("{status}: {}", String::from_utf8_lossy(&body).trim()));
                }
                parse_token_response(&body, Utc::now())
            })
            .join()
            .map_err(|_| "token request thread panicked".to_string())?
    })
}

fn json_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Parses an AAD or managed identity token response.
///
/// `expires_in` (seconds from now) wins over `expires_on` (epoch seconds);
/// both may arrive as numbers or strings.
fn parse_token_response(body: &[u8], now: DateTime<Utc>) -> Result<AccessToken, String> {
    let json: Value = serde_json::from_slice(body).map_err(|e| format!("bad token response: {e}"))?;
    let token = json
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or("token response has no access_token")?
        .to_string();

    let expires_at = if let Some(secs) = json.get("expires_in").and_then(json_i64) {
        now + TimeDelta::seconds(secs)
    } else if let Some(epoch) = json.get("expires_on").and_then(json_i64) {
        DateTime::from_timestamp(epoch, 0).ok_or("expires_on out of range")?
    } else {
        return Err("token response has no expiry".to_string());
    };
    Ok(AccessToken { token, expires_at })
}

/// Parses `az account get-access-token --output json`.
fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken, String> {
    let json: Value = serde_json::from_slice(stdout).map_err(|e| format!("bad az output: {e}"))?;
    let token = json
        .get("accessToken")
        .and_then(Value::as_str)
        .ok_or("az output has no accessToken")?
        .to_string();
    let expires_at = json
        .get("expires_on")
        .and_then(json_i64)
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .unwrap_or_else(|| Utc::now() + TimeDelta::seconds(CLI_FALLBACK_LIFETIME_SECS));
    Ok(AccessToken { token, expires_at })
}
