//! Table location parsing.
//!
//! A [`TableUri`] is the immutable address of a table. Its [`StorageScheme`]
//! decides both which credential provider applies and which storage backend
//! is built for it.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::{Error, Result};

/// Storage family a table URI points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageScheme {
    /// Amazon S3 (`s3://`, `s3a://`).
    Aws,
    /// Azure Data Lake / Blob (`abfs://`, `abfss://`, `az://`, `azure://`).
    Azure,
    /// Google Cloud Storage (`gs://`, `gcs://`).
    Gcs,
    /// Local filesystem (`file://` or a bare path).
    Local,
    /// Process-local memory (`memory://`), used by tests.
    Memory,
    /// Any other scheme; no credential strategy or backend applies.
    Other(String),
}

impl StorageScheme {
    /// Classifies a URL scheme (case-insensitive).
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme.to_ascii_lowercase().as_str() {
            "s3" | "s3a" => Self::Aws,
            "abfs" | "abfss" | "az" | "azure" => Self::Azure,
            "gs" | "gcs" => Self::Gcs,
            "file" => Self::Local,
            "memory" => Self::Memory,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true for object-store schemes that need credentials.
    #[must_use]
    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::Aws | Self::Azure | Self::Gcs)
    }
}

impl fmt::Display for StorageScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => f.write_str("s3"),
            Self::Azure => f.write_str("azure"),
            Self::Gcs => f.write_str("gcs"),
            Self::Local => f.write_str("file"),
            Self::Memory => f.write_str("memory"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Url(Url),
    Path(PathBuf),
}

/// Parsed, immutable table location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUri {
    raw: String,
    scheme: StorageScheme,
    location: Location,
}

impl TableUri {
    /// Parses a table location.
    ///
    /// Accepts `scheme://...` URLs and bare filesystem paths. Relative paths
    /// are resolved against the current working directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] for empty input, control characters,
    /// unparsable URLs, or URLs without a bucket/container.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_uri(raw, "table uri cannot be empty"));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(Error::invalid_uri(
                raw,
                "table uri cannot contain control characters",
            ));
        }

        if !trimmed.contains("://") {
            return Self::from_local_path(trimmed, raw);
        }

        let url = Url::parse(trimmed).map_err(|e| Error::invalid_uri(raw, e.to_string()))?;
        let scheme = StorageScheme::from_scheme(url.scheme());

        match scheme {
            StorageScheme::Local => {
                let path = url
                    .to_file_path()
                    .map_err(|()| Error::invalid_uri(raw, "file uri must be an absolute path"))?;
                Ok(Self {
                    raw: trimmed.trim_end_matches('/').to_string(),
                    scheme,
                    location: Location::Path(normalize(&path)),
                })
            }
            _ => {
                if scheme.is_cloud() && url.host_str().map_or(true, str::is_empty) {
                    return Err(Error::invalid_uri(
                        raw,
                        "object store uri must name a bucket or container",
                    ));
                }
                Ok(Self {
                    raw: trimmed.trim_end_matches('/').to_string(),
                    scheme,
                    location: Location::Url(url),
                })
            }
        }
    }

    fn from_local_path(path: &str, raw: &str) -> Result<Self> {
        let path = PathBuf::from(path);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .map_err(|e| Error::invalid_uri(raw, format!("cannot resolve relative path: {e}")))?
                .join(path)
        };
        let normalized = normalize(&absolute);
        Ok(Self {
            raw: normalized.display().to_string(),
            scheme: StorageScheme::Local,
            location: Location::Path(normalized),
        })
    }

    /// Returns the URI as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the storage scheme.
    #[must_use]
    pub fn scheme(&self) -> &StorageScheme {
        &self.scheme
    }

    /// Returns the filesystem path for local tables.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match &self.location {
            Location::Path(p) => Some(p),
            Location::Url(_) => None,
        }
    }

    /// Returns the parsed URL for non-local tables.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        match &self.location {
            Location::Url(u) => Some(u),
            Location::Path(_) => None,
        }
    }
}

impl fmt::Display for TableUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for TableUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_schemes() {
        for (raw, scheme) in [
            ("s3://bucket/table", StorageScheme::Aws),
            ("S3A://bucket/table", StorageScheme::Aws),
            ("abfss://data@acct.dfs.core.windows.net/t", StorageScheme::Azure),
            ("abfs://data@acct.dfs.core.windows.net/t", StorageScheme::Azure),
            ("gs://bucket/t", StorageScheme::Gcs),
        ] {
            let uri = TableUri::parse(raw).unwrap();
            assert_eq!(uri.scheme(), &scheme, "{raw}");
            assert!(uri.local_path().is_none());
        }
    }

    #[test]
    fn test_local_paths() {
        let uri = TableUri::parse("/tmp/tables/./events/").unwrap();
        assert_eq!(uri.scheme(), &StorageScheme::Local);
        assert_eq!(uri.local_path(), Some(Path::new("/tmp/tables/events")));

        let uri = TableUri::parse("file:///tmp/tables/events").unwrap();
        assert_eq!(uri.local_path(), Some(Path::new("/tmp/tables/events")));

        let relative = TableUri::parse("tables/events").unwrap();
        assert!(relative.local_path().unwrap().is_absolute());
    }

    #[test]
    fn test_unknown_scheme_is_other() {
        let uri = TableUri::parse("hdfs://namenode/t").unwrap();
        assert_eq!(uri.scheme(), &StorageScheme::Other("hdfs".into()));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(TableUri::parse("").is_err());
        assert!(TableUri::parse("   ").is_err());
        assert!(TableUri::parse("s3:///no-bucket").is_err());
        assert!(TableUri::parse("/tmp/a\nb").is_err());
    }
}
