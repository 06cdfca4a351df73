//! Write modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, Result};

/// What a write does when the table already exists.
///
/// | Mode | No table | Table exists |
/// |---|---|---|
/// | `Append` | create, version 0 | new version adding files |
/// | `Overwrite` | create, version 0 | new version replacing all files |
/// | `Error` | create, version 0 | fail with `AlreadyExists` |
/// | `Ignore` | create, version 0 | no-op |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteMode {
    /// Add files to the table.
    Append,
    /// Replace all live files.
    Overwrite,
    /// Refuse to touch an existing table.
    #[default]
    Error,
    /// Leave an existing table untouched.
    Ignore,
}

impl WriteMode {
    /// Parses a mode string.
    ///
    /// Case-insensitive and whitespace-tolerant; `errorifexists` is accepted
    /// as an alias of `error`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidMode`] carrying the original string.
    pub fn parse(mode: &str) -> Result<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "overwrite" => Ok(Self::Overwrite),
            "error" | "errorifexists" => Ok(Self::Error),
            "ignore" => Ok(Self::Ignore),
            _ => Err(DeltaError::InvalidMode {
                mode: mode.to_string(),
            }),
        }
    }

    /// Lower-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Overwrite => "overwrite",
            Self::Error => "error",
            Self::Ignore => "ignore",
        }
    }

    /// Mode name recorded in `commitInfo.operationParameters`.
    #[must_use]
    pub fn as_operation_parameter(self) -> &'static str {
        match self {
            Self::Append => "Append",
            Self::Overwrite => "Overwrite",
            Self::Error => "ErrorIfExists",
            Self::Ignore => "Ignore",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = DeltaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WriteMode {
    type Error = DeltaError;

    fn try_from(mode: String) -> Result<Self> {
        Self::parse(&mode)
    }
}

impl From<WriteMode> for String {
    fn from(mode: WriteMode) -> Self {
        mode.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_known_modes() {
        assert_eq!(WriteMode::parse("append").unwrap(), WriteMode::Append);
        assert_eq!(WriteMode::parse(" Overwrite ").unwrap(), WriteMode::Overwrite);
        assert_eq!(WriteMode::parse("ERROR").unwrap(), WriteMode::Error);
        assert_eq!(WriteMode::parse("errorifexists").unwrap(), WriteMode::Error);
        assert_eq!("ignore".parse::<WriteMode>().unwrap(), WriteMode::Ignore);
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = WriteMode::parse("merge").unwrap_err();
        assert!(matches!(err, DeltaError::InvalidMode { ref mode } if mode == "merge"));
        assert!(WriteMode::parse("").is_err());
    }

    #[test]
    fn test_serde_goes_through_parse() {
        let mode: WriteMode = serde_json::from_str("\"ErrorIfExists\"").unwrap();
        assert_eq!(mode, WriteMode::Error);
        let mode: WriteMode = serde_json::from_str("\" Append\"").unwrap();
        assert_eq!(mode, WriteMode::Append);
        assert!(serde_json::from_str::<WriteMode>("\"merge\"").is_err());
        assert_eq!(serde_json::to_string(&WriteMode::Overwrite).unwrap(), "\"overwrite\"");
    }

    #[test]
    fn test_default_is_error() {
        assert_eq!(WriteMode::default(), WriteMode::Error);
        assert_eq!(WriteMode::Error.as_operation_parameter(), "ErrorIfExists");
    }
}
