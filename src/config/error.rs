use std::fmt;
use std::io;

/// Why a tally configuration could not be loaded.
#[derive(Debug)]
pub enum ConfigError {
    /// The file at `path` could not be read.
    FileReadError { path: String, source: io::Error },
    /// The TOML is malformed or a value has the wrong type.
    ParseError { source: toml::de::Error },
    /// The values parsed but cannot drive a batch or recorder,
    /// e.g. zero writers or a failure rate above 1.
    ValidationError { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileReadError { path, source } => {
                write!(f, "cannot read tally config '{}': {}", path, source)
            }
            ConfigError::ParseError { source } => {
                write!(f, "malformed tally config: {}", source)
            }
            ConfigError::ValidationError { reason } => {
                write!(f, "invalid tally config: {}", reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileReadError { source, .. } => Some(source),
            ConfigError::ParseError { source } => Some(source),
            ConfigError::ValidationError { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(source: toml::de::Error) -> Self {
        ConfigError::ParseError { source }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
