use std::path::PathBuf;
use thiserror::Error;

/// Raised while loading, substituting or validating a configuration
/// document. The `path` fields use the dotted form that operators see
/// in the API, e.g. `cameras[0].meters[1].perspective.points`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path of the document.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The document is not well formed YAML.
    #[error("failed to parse {path}: {source}")]
    Yaml {
        /// Filesystem path of the document.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_yaml::Error,
    },
    /// A legacy JSON document is not well formed.
    #[error("failed to parse {path}: {source}")]
    Json {
        /// Filesystem path of the document.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// A `${NAME}` placeholder had no value in the environment and no
    /// `:-default` fallback.
    #[error("unresolved environment variable ${{{name}}}")]
    UnresolvedVariable {
        /// Name of the missing variable.
        name: String,
    },
    /// A value failed validation. Points at the first offending path.
    #[error("{path}: {message}")]
    Invalid {
        /// Dotted path of the offending value.
        path: String,
        /// Human readable description of the violation.
        message: String,
    },
    /// No configuration file could be located in the search order.
    #[error("no configuration file found (searched {searched:?})")]
    NotFound {
        /// The paths that were tried, in order.
        searched: Vec<PathBuf>,
    },
}

impl ConfigError {
    /// Shorthand for a validation failure at a dotted path.
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Raised by the video source while connecting to or reading from a
/// stream. Drives the camera worker state machine and is surfaced to
/// operators only as a status flag on the camera.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The stream could not be opened.
    #[error("failed to connect: {0}")]
    Connect(String),
    /// The decoder produced no frame within the read timeout.
    #[error("no frame within {0:?}")]
    Timeout(std::time::Duration),
    /// The stream ended or a frame could not be read.
    #[error("failed to read frame: {0}")]
    Read(String),
    /// A frame was read but could not be decoded into pixels.
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Raised by export sinks. Transient kinds trigger the per sink backoff
/// policy, permanent kinds drop the item.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Worth retrying: network failure, 5xx, broker disconnect.
    #[error("transient export failure: {0}")]
    Transient(String),
    /// Not worth retrying: 4xx, constraint violation, bad template.
    #[error("permanent export failure: {0}")]
    Permanent(String),
}

impl ExportError {
    /// Whether the sink should back off and retry the same payload.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Raised on registry lookups with ids that are not part of the current
/// snapshot. These are programming errors and fail fast at the caller.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The camera id is not in the current snapshot.
    #[error("unknown camera {0}")]
    UnknownCamera(String),
}
