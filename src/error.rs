use std::fmt;

/// Errors surfaced by the pile core.
#[derive(Debug)]
pub enum PileError {
    /// Underlying filesystem failure.
    Io(std::io::Error),
    /// An entry file (or sidecar) could not be parsed.
    Parse { path: String, message: String },
    /// No entry (or file) exists at this path.
    NotFound(String),
    /// A path that escapes the pile root or is otherwise unusable.
    InvalidPath(String),
    /// Serialization of front-matter, settings or sidecars failed.
    Serialize(String),
    /// An external AI / HTTP service failed.
    Service(String),
    /// The caller abandoned the operation.
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PileError>;

impl PileError {
    pub fn parse(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for PileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Parse { path, message } => write!(f, "Failed to parse {}: {}", path, message),
            Self::NotFound(path) => write!(f, "Not found: {}", path),
            Self::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            Self::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            Self::Service(msg) => write!(f, "Service error: {}", msg),
            Self::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for PileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for PileError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for PileError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

impl From<reqwest::Error> for PileError {
    fn from(e: reqwest::Error) -> Self {
        Self::Service(e.to_string())
    }
}
