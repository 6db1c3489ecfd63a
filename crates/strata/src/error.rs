use std::sync::Arc;

use crate::identifier::ResourceId;

/// Coarse classification of a loader failure.
///
/// The failed-key registry decides what to block based on this value, so
/// every [`FetchError`] maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// The resource does not exist (404 / 410, missing file)
    NotFound,
    /// Any other 4xx response
    ClientError,
    /// 5xx responses and 429
    ServerError,
    /// Request or read timeout (including 408)
    Timeout,
    /// Connection could not be established or was dropped
    Connectivity,
    /// The fetch was cancelled
    Cancelled,
    /// No loader claims the identifier
    Unsupported,
    /// The identifier is not a usable URL
    InvalidUrl,
    /// The payload was received but is unusable
    BadData,
    /// Anything that fits nowhere else
    Other,
}

// Custom error type for loader operations
#[derive(Debug, thiserror::Error, Clone)]
pub enum FetchError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server returned status code {code} for {url}")]
    Status { code: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No loader supports {0}")]
    Unsupported(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Bad data: {0}")]
    BadData(String),

    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("Loader error: {0}")]
    Other(String),
}

// Manual implementation of From<reqwest::Error> for FetchError
// because of the Arc wrapping.
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io {
            source: Arc::new(err),
        }
    }
}

impl FetchError {
    /// Classify this error.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::Status { code, .. } => kind_for_status(*code),
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Connectivity(_) => FetchErrorKind::Connectivity,
            FetchError::Cancelled => FetchErrorKind::Cancelled,
            FetchError::Unsupported(_) => FetchErrorKind::Unsupported,
            FetchError::InvalidUrl(_) => FetchErrorKind::InvalidUrl,
            FetchError::BadData(_) => FetchErrorKind::BadData,
            FetchError::Network { source } => {
                if source.is_timeout() {
                    FetchErrorKind::Timeout
                } else if source.is_connect() {
                    FetchErrorKind::Connectivity
                } else if let Some(status) = source.status() {
                    kind_for_status(status.as_u16())
                } else if source.is_builder() {
                    FetchErrorKind::InvalidUrl
                } else {
                    FetchErrorKind::Other
                }
            }
            FetchError::Io { source } => match source.kind() {
                std::io::ErrorKind::NotFound => FetchErrorKind::NotFound,
                std::io::ErrorKind::TimedOut => FetchErrorKind::Timeout,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected => FetchErrorKind::Connectivity,
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                    FetchErrorKind::BadData
                }
                _ => FetchErrorKind::Other,
            },
            FetchError::Other(_) => FetchErrorKind::Other,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Timeout | FetchErrorKind::Connectivity | FetchErrorKind::ServerError
        )
    }
}

fn kind_for_status(code: u16) -> FetchErrorKind {
    match code {
        404 | 410 => FetchErrorKind::NotFound,
        408 => FetchErrorKind::Timeout,
        429 => FetchErrorKind::ServerError,
        400..=499 => FetchErrorKind::ClientError,
        500..=599 => FetchErrorKind::ServerError,
        _ => FetchErrorKind::Other,
    }
}

/// Errors produced while turning bytes into a [`Resource`](crate::resource::Resource).
#[derive(Debug, thiserror::Error, Clone)]
pub enum DecodeError {
    #[error("Payload is empty")]
    Empty,

    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Decryptor rejected the payload")]
    Decryption,
}

/// Outcome classification delivered to callers of the resource manager.
///
/// Collaborator errors are always folded into one of these variants before
/// they reach a completion callback.
#[derive(Debug, thiserror::Error, Clone)]
pub enum LoadError {
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("{0} previously failed and is blacklisted")]
    Blacklisted(ResourceId),

    #[error("No loader available for {0}")]
    NoLoaderAvailable(ResourceId),

    #[error("Failed to load {identifier}: {source}")]
    LoadFailed {
        identifier: ResourceId,
        source: FetchError,
        retryable: bool,
    },

    #[error("Failed to decode {identifier}: {source}")]
    DecodeFailed {
        identifier: ResourceId,
        source: DecodeError,
    },

    #[error("Options processor rejected {0}")]
    ProcessingRejected(ResourceId),

    #[error("{0} is not cached")]
    NotCached(ResourceId),

    #[error("Loading {0} was disallowed by the manager delegate")]
    LoadDisallowed(ResourceId),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LoadError {
    /// Classify a loader failure for `identifier`.
    pub fn from_fetch(identifier: &ResourceId, error: FetchError) -> Self {
        match error {
            FetchError::Unsupported(_) => LoadError::NoLoaderAvailable(identifier.clone()),
            other => LoadError::LoadFailed {
                identifier: identifier.clone(),
                retryable: other.is_retryable(),
                source: other,
            },
        }
    }

    /// Whether the same request may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::LoadFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Errors raised while assembling a [`ResourceManager`](crate::ResourceManager)
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to initialize cache: {0}")]
    Cache(#[from] std::io::Error),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] FetchError),
}
