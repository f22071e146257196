use thiserror::Error;

/// Errors surfaced by uplink operations.
///
/// Transport-level failures (`Transport`) wrap the underlying client error
/// unchanged; everything else is a protocol- or configuration-level
/// classification made by this crate.
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("uplink {name} is offline")]
    Offline { name: String },
    #[error("token is required for uplink authentication")]
    TokenRequired,
    #[error("invalid auth type '{kind}' (expected Basic or Bearer)")]
    AuthInvalid { kind: String },
    #[error("invalid interval literal '{raw}'")]
    BadInterval { raw: String },
    #[error("package doesn't exist on uplink")]
    PackageNotFound,
    #[error("file doesn't exist on uplink")]
    FileNotFound,
    #[error("remote copy not modified")]
    NotModified,
    #[error("bad status code {status} from uplink")]
    BadStatus { status: u16 },
    #[error("content length mismatch: advertised {expected} bytes, received {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },
    #[error("invalid uplink configuration: {message}")]
    Config { message: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl UplinkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Numeric status carried by `BadStatus`, so callers can differentiate
    /// upstream failures without string matching.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Self::BadStatus { status } => Some(*status),
            _ => None,
        }
    }
}
