//! Error types for the Camect bridge.
//!
//! Setup failures are [`ConnectError`], failed write commands are [`CommandError`] and push
//! events that cannot be decoded are [`MalformedEvent`]. The vendor client reports everything
//! as [`ApiError`].

/// Broad category of a vendor client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ApiErrorKind {
    /// The hub could not be reached
    Connection,
    /// The hub refused the credentials
    Auth,
    /// The hub answered but refused the request
    Rejected,
    Other,
}

/// Failure reported by the vendor hub client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Connection, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Rejected, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, message)
    }
}

/// Setup-time failure. Fatal to the setup call, never to the process.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Failed to connect to Camect hub at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to fetch hub info: {0}")]
    Info(#[source] ApiError),

    #[error("Failed to list cameras: {0}")]
    Discovery(#[source] ApiError),

    #[error("Camect hub {hub_id} is already configured")]
    AlreadyConfigured { hub_id: String },
}

/// A write command issued to the hub failed
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Hub failed to {command}: {source}")]
    Api {
        command: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("{0} is no longer attached to a hub session")]
    Detached(String),

    #[error("Hub session is closed")]
    SessionClosed,
}

/// A push event that could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum MalformedEvent {
    #[error("event is not a JSON object: {0}")]
    NotAnObject(serde_json::Value),

    #[error("failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),
}
