use thiserror::Error;

/// Why an authentication attempt did not produce a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The API rejected the credentials or the token.
    Rejected,
    /// The API could not be reached; the credentials were never checked.
    Unreachable,
}

/// Crate-wide error type.
///
/// `Clone` because a single login result is handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {message}")]
    Auth { kind: AuthFailure, message: String },

    #[error("rate limit exceeded: {0}")]
    RateExceeded(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("invalid response ({reason}): {body}")]
    InvalidResponse { body: String, reason: String },

    #[error("no data returned for {0}")]
    NoData(String),

    #[error("{command} on device {device_sn} failed: {reason}")]
    Command {
        device_sn: String,
        command: &'static str,
        #[source]
        reason: Box<Error>,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("update failed {failures} times in a row: {last}")]
    UpdateFailed {
        failures: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Error::Auth {
            kind: AuthFailure::Rejected,
            message: message.into(),
        }
    }

    /// `true` if the token or credentials were refused, looking through command wrappers.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth {
                kind: AuthFailure::Rejected,
                ..
            } => true,
            Error::Command { reason, .. } => reason.is_auth(),
            _ => false,
        }
    }

    /// `true` for failures the next poll cycle may not see again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) | Error::RateExceeded(_) => true,
            Error::Auth {
                kind: AuthFailure::Unreachable,
                ..
            } => true,
            Error::Http { status, .. } => *status >= 500,
            Error::Command { reason, .. } | Error::UpdateFailed { last: reason, .. } => {
                reason.is_transient()
            }
            _ => false,
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(error: ::config::ConfigError) -> Self {
        Error::Config(error.to_string())
    }
}
