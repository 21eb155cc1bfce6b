use shelfcheck_core::ErrorClass;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        /// Bounded excerpt of the response body.
        excerpt: String,
    },

    #[error("request to {url} was intercepted by anti-automation ({marker})")]
    Blocked {
        url: String,
        marker: String,
        excerpt: String,
    },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response shape for {context}: {reason}")]
    UnexpectedShape { context: String, reason: String },

    #[error("fulfillment point {point} has neither an option id nor a postal code or coordinates")]
    UnprobeablePoint { point: String },

    #[error("invalid storefront URL \"{base_url}\": {reason}")]
    InvalidStorefrontUrl { base_url: String, reason: String },

    #[error("probe cancelled")]
    Cancelled,
}

/// How the retry controller and the orchestrator treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Blocked,
    Permanent,
    Cancelled,
}

impl FailureClass {
    /// The persisted classification; `None` for cancellation, which is never persisted.
    #[must_use]
    pub fn error_class(self) -> Option<ErrorClass> {
        match self {
            FailureClass::Transient => Some(ErrorClass::Transient),
            FailureClass::Blocked => Some(ErrorClass::Blocked),
            FailureClass::Permanent => Some(ErrorClass::Permanent),
            FailureClass::Cancelled => None,
        }
    }
}

impl ProbeError {
    /// Maps the error into the failure taxonomy.
    ///
    /// - transient: network failure, timeout, 5xx, 408, 429 without a
    ///   challenge marker.
    /// - blocked: a response carrying an anti-automation marker.
    /// - permanent: any other 4xx, undecodable or unexpected payloads.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            ProbeError::Http(_) => FailureClass::Transient,
            ProbeError::UnexpectedStatus { status, .. } => {
                if *status >= 500 || *status == 429 || *status == 408 {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            ProbeError::Blocked { .. } => FailureClass::Blocked,
            ProbeError::Deserialize { .. }
            | ProbeError::UnexpectedShape { .. }
            | ProbeError::UnprobeablePoint { .. }
            | ProbeError::InvalidStorefrontUrl { .. } => FailureClass::Permanent,
            ProbeError::Cancelled => FailureClass::Cancelled,
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, ProbeError::UnexpectedStatus { status, .. } if *status >= 500)
    }

    /// Raw response excerpt worth persisting next to the failure, if any.
    #[must_use]
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            ProbeError::UnexpectedStatus { excerpt, .. }
            | ProbeError::Blocked { excerpt, .. }
            | ProbeError::Deserialize { excerpt, .. } => Some(excerpt.as_str()),
            _ => None,
        }
    }
}
