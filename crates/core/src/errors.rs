use thiserror::Error;

/// Failures raised while resolving or running a capability.
///
/// A denied invocation is not an error; it surfaces as
/// `InvocationOutcome::Rejected`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("unknown capability `{name}`")]
    UnknownCapability { name: String },
    #[error("capability `{name}` is already registered")]
    DuplicateCapability { name: String },
    #[error("invalid arguments for `{name}`: {reason}")]
    InvalidArguments { name: String, reason: String },
    #[error("capability `{name}` failed: {message}")]
    ExecutionFailed { name: String, message: String },
}

impl CapabilityError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownCapability { name: name.into() }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::DuplicateCapability { .. } => "duplicate_capability",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }

    /// Text handed back to the model in place of a function result.
    pub fn to_result_text(&self) -> String {
        format!("Error: {self}")
    }
}

/// Failures talking to services outside the process (the model endpoint,
/// third-party data APIs).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("service `{service}` requires credentials that were not configured")]
    MissingCredentials { service: String },
    #[error("network error calling `{service}`: {message}")]
    Network { service: String, message: String },
    #[error("`{service}` responded with HTTP {status}: {message}")]
    Status { service: String, status: u16, message: String },
    #[error("`{service}` returned an invalid response: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl UpstreamError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingCredentials { .. } => "The service is not configured with credentials.",
            Self::Network { .. } => "The service could not be reached. Please retry shortly.",
            Self::Status { .. } => "The service rejected the request.",
            Self::InvalidResponse { .. } => "The service returned a response that could not be read.",
        }
    }
}
