use std::fmt;

/// Closed set of failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Rejected locally before any request was built.
    InvalidInput,
    ClientUninitialized,
    InvalidCredential,
    SafetyRejected,
    RateLimited,
    ServiceUnavailable,
    InvalidRequest,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ClientUninitialized => "client_uninitialized",
            Self::InvalidCredential => "invalid_credential",
            Self::SafetyRejected => "safety_rejected",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a generate/edit/upscale call.
///
/// `Display` is the user-facing message. The raw diagnostic text, when there is one,
/// is available through [`GenerationError::detail`] and goes to the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("A prompt is required.")]
    EmptyPrompt,

    #[error("An instruction is required to edit an image.")]
    EmptyInstruction,

    #[error("The image data is not valid base64.")]
    InvalidImageData,

    #[error("There is no image to work on yet. Generate or open one first.")]
    NoCurrentImage,

    #[error("The image client is not initialized. Set API_KEY (or GEMINI_API_KEY) and try again.")]
    ClientUninitialized,

    #[error("The API key is invalid or missing. Please ensure it is configured correctly.")]
    InvalidCredential { detail: String },

    #[error("The request was blocked by the safety filter. Please adjust your prompt and try again.")]
    SafetyRejected { detail: String },

    #[error("You have made too many requests in a short period. Please wait a moment and try again.")]
    RateLimited { detail: String },

    #[error("The image service is currently experiencing issues. Please try again later.")]
    ServiceUnavailable { detail: String },

    #[error("The request was invalid. The service reported: {detail}")]
    InvalidRequest { detail: String },

    #[error("An unexpected error occurred while talking to the image service. Re-run with RUST_LOG=debug to see the diagnostic log.")]
    Unknown { detail: String },
}

impl GenerationError {
    /// Builds the error for a remote failure already assigned to `kind`.
    pub fn remote(kind: FailureKind, detail: String) -> Self {
        match kind {
            FailureKind::InvalidCredential => Self::InvalidCredential { detail },
            FailureKind::SafetyRejected => Self::SafetyRejected { detail },
            FailureKind::RateLimited => Self::RateLimited { detail },
            FailureKind::ServiceUnavailable => Self::ServiceUnavailable { detail },
            FailureKind::InvalidRequest => Self::InvalidRequest { detail },
            FailureKind::ClientUninitialized => Self::ClientUninitialized,
            FailureKind::InvalidInput | FailureKind::Unknown => Self::Unknown { detail },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EmptyPrompt
            | Self::EmptyInstruction
            | Self::InvalidImageData
            | Self::NoCurrentImage => FailureKind::InvalidInput,
            Self::ClientUninitialized => FailureKind::ClientUninitialized,
            Self::InvalidCredential { .. } => FailureKind::InvalidCredential,
            Self::SafetyRejected { .. } => FailureKind::SafetyRejected,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::ServiceUnavailable { .. } => FailureKind::ServiceUnavailable,
            Self::InvalidRequest { .. } => FailureKind::InvalidRequest,
            Self::Unknown { .. } => FailureKind::Unknown,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::InvalidCredential { detail }
            | Self::SafetyRejected { detail }
            | Self::RateLimited { detail }
            | Self::ServiceUnavailable { detail }
            | Self::InvalidRequest { detail }
            | Self::Unknown { detail } => Some(detail.as_str()),
            _ => None,
        }
    }

    /// Worth retrying the same request after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::RateLimited | FailureKind::ServiceUnavailable
        )
    }
}
