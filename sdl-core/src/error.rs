use thiserror::Error;

/// Engine-wide error taxonomy. Control-plane handlers map these onto HTTP
/// status codes via [`SdlError::http_status`].
#[derive(Debug, Error)]
pub enum SdlError {
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("construction failed: {} problem(s)", .0.len())]
    Construction(Vec<ConstructionProblem>),

    #[error("evaluation error at {component}.{method}: {message}")]
    Evaluation {
        component: String,
        method: String,
        message: String,
    },

    #[error("flow error: {0}")]
    Flow(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SdlError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse { .. } | Self::Type(_) | Self::Construction(_) => 422,
            Self::Evaluation { .. } => 422,
            Self::Flow(_) => 422,
            Self::InvalidArgument(_) => 400,
            Self::NotFound(_) => 404,
            Self::FailedPrecondition(_) => 412,
            Self::DeadlineExceeded(_) => 504,
            Self::ResourceExhausted(_) => 429,
            Self::Internal(_) => 500,
        }
    }

    /// The wire-level error code string carried in response bodies and
    /// stream terminating frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::Type(_) => "type_error",
            Self::Construction(_) => "construction_error",
            Self::Evaluation { .. } => "evaluation_error",
            Self::Flow(_) => "flow_error",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Internal(_) => "internal",
        }
    }
}

/// One unresolved dependency or type mismatch found while constructing a
/// system instance. Construction reports all of them at once.
#[derive(Debug, Clone)]
pub struct ConstructionProblem {
    pub instance: String,
    pub detail: String,
}

impl std::fmt::Display for ConstructionProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.instance, self.detail)
    }
}

pub type Result<T> = std::result::Result<T, SdlError>;
