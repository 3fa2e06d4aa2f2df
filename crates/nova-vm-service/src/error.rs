use nova_cdp::CdpError;
use serde_json::{json, Value};
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// JSON-RPC "method not found"; reported for operations with no backend equivalent.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_SERVER_ERROR: i64 = -32000;
pub const CODE_CANNOT_ADD_BREAKPOINT: i64 = 102;
pub const CODE_ISOLATE_MUST_BE_PAUSED: i64 = 106;
pub const CODE_EXPRESSION_COMPILATION_ERROR: i64 = 113;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("cannot add breakpoint: {0}")]
    InvalidLocation(String),

    #[error("{0} is not supported")]
    Unsupported(String),

    #[error("unknown method {0}")]
    MethodNotFound(String),

    #[error("isolate must be paused: {0}")]
    NotPaused(String),

    #[error("expression compilation error: {0}")]
    Compile(String),

    #[error("service extension failed: {message}")]
    Extension {
        code: i64,
        message: String,
        details: String,
    },

    #[error("failed to read source {uri}: {message}")]
    Asset { uri: String, message: String },

    #[error("backend: {0}")]
    Backend(#[from] CdpError),
}

impl ServiceError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(message.into())
    }

    /// Frontend JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            ServiceError::InvalidArgument(_) => CODE_INVALID_PARAMS,
            ServiceError::InvalidLocation(_) => CODE_CANNOT_ADD_BREAKPOINT,
            ServiceError::Unsupported(_) | ServiceError::MethodNotFound(_) => {
                CODE_METHOD_NOT_FOUND
            }
            ServiceError::NotPaused(_) => CODE_ISOLATE_MUST_BE_PAUSED,
            ServiceError::Compile(_) => CODE_EXPRESSION_COMPILATION_ERROR,
            ServiceError::Extension { code, .. } => *code,
            ServiceError::Asset { .. } | ServiceError::Backend(_) => CODE_SERVER_ERROR,
        }
    }

    /// Structured `error.data` payload, if any.
    pub fn data(&self) -> Option<Value> {
        match self {
            ServiceError::Compile(details) => Some(json!({ "details": details })),
            ServiceError::Extension { details, .. } => Some(json!({ "details": details })),
            ServiceError::Backend(CdpError::CommandFailed {
                method,
                code,
                message,
            }) => Some(json!({
                "details": message,
                "backendMethod": method,
                "backendCode": code,
            })),
            ServiceError::Backend(err) => Some(json!({ "details": err.to_string() })),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ServiceError::Unsupported(_))
    }
}
