use crate::permission::Action;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaErrorCode {
    SchemaViolation,
    MissingRequiredAttribute,
    DuplicateName,
    DuplicateKey,
    IncompatibleAttributes,
    IncompatibleNodes,
    Unauthorized,
    InvalidPrincipalId,
    NoFactoryForType,
    Decode,
    Encode,
    Io,
}

impl MetaErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            MetaErrorCode::SchemaViolation => "schema_violation",
            MetaErrorCode::MissingRequiredAttribute => "missing_required_attribute",
            MetaErrorCode::DuplicateName => "duplicate_name",
            MetaErrorCode::DuplicateKey => "duplicate_key",
            MetaErrorCode::IncompatibleAttributes => "incompatible_attributes",
            MetaErrorCode::IncompatibleNodes => "incompatible_nodes",
            MetaErrorCode::Unauthorized => "unauthorized",
            MetaErrorCode::InvalidPrincipalId => "invalid_principal_id",
            MetaErrorCode::NoFactoryForType => "no_factory_for_type",
            MetaErrorCode::Decode => "decode",
            MetaErrorCode::Encode => "encode",
            MetaErrorCode::Io => "io",
        }
    }
}

/// Every failure the engine reports. None of them are transient: they point at
/// malformed input or a missing capability, so callers never retry blindly.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },
    #[error("missing required attribute '{key}' at {path}")]
    MissingRequiredAttribute { path: String, key: String },
    #[error("duplicate name '{name}' among children of {path}")]
    DuplicateName { path: String, name: String },
    #[error("duplicate key '{key}' at {path}")]
    DuplicateKey { path: String, key: String },
    #[error("incompatible attributes at {path}: {reason}")]
    IncompatibleAttributes { path: String, reason: String },
    #[error("incompatible nodes at {path}: {reason}")]
    IncompatibleNodes { path: String, reason: String },
    #[error("unauthorized: {action} required on {path}")]
    Unauthorized { path: String, action: Action },
    #[error("invalid principal id '{0}'")]
    InvalidPrincipalId(String),
    #[error("no factory for type name(s): {}", .unknown.join(", "))]
    NoFactoryForType { unknown: Vec<String> },
    #[error("decode error at {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetaError {
    pub fn code(&self) -> MetaErrorCode {
        match self {
            MetaError::SchemaViolation { .. } => MetaErrorCode::SchemaViolation,
            MetaError::MissingRequiredAttribute { .. } => MetaErrorCode::MissingRequiredAttribute,
            MetaError::DuplicateName { .. } => MetaErrorCode::DuplicateName,
            MetaError::DuplicateKey { .. } => MetaErrorCode::DuplicateKey,
            MetaError::IncompatibleAttributes { .. } => MetaErrorCode::IncompatibleAttributes,
            MetaError::IncompatibleNodes { .. } => MetaErrorCode::IncompatibleNodes,
            MetaError::Unauthorized { .. } => MetaErrorCode::Unauthorized,
            MetaError::InvalidPrincipalId(_) => MetaErrorCode::InvalidPrincipalId,
            MetaError::NoFactoryForType { .. } => MetaErrorCode::NoFactoryForType,
            MetaError::Decode { .. } => MetaErrorCode::Decode,
            MetaError::Encode(_) => MetaErrorCode::Encode,
            MetaError::Io(_) => MetaErrorCode::Io,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub(crate) fn schema(path: &str, reason: impl Into<String>) -> Self {
        MetaError::SchemaViolation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(path: &str, reason: impl Into<String>) -> Self {
        MetaError::Decode {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
