//! Unified error taxonomy with stable error codes for SlideForge.
//!
//! Every internal error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. This is the fine-grained diagnostic
//! surface logged and attached to traces; the job-facing [`ErrorKind`] is
//! the coarse client-visible contract returned on `Job.error`.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or invalid caller input.
    Input,
    /// A pipeline stage failed to produce its artifact.
    Stage,
    /// The model client pool could not reach or use a provider.
    Model,
    /// Job or artifact persistence errors.
    Store,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Stage => "stage",
            Self::Model => "model",
            Self::Store => "store",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that does
/// not change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller-supplied job payload failed validation.
    InputInvalidPayload,
    /// A referenced template or config id does not exist.
    InputNotFound,
    /// A precondition job (e.g. template analysis) has not completed.
    InputPreconditionMissing,

    /// The parse stage could not produce an outline.
    StageParseFailed,
    /// The template-analysis stage could not produce layout features.
    StageAnalyzeFailed,
    /// The content-planning stage could not produce a content plan.
    StagePlanFailed,
    /// The slide-generation stage could not produce slides.
    StageGenerateFailed,
    /// The finalize stage could not assemble the output artifact.
    StageFinalizeFailed,
    /// The validation loop could not complete within its bounds.
    StageValidationFailed,

    /// No model client is registered for the requested kind.
    ModelNotConfigured,
    /// The model provider did not respond within the configured timeout.
    ModelTimeout,
    /// The model provider returned an error after exhausting retries.
    ModelUnavailable,

    /// Failed to read or write a job record.
    StoreIoFailed,
    /// The requested state transition is not legal from the current state.
    StoreIllegalTransition,
    /// Failed to read or write an artifact cache entry.
    StoreCacheFailed,

    /// Configuration file or value is invalid.
    ConfigInvalid,

    /// The operation was cancelled before completion.
    Cancelled,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InputInvalidPayload | Self::InputNotFound | Self::InputPreconditionMissing => {
                ErrorCategory::Input
            }
            Self::StageParseFailed
            | Self::StageAnalyzeFailed
            | Self::StagePlanFailed
            | Self::StageGenerateFailed
            | Self::StageFinalizeFailed
            | Self::StageValidationFailed => ErrorCategory::Stage,
            Self::ModelNotConfigured | Self::ModelTimeout | Self::ModelUnavailable => {
                ErrorCategory::Model
            }
            Self::StoreIoFailed | Self::StoreIllegalTransition | Self::StoreCacheFailed => {
                ErrorCategory::Store
            }
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Cancelled | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputInvalidPayload => "INPUT_INVALID_PAYLOAD",
            Self::InputNotFound => "INPUT_NOT_FOUND",
            Self::InputPreconditionMissing => "INPUT_PRECONDITION_MISSING",
            Self::StageParseFailed => "STAGE_PARSE_FAILED",
            Self::StageAnalyzeFailed => "STAGE_ANALYZE_FAILED",
            Self::StagePlanFailed => "STAGE_PLAN_FAILED",
            Self::StageGenerateFailed => "STAGE_GENERATE_FAILED",
            Self::StageFinalizeFailed => "STAGE_FINALIZE_FAILED",
            Self::StageValidationFailed => "STAGE_VALIDATION_FAILED",
            Self::ModelNotConfigured => "MODEL_NOT_CONFIGURED",
            Self::ModelTimeout => "MODEL_TIMEOUT",
            Self::ModelUnavailable => "MODEL_UNAVAILABLE",
            Self::StoreIoFailed => "STORE_IO_FAILED",
            Self::StoreIllegalTransition => "STORE_ILLEGAL_TRANSITION",
            Self::StoreCacheFailed => "STORE_CACHE_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified SlideForge internal error.
pub struct SfError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl SfError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for SfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SfError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for SfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serialisable snapshot of an [`SfError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SfErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&SfError> for SfErrorDto {
    fn from(err: &SfError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<SfErrorDto> for SfError {
    fn from(dto: SfErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn basic_construction() {
        let err = SfError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = SfError::new(ErrorCode::ModelTimeout, "no response");
        assert_eq!(err.to_string(), "[MODEL_TIMEOUT] no response");
    }

    #[test]
    fn display_with_context() {
        let err = SfError::new(ErrorCode::ModelTimeout, "timed out")
            .with_context("timeout_ms", 5000);
        let s = err.to_string();
        assert!(s.starts_with("[MODEL_TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
        assert!(s.contains("5000"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = SfError::new(ErrorCode::StoreIoFailed, "read failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn category_mapping_is_exhaustive_and_consistent() {
        let cases = [
            (ErrorCode::InputInvalidPayload, ErrorCategory::Input),
            (ErrorCode::StageParseFailed, ErrorCategory::Stage),
            (ErrorCode::ModelUnavailable, ErrorCategory::Model),
            (ErrorCode::StoreIllegalTransition, ErrorCategory::Store),
            (ErrorCode::ConfigInvalid, ErrorCategory::Config),
            (ErrorCode::Cancelled, ErrorCategory::Internal),
        ];
        for (code, expected) in cases {
            assert_eq!(code.category(), expected);
        }
    }

    #[test]
    fn dto_roundtrip_preserves_context() {
        let err = SfError::new(ErrorCode::StageGenerateFailed, "slide 3 failed")
            .with_context("slide_index", 3);
        let dto: SfErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: SfErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, ErrorCode::StageGenerateFailed);
        assert_eq!(back.context.get("slide_index").unwrap(), 3);
    }

    #[test]
    fn error_code_serde_is_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::StoreIllegalTransition).unwrap();
        assert_eq!(json, "\"STORE_ILLEGAL_TRANSITION\"");
    }
}
