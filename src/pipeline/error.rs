//! Pipeline error taxonomy (spec §7)
//!
//! `PipelineError` is the single error currency crossing the controller /
//! worker boundary. NAPI-facing code (the `#[napi]` controller only) converts
//! it to a DOMException at the outermost boundary, reusing the helpers in
//! `webcodecs::error` so the pipeline's errors pass the same `instanceof
//! DOMException` checks the rest of the crate's surface already does.

use crate::webcodecs::error::DOMExceptionName;
use std::fmt;

/// Error taxonomy, one kind per spec §7 entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
  NotSupported,
  ConfigurationError,
  InitializationFailed,
  InvalidInput,
  VideoEncodingError,
  AudioEncodingError,
  MuxingFailed,
  Cancelled,
  InvalidState,
  /// Presentation timestamp did not satisfy the monotonic-per-stream
  /// invariant (spec §4.2).
  TimestampOrdering,
  /// Source produced no derivable length (spec §4.1).
  UnknownLength,
  InternalError,
}

impl PipelineErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      PipelineErrorKind::NotSupported => "NotSupported",
      PipelineErrorKind::ConfigurationError => "ConfigurationError",
      PipelineErrorKind::InitializationFailed => "InitializationFailed",
      PipelineErrorKind::InvalidInput => "InvalidInput",
      PipelineErrorKind::VideoEncodingError => "video-encoding-error",
      PipelineErrorKind::AudioEncodingError => "audio-encoding-error",
      PipelineErrorKind::MuxingFailed => "MuxingFailed",
      PipelineErrorKind::Cancelled => "Cancelled",
      PipelineErrorKind::InvalidState => "InvalidState",
      PipelineErrorKind::TimestampOrdering => "TimestampOrdering",
      PipelineErrorKind::UnknownLength => "UnknownLength",
      PipelineErrorKind::InternalError => "InternalError",
    }
  }

  /// Map to the nearest DOMException name for the NAPI boundary. Kinds with
  /// no W3C analogue (ordering/internal bookkeeping) surface as `EncodingError`.
  fn dom_exception_name(&self) -> DOMExceptionName {
    match self {
      PipelineErrorKind::NotSupported => DOMExceptionName::NotSupportedError,
      PipelineErrorKind::ConfigurationError => DOMExceptionName::TypeError,
      PipelineErrorKind::InitializationFailed => DOMExceptionName::EncodingError,
      PipelineErrorKind::InvalidInput => DOMExceptionName::DataError,
      PipelineErrorKind::VideoEncodingError | PipelineErrorKind::AudioEncodingError => {
        DOMExceptionName::EncodingError
      }
      PipelineErrorKind::MuxingFailed => DOMExceptionName::EncodingError,
      PipelineErrorKind::Cancelled => DOMExceptionName::AbortError,
      PipelineErrorKind::InvalidState => DOMExceptionName::InvalidStateError,
      PipelineErrorKind::TimestampOrdering => DOMExceptionName::DataError,
      PipelineErrorKind::UnknownLength => DOMExceptionName::TypeError,
      PipelineErrorKind::InternalError => DOMExceptionName::EncodingError,
    }
  }
}

/// A pipeline error: a kind, a human-readable message, and an optional cause
/// chain (spec §7: "include...the originating error as a cause chain").
#[derive(Debug, thiserror::Error)]
pub struct PipelineError {
  pub kind: PipelineErrorKind,
  pub message: String,
  #[source]
  pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for PipelineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind.as_str(), self.message)
  }
}

impl PipelineError {
  pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      cause: None,
    }
  }

  pub fn with_cause(
    kind: PipelineErrorKind,
    message: impl Into<String>,
    cause: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self {
      kind,
      message: message.into(),
      cause: Some(Box::new(cause)),
    }
  }

  /// Cancellation never produces other error kinds for in-flight operations
  /// (spec §7); this rewrites any in-flight error to `Cancelled`.
  pub fn rewrite_as_cancelled(self) -> Self {
    Self {
      kind: PipelineErrorKind::Cancelled,
      message: self.message,
      cause: self.cause,
    }
  }

  pub fn to_napi_error(&self) -> napi::Error {
    napi::Error::new(
      napi::Status::GenericFailure,
      format!("{}: {}", self.kind.as_str(), self.message),
    )
  }

  pub fn dom_exception_name(&self) -> DOMExceptionName {
    self.kind.dom_exception_name()
  }
}

impl From<crate::codec::CodecError> for PipelineError {
  fn from(err: crate::codec::CodecError) -> Self {
    PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, err.to_string(), err)
  }
}

impl From<napi::Error> for PipelineError {
  fn from(err: napi::Error) -> Self {
    PipelineError::new(PipelineErrorKind::InternalError, err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rewrite_as_cancelled_preserves_message() {
    let err = PipelineError::new(PipelineErrorKind::VideoEncodingError, "boom").rewrite_as_cancelled();
    assert_eq!(err.kind, PipelineErrorKind::Cancelled);
    assert_eq!(err.message, "boom");
  }

  #[test]
  fn display_includes_kind_and_message() {
    let err = PipelineError::new(PipelineErrorKind::InvalidState, "closed");
    assert_eq!(err.to_string(), "InvalidState: closed");
  }
}
