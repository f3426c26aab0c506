//! Error taxonomy for the agent.
//!
//! Every failure surfaced to the dispatcher maps onto one of the variants
//! here. Codec, resolve, and upstream failures are reported per invocation;
//! configuration failures terminate the process at startup.

use std::time::Duration;

use thiserror::Error;

/// The serialized HTTP request or response could not be parsed or rebuilt.
#[derive(Debug, Error)]
pub enum CodecError {
  #[error("malformed HTTP message: {0}")]
  Malformed(#[from] httparse::Error),
  /// The byte slice ends before the message does.
  #[error("incomplete HTTP message")]
  Incomplete,
  #[error("invalid content-length header")]
  InvalidContentLength,
  #[error("body truncated: expected {expected} bytes, found {found}")]
  TruncatedBody { expected: usize, found: usize },
  #[error("invalid HTTP message: {0}")]
  Http(#[from] http::Error),
}

/// A function name could not be turned into a reachable backend endpoint.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("{0} not found")]
  NotFound(String),
  /// The lookup succeeded but the record does not form a valid URL.
  #[error("invalid backend url: {0}")]
  InvalidUrl(String),
}

/// A single outbound HTTP attempt failed.
///
/// Transport-level variants are retryable; an HTTP-level response of any
/// status is a success at this layer and never produces a `ForwardError`.
#[derive(Debug, Error)]
pub enum ForwardError {
  #[error("request target has no scheme or authority")]
  BadUri,
  #[error("transport failure: {0}")]
  Transport(Box<dyn std::error::Error + Send + Sync>),
  #[error("upstream read timed out after {0:?}")]
  Timeout(Duration),
}

impl ForwardError {
  /// Whether this failure consumes the retry budget instead of failing fast.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transport(_) | Self::Timeout(_))
  }
}

/// Invocation-level error reported back to the dispatcher.
#[derive(Debug, Error)]
pub enum AgentError {
  #[error("failed to decode {stage}: {source}")]
  Codec {
    stage: &'static str,
    #[source]
    source: CodecError,
  },
  #[error(transparent)]
  Resolve(#[from] ResolveError),
  /// The forward failed on every attempt the retry budget allowed.
  #[error("upstream forward failed after {attempts} attempts: {source}")]
  Upstream {
    attempts: u32,
    #[source]
    source: ForwardError,
  },
  #[error(transparent)]
  Forward(#[from] ForwardError),
}

/// A startup configuration value is missing or unparseable.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {var}")]
  Invalid { var: &'static str, value: String },
  #[error("{var} must be set when {feature} is enabled")]
  Missing {
    var: &'static str,
    feature: &'static str,
  },
}
