//! Error kinds surfaced through repository result streams.

use thiserror::Error;

/// Why a repository call could not produce data.
///
/// Causes from the underlying adapters are flattened to strings so the error
/// can be cloned into every subscriber's stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Transport failure, timeout, bad HTTP status, or undecodable body
  #[error("network request failed: {0}")]
  Network(String),

  /// Nothing cached and the network was not (or could not be) used
  #[error("no cached countries available")]
  EmptyCache,

  /// Neither the cache nor the remote API know this code
  #[error("country not found: {0}")]
  NotFound(String),

  /// Reading or writing the local cache failed
  #[error("cache storage failed: {0}")]
  Storage(String),
}

impl FetchError {
  pub fn network(err: impl std::fmt::Display) -> Self {
    Self::Network(err.to_string())
  }

  pub fn storage(err: impl std::fmt::Display) -> Self {
    Self::Storage(err.to_string())
  }

  /// Whether a policy's cache fallback may replace this error.
  ///
  /// Storage failures always surface.
  pub fn allows_fallback(&self) -> bool {
    matches!(self, Self::Network(_) | Self::NotFound(_))
  }

  /// Human-readable hint for the terminal.
  pub fn user_message(&self) -> String {
    match self {
      Self::Network(_) => "Could not reach the countries service. Check your connection and try again.".to_string(),
      Self::EmptyCache => "No countries are cached yet. Run without --policy cache-only while online.".to_string(),
      Self::NotFound(code) => format!("No country with code '{}'.", code),
      Self::Storage(_) => "The local cache could not be read. Try `countrydex clear`.".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fallback_applies_to_remote_failures_only() {
    assert!(FetchError::network("timed out").allows_fallback());
    assert!(FetchError::NotFound("XYZ".into()).allows_fallback());
    assert!(!FetchError::EmptyCache.allows_fallback());
    assert!(!FetchError::storage("disk full").allows_fallback());
  }

  #[test]
  fn test_user_message_names_the_code() {
    let msg = FetchError::NotFound("XYZ".into()).user_message();
    assert!(msg.contains("XYZ"));
  }

  #[test]
  fn test_display_keeps_cause() {
    let err = FetchError::network("connection refused");
    assert_eq!(err.to_string(), "network request failed: connection refused");
  }
}
