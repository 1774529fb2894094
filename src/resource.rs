//! Three-state value emitted by repository streams.

use crate::error::FetchError;

/// One emission of a repository result stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource<T> {
  /// Work has started; always the first emission
  Loading,
  /// Current contents of the cache (or of a fallback read)
  Success(T),
  /// Terminal failure; the stream ends after this
  Error(FetchError),
}

impl<T> Resource<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, Resource::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Resource::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Resource::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Resource::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&FetchError> {
    match self {
      Resource::Error(e) => Some(e),
      _ => None,
    }
  }
}
