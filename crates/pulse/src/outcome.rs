//! Result of a call to an unreliable external stage.
//!
//! Every stage that talks to the model always produces a usable value, even when the model
//! failed. [`Outcome`] records *how* that value was obtained so that callers and tests can tell
//! "fully succeeded" apart from "degraded but proceeded".

use std::fmt;

/// A value produced by an external stage together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
  /// The service answered and the answer was used as-is.
  Success(T),
  /// The service answered, but the answer was unusable and fallbacks were substituted.
  Fallback {
    /// The value built from fallbacks.
    value:  T,
    /// Why the answer could not be used.
    reason: String,
  },
  /// The service could not be reached or refused the request.
  Failed {
    /// The fail-safe default.
    value:  T,
    /// The underlying error, rendered for logs.
    reason: String,
  },
}

impl<T> Outcome<T> {
  /// Borrow the carried value regardless of how it was obtained.
  pub fn value(&self) -> &T {
    match self {
      Outcome::Success(value) => value,
      Outcome::Fallback { value, .. } | Outcome::Failed { value, .. } => value,
    }
  }

  /// Take the carried value regardless of how it was obtained.
  pub fn into_value(self) -> T {
    match self {
      Outcome::Success(value) => value,
      Outcome::Fallback { value, .. } | Outcome::Failed { value, .. } => value,
    }
  }

  /// `true` only for [`Outcome::Success`].
  pub fn is_success(&self) -> bool { matches!(self, Outcome::Success(_)) }

  /// `true` for [`Outcome::Failed`].
  pub fn is_failed(&self) -> bool { matches!(self, Outcome::Failed { .. }) }

  /// The degradation reason, if any.
  pub fn reason(&self) -> Option<&str> {
    match self {
      Outcome::Success(_) => None,
      Outcome::Fallback { reason, .. } | Outcome::Failed { reason, .. } => Some(reason),
    }
  }

  /// Transform the carried value, keeping the outcome kind.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
    match self {
      Outcome::Success(value) => Outcome::Success(f(value)),
      Outcome::Fallback { value, reason } => Outcome::Fallback { value: f(value), reason },
      Outcome::Failed { value, reason } => Outcome::Failed { value: f(value), reason },
    }
  }
}

impl<T> fmt::Display for Outcome<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Success(_) => write!(f, "success"),
      Outcome::Fallback { reason, .. } => write!(f, "fallback ({reason})"),
      Outcome::Failed { reason, .. } => write!(f, "failed ({reason})"),
    }
  }
}
