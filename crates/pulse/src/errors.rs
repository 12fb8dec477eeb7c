//! Error types for the pulse library.
//!
//! Only configuration mistakes and store failures surface as [`PulseError`] to callers of the
//! pipeline. Failures of the external model are caught at each call site and reported through
//! [`Outcome`](crate::outcome::Outcome) instead, so a single bad article never aborts a batch.
//!
//! # Examples
//!
//! ```
//! use pulse::{config::Config, errors::PulseError};
//!
//! let mut config = Config::default();
//! config.journals.clear();
//! match config.validate() {
//!   Err(PulseError::Config(message)) => println!("bad config: {message}"),
//!   Err(e) => println!("other error: {e}"),
//!   Ok(()) => println!("config is fine"),
//! }
//! ```

use thiserror::Error;

/// Errors that can occur inside the ingestion pipeline.
#[derive(Error, Debug)]
pub enum PulseError {
  /// A network request failed before a response arrived.
  ///
  /// This covers DNS failures, refused connections and TLS errors.
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A request exceeded the configured timeout.
  #[error("request timed out after {0}s")]
  Timeout(u64),

  /// A remote service answered with a non-success status.
  ///
  /// The string carries the status and the response body for debugging.
  #[error("API error: {0}")]
  ApiError(String),

  /// A remote service answered, but the body did not have the expected shape.
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  /// A feed document could not be parsed as RSS or Atom.
  #[error("invalid feed: {0}")]
  InvalidFeed(String),

  /// The configuration is unusable.
  ///
  /// Raised at startup by [`Config::validate`](crate::config::Config::validate) so that a
  /// batch never starts with a broken journal list or taxonomy.
  #[error("configuration error: {0}")]
  Config(String),

  /// A field name outside the configured taxonomy was requested.
  #[error("unknown research field: {0}")]
  UnknownField(String),

  /// The requested article does not exist in the store.
  #[error("article not found")]
  NotFound,

  /// Failed to parse a URL.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// JSON (de)serialisation failed, typically while reading a config file.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// A SQLite operation failed.
  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  /// An async SQLite operation failed.
  #[error(transparent)]
  AsyncSqlite(#[from] tokio_rusqlite::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),
}

impl PulseError {
  /// Checks if this error is a uniqueness violation in the store.
  ///
  /// The store reports duplicates as a normal outcome, so this mostly matters to code that
  /// writes to the database through its own statements.
  pub fn is_duplicate_error(&self) -> bool {
    let sqlite = match self {
      PulseError::Sqlite(e) => e,
      PulseError::AsyncSqlite(tokio_rusqlite::Error::Rusqlite(e)) => e,
      _ => return false,
    };
    matches!(
        sqlite,
        rusqlite::Error::SqliteFailure(error, _)
          if error.code == rusqlite::ErrorCode::ConstraintViolation
    )
  }

  /// Whether this error came from a remote service rather than from local state.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      PulseError::Network(_)
        | PulseError::Timeout(_)
        | PulseError::ApiError(_)
        | PulseError::InvalidResponse(_)
        | PulseError::InvalidFeed(_)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unique_violation_is_duplicate() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE t (link TEXT UNIQUE); INSERT INTO t VALUES ('a');").unwrap();
    let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();

    let err = PulseError::from(err);
    assert!(err.is_duplicate_error());
    assert!(!err.is_transient());
    assert!(!PulseError::NotFound.is_duplicate_error());
    assert!(PulseError::Timeout(30).is_transient());
  }
}
