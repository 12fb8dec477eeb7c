//! Error types for the pulsed CLI application.
//!
//! Everything that can stop a command wraps into [`PulsedErrors`]:
//! - user interaction errors
//! - configuration, store and model errors from the pulse library
//! - file system operations
//! - pattern matching errors while cleaning database side files
//!
//! Errors are transparent so the underlying message reaches the user unchanged.

use thiserror::Error;

/// Errors that can occur during CLI operations.
///
/// # Examples
///
/// ```ignore
/// use std::path::PathBuf;
///
/// # fn example() -> Result<(), PulsedErrors> {
/// // File operations may result in IO errors
/// std::fs::create_dir_all(PathBuf::from("some/path"))?;
///
/// // User interactions may result in Dialoguer errors
/// let confirmed = dialoguer::Confirm::new().with_prompt("Continue?").interact()?;
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum PulsedErrors {
  /// Errors from user interaction dialogs
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the underlying pulse library
  #[error(transparent)]
  Pulse(#[from] pulse::errors::PulseError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// Glob pattern matching errors
  #[error(transparent)]
  Glob(#[from] glob::PatternError),
}
