use thiserror::Error;

use crate::device::HalaDeviceError;

/// The error type of the hala-world crate.
#[derive(Error, Debug)]
pub struct HalaWorldError {
  msg: String,
  #[source]
  source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// The implementation of the error type of the hala-world crate.
impl HalaWorldError {
  /// Create a new error.
  /// param msg: The message of the error.
  /// param source: The source of the error.
  /// return: The error.
  pub fn new(msg: &str, source: Option<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self {
      msg: msg.to_string(),
      source,
    }
  }

  pub fn message(&self) -> &str {
    &self.msg
  }

  /// Check whether the error was raised by the device because it ran out of memory.
  /// return: True if the root cause is a device out-of-memory error.
  pub fn is_out_of_memory(&self) -> bool {
    self.source.as_ref()
      .and_then(|err| err.downcast_ref::<HalaDeviceError>())
      .map_or(false, |err| matches!(err, HalaDeviceError::OutOfMemory(_)))
  }
}

impl std::convert::From<HalaDeviceError> for HalaWorldError {
  fn from(err: HalaDeviceError) -> Self {
    Self {
      msg: err.to_string(),
      source: Some(Box::new(err)),
    }
  }
}

impl std::convert::From<serde_json::Error> for HalaWorldError {
  fn from(err: serde_json::Error) -> Self {
    Self {
      msg: format!("JSON (de)serialization failed: {}", err),
      source: Some(Box::new(err)),
    }
  }
}

/// The implementation Display trait for the error type of the hala-world crate.
impl std::fmt::Display for HalaWorldError {
  /// Format the error.
  /// param f: The formatter.
  /// return: The result.
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.msg)
  }
}
