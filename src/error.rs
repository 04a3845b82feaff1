use thiserror::Error;

/// Errors that can occur when working with smart trainers
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No trainer found during scanning
    #[error("Trainer not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to trainer: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Trainer disconnected")]
    Disconnected,

    /// None of the known control characteristics were advertised
    #[error("No usable control endpoint found on device")]
    ControlEndpointNotFound,

    /// Writing a command to the control characteristic failed
    #[error("Failed to write command: {0}")]
    WriteFailed(String),

    /// Command timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// IO error (activity export)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Check if this error indicates a connection issue
    ///
    /// Connection errors are terminal for the current session: the command
    /// loop stops and the caller must re-enter discovery.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if this error is recoverable by retrying
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::WriteFailed(_) | Self::InvalidParameters(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = TrainerError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());

        let write_error = TrainerError::WriteFailed("characteristic busy".to_string());
        assert!(!write_error.is_connection_error());
        assert!(write_error.is_recoverable());

        let timeout_error = TrainerError::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = TrainerError::InvalidParameters("grade out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid command parameters"));
        assert!(error_string.contains("grade out of range"));
    }
}
