//! Unified error types for the scale protocol engine.
//!
//! [`ScaleError`] covers every failure a caller of the session API can see.
//! Each module also keeps its own narrower error type (`FrameError`,
//! `CalculatorError`, `TransportError`, `ConfigError`) and converts into this
//! one at the module boundary.
//!
//! # Propagation
//!
//! - Transport and configuration failures reach the caller of the session
//!   operation that hit them.
//! - Frame and calculator failures on a notification are logged and dropped
//!   inside the session; they only surface when the parser or calculator is
//!   called directly.
//!
//! # Example
//!
//! ```rust
//! use bodyscale_core::error::{Result, ScaleError};
//!
//! fn require_scale(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(ScaleError::UserCancelled);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::types::SessionState;

/// The unified error type for all scale operations.
#[derive(Debug, Error)]
pub enum ScaleError {
    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// The host has no Bluetooth Low Energy stack.
    #[error("Bluetooth Low Energy is unavailable: {0}. Check that an adapter is present and bluetoothd is running.")]
    PlatformUnsupported(String),

    /// The operator dismissed the device chooser.
    #[error("Device selection was cancelled")]
    UserCancelled,

    /// Discovery failed for a reason other than missing hardware.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// No device matched the scan filter before the scan window closed.
    #[error("No scale found matching {0}. Make sure the scale is awake and within range.")]
    DeviceNotFound(String),

    /// The transport link could not be opened.
    #[error("Failed to connect to '{device_id}': {reason}")]
    ConnectionFailed {
        /// Device the connection was attempted to.
        device_id: String,
        /// Transport-level reason.
        reason: String,
    },

    /// The connected device lacks the expected GATT service or characteristic.
    #[error("GATT attribute {0} is missing; this device is not a supported scale")]
    ServiceUnavailable(Uuid),

    /// A bounded operation did not finish in time.
    #[error("{operation} timed out after {secs} seconds")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Configured bound in seconds.
        secs: u64,
    },

    /// The operation is not allowed in the session's current state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    // =========================================================================
    // FRAME ERRORS
    // =========================================================================
    /// The notification payload is shorter than a complete frame.
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// The notification payload carries impossible field values.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // =========================================================================
    // CALCULATOR ERRORS
    // =========================================================================
    /// A metric was requested before a biometric profile was supplied.
    #[error("Body-composition calculator has no biometric profile")]
    CalculatorUninitialized,

    /// Weight, impedance or profile values outside the model's domain.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // CONFIGURATION & I/O ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for scale operations.
pub type Result<T> = std::result::Result<T, ScaleError>;

impl ScaleError {
    /// Returns `true` for failures of the BLE transport or device.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::PlatformUnsupported(_)
                | Self::UserCancelled
                | Self::ScanFailed(_)
                | Self::DeviceNotFound(_)
                | Self::ConnectionFailed { .. }
                | Self::ServiceUnavailable(_)
                | Self::Timeout { .. }
        )
    }

    /// Returns `true` for rejected notification payloads.
    #[inline]
    #[must_use]
    pub const fn is_frame_error(&self) -> bool {
        matches!(self, Self::FrameTooShort(_) | Self::MalformedFrame(_))
    }

    /// Returns `true` for configuration problems.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is an ordinary outcome rather than a fault.
    ///
    /// A dismissed device chooser is the user's choice, not a failure.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }

    /// Returns `true` if repeating the same call may succeed.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ScanFailed(_)
                | Self::DeviceNotFound(_)
                | Self::Timeout { .. }
        )
    }

    /// Returns a machine-readable error code for the host application.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PlatformUnsupported(_) => "PLATFORM_UNSUPPORTED",
            Self::UserCancelled => "USER_CANCELLED",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::FrameTooShort(_) => "FRAME_TOO_SHORT",
            Self::MalformedFrame(_) => "MALFORMED_FRAME",
            Self::CalculatorUninitialized => "CALCULATOR_UNINITIALIZED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::frame::FrameError> for ScaleError {
    fn from(err: crate::frame::FrameError) -> Self {
        use crate::frame::FrameError;
        match err {
            FrameError::TooShort { len } => Self::FrameTooShort(len),
            FrameError::Malformed(reason) => Self::MalformedFrame(reason),
        }
    }
}

impl From<crate::calculator::CalculatorError> for ScaleError {
    fn from(err: crate::calculator::CalculatorError) -> Self {
        use crate::calculator::CalculatorError;
        match err {
            CalculatorError::Uninitialized => Self::CalculatorUninitialized,
            CalculatorError::InvalidInput(message) => Self::InvalidInput(message),
        }
    }
}

impl From<crate::config::ConfigError> for ScaleError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {}", path.display(), source),
            )),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::CalculatorError;
    use crate::frame::FrameError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_transport_error_classification() {
        assert!(ScaleError::PlatformUnsupported("no adapter".into()).is_transport_error());
        assert!(ScaleError::UserCancelled.is_transport_error());
        assert!(ScaleError::ServiceUnavailable(Uuid::nil()).is_transport_error());
        assert!(ScaleError::ConnectionFailed {
            device_id: "AA".into(),
            reason: "refused".into()
        }
        .is_transport_error());

        assert!(!ScaleError::FrameTooShort(4).is_transport_error());
        assert!(!ScaleError::CalculatorUninitialized.is_transport_error());
    }

    #[test]
    fn test_frame_error_classification() {
        assert!(ScaleError::FrameTooShort(3).is_frame_error());
        assert!(ScaleError::MalformedFrame("zero weight".into()).is_frame_error());
        assert!(!ScaleError::UserCancelled.is_frame_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ScaleError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(ScaleError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(ScaleError::ConfigValidationError("bad".into()).is_config_error());
        assert!(!ScaleError::UserCancelled.is_config_error());
    }

    #[test]
    fn test_expected_state() {
        assert!(ScaleError::UserCancelled.is_expected_state());
        assert!(!ScaleError::PlatformUnsupported("x".into()).is_expected_state());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ScaleError::ConnectionFailed {
            device_id: "AA".into(),
            reason: "timeout".into()
        }
        .is_retryable());
        assert!(ScaleError::DeviceNotFound("name 'MIBFS*'".into()).is_retryable());
        assert!(ScaleError::ScanFailed("dbus".into()).is_retryable());
        assert!(ScaleError::Timeout {
            operation: "connect",
            secs: 15
        }
        .is_retryable());
        assert!(!ScaleError::ServiceUnavailable(Uuid::nil()).is_retryable());
        assert!(!ScaleError::PlatformUnsupported("x".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ScaleError::PlatformUnsupported("x".into()).error_code(),
            "PLATFORM_UNSUPPORTED"
        );
        assert_eq!(ScaleError::UserCancelled.error_code(), "USER_CANCELLED");
        assert_eq!(
            ScaleError::CalculatorUninitialized.error_code(),
            "CALCULATOR_UNINITIALIZED"
        );
        assert_eq!(
            ScaleError::InvalidState {
                operation: "subscribe",
                state: SessionState::Idle
            }
            .error_code(),
            "INVALID_STATE"
        );
    }

    #[test]
    fn test_from_module_errors() {
        let err: ScaleError = FrameError::TooShort { len: 5 }.into();
        assert!(matches!(err, ScaleError::FrameTooShort(5)));

        let err: ScaleError = FrameError::Malformed("zero".into()).into();
        assert!(matches!(err, ScaleError::MalformedFrame(_)));

        let err: ScaleError = CalculatorError::Uninitialized.into();
        assert!(matches!(err, ScaleError::CalculatorUninitialized));

        let err: ScaleError = IoErr::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ScaleError::IoError(_)));
    }

    #[test]
    fn test_error_display_messages() {
        let err = ScaleError::InvalidState {
            operation: "connect",
            state: SessionState::Disconnected,
        };
        assert_eq!(err.to_string(), "Cannot connect while session is disconnected");

        let err = ScaleError::DeviceNotFound("name 'MIBFS*'".into());
        assert!(err.to_string().contains("MIBFS"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScaleError>();
        assert_sync::<ScaleError>();
    }
}
