//! # bodyscale-core
//!
//! Protocol engine for Bluetooth Low Energy body-composition scales.
//!
//! This crate provides:
//! - A device session that discovers, connects to and subscribes to a scale
//! - Decoding of raw measurement notifications
//! - Derivation of body-composition metrics from weight and impedance
//! - An explicitly labelled simulation path for hosts without hardware
//!
//! ## Architecture
//!
//! - [`session`] - Connection state machine and measurement sinks
//! - [`frame`] - Notification frame decoding
//! - [`calculator`] - Bioimpedance regression model
//! - [`simulation`] - Synthetic readings through the same decoder and model
//! - [`transport`] - The platform BLE boundary as a trait
//! - `bluetooth` - BlueZ transport (feature `bluetooth`, Linux only)
//! - `mock` - Scripted transport (feature `mock-bluetooth`)
//! - [`config`] - Configuration loading, saving and validation
//! - [`error`] - Unified error type for the crate
//! - [`types`] - Shared value types and GATT identifiers

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(all(feature = "bluetooth", target_os = "linux"))]
pub mod bluetooth;
pub mod calculator;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod session;
pub mod simulation;
pub mod transport;
pub mod types;

#[cfg(all(feature = "bluetooth", target_os = "linux"))]
pub use bluetooth::BluerTransport;
pub use calculator::{
    BioimpedanceCalculator, BiometricProfile, BodyComposition, CalculatorError, CalculatorResult,
    Sex,
};
pub use config::{
    default_config_path, is_valid_mac_address, BluetoothConfig, ConfigError, ConfigResult,
    ProfileConfig, ScaleConfig, SessionSettings,
};
pub use error::{Result, ScaleError};
pub use frame::{FrameError, FrameResult, MIN_FRAME_LEN};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{MockHandle, MockTransport};
pub use session::{ScaleSession, SessionConfig, SessionStats};
pub use simulation::MeasurementSimulator;
pub use transport::{
    AcceptAll, BleTransport, DeviceChooser, DiscoveredDevice, Notifications, ScanFilter,
    TransportError, TransportResult,
};
pub use types::{
    gatt, ConnectionState, DecodedReading, DeviceHandle, MeasurementSource, ScaleMeasurement,
    SessionState,
};
