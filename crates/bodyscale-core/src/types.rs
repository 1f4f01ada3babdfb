//! Shared types for the scale protocol engine.
//!
//! This module holds the values that cross module boundaries: decoded frames,
//! finished measurements, device handles and the GATT identifiers of the
//! supported scale.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculator::BodyComposition;

/// GATT identifiers used by the supported body-composition scale.
pub mod gatt {
    use uuid::Uuid;

    /// Body-composition service carrying measurement notifications.
    pub const BODY_COMPOSITION_SERVICE: Uuid =
        Uuid::from_u128(0x0000_181a_0000_1000_8000_0080_5f9b_34fb);

    /// Measurement characteristic inside [`BODY_COMPOSITION_SERVICE`].
    pub const MEASUREMENT_CHARACTERISTIC: Uuid =
        Uuid::from_u128(0x0000_2a2f_0000_1000_8000_0080_5f9b_34fb);

    /// Vendor configuration service.
    pub const VENDOR_CONFIG_SERVICE: Uuid =
        Uuid::from_u128(0x0000_1530_0000_3512_2118_0009_af10_0700);

    /// Vendor configuration characteristic accepting command bytes.
    pub const VENDOR_CONFIG_CHARACTERISTIC: Uuid =
        Uuid::from_u128(0x0000_1542_0000_3512_2118_0009_af10_0700);
}

/// A frame that passed length and field validation.
///
/// Produced by [`crate::frame::parse`] and consumed immediately by the
/// calculator; never persisted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedReading {
    /// Control flags from byte 0 of the frame.
    pub control_byte: u8,

    /// Weight in units of 0.1 kg.
    pub weight_raw: u16,

    /// Bioelectrical impedance in ohms.
    pub impedance_raw: u16,
}

impl DecodedReading {
    /// Control bit set once the scale reports the bioimpedance sweep finished.
    pub const FLAG_IMPEDANCE: u8 = 0b0000_0010;

    /// Control bit set once the weight has settled.
    pub const FLAG_STABILIZED: u8 = 0b0010_0000;

    /// Weight in kilograms.
    #[must_use]
    pub fn weight_kg(&self) -> f64 {
        f64::from(self.weight_raw) / 10.0
    }

    /// Impedance in ohms.
    #[must_use]
    pub fn impedance_ohms(&self) -> f64 {
        f64::from(self.impedance_raw)
    }

    /// Whether the device flagged the weight as stable.
    #[must_use]
    pub const fn is_stabilized(&self) -> bool {
        self.control_byte & Self::FLAG_STABILIZED != 0
    }

    /// Whether the device flagged the impedance sweep as complete.
    #[must_use]
    pub const fn has_impedance(&self) -> bool {
        self.control_byte & Self::FLAG_IMPEDANCE != 0
    }
}

/// Where a measurement came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementSource {
    /// Decoded from a notification sent by a physical scale.
    Device {
        /// Identifier of the device that sent the frame.
        device_id: String,
    },

    /// Produced by the simulation path; no device was involved.
    Simulated,
}

impl MeasurementSource {
    /// Returns `true` for readings that did not come from hardware.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated)
    }
}

/// A finished body-composition measurement.
///
/// Created once per successful decode-and-compute cycle. Ownership moves to
/// the registered sink on emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleMeasurement {
    /// Body weight in kilograms.
    pub weight_kg: f64,

    /// Body fat, percent of body weight, in `[0, 100]`.
    pub body_fat_percent: f64,

    /// Body water, percent of body weight, in `[0, 100]`.
    pub body_water_percent: f64,

    /// Skeletal muscle mass in kilograms.
    pub muscle_mass_kg: f64,

    /// Bone mass in kilograms.
    pub bone_mass_kg: f64,

    /// Basal metabolic rate in kcal/day.
    pub basal_metabolism_kcal: i32,

    /// Visceral fat score in `[0, 30]`.
    pub visceral_fat_index: f64,

    /// Metabolic age in years.
    pub metabolic_age_years: u32,

    /// Measured impedance in ohms.
    pub impedance_ohms: u32,

    /// When the reading was taken (UTC).
    pub captured_at: DateTime<Utc>,

    /// Device or simulation origin of this reading.
    pub source: MeasurementSource,
}

impl ScaleMeasurement {
    /// Package a decoded reading and its derived metrics, stamped now.
    #[must_use]
    pub fn new(
        reading: &DecodedReading,
        composition: &BodyComposition,
        source: MeasurementSource,
    ) -> Self {
        Self {
            weight_kg: reading.weight_kg(),
            body_fat_percent: composition.body_fat_percent,
            body_water_percent: composition.body_water_percent,
            muscle_mass_kg: composition.muscle_mass_kg,
            bone_mass_kg: composition.bone_mass_kg,
            basal_metabolism_kcal: composition.basal_metabolism_kcal,
            visceral_fat_index: composition.visceral_fat_index,
            metabolic_age_years: composition.metabolic_age_years,
            impedance_ohms: u32::from(reading.impedance_raw),
            captured_at: Utc::now(),
            source,
        }
    }
}

/// Per-device connection state as seen by a caller holding a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Seen during a scan, no link yet.
    Discovered,
    /// Link negotiation in progress.
    Connecting,
    /// Transport link is up.
    Connected,
    /// Measurement notifications are armed.
    Subscribed,
    /// Link released.
    Disconnected,
}

/// A scale discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Platform identifier (a Bluetooth address on Linux).
    pub id: String,

    /// Advertised name, or the id when the device broadcasts none.
    pub display_name: String,

    /// Current link state. Only the session mutates this.
    pub connection_state: ConnectionState,
}

impl DeviceHandle {
    /// Create a handle for a freshly discovered device.
    #[must_use]
    pub fn discovered(id: impl Into<String>, display_name: Option<String>) -> Self {
        let id = id.into();
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        Self {
            id,
            display_name,
            connection_state: ConnectionState::Discovered,
        }
    }
}

/// Lifecycle state of a [`crate::session::ScaleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nothing attempted yet.
    Idle,
    /// Device chooser is open.
    Scanning,
    /// A device was chosen and can be connected.
    DeviceSelected,
    /// Transport link negotiation in progress.
    Connecting,
    /// Link up, notifications not armed yet.
    Connected,
    /// Notifications armed.
    Subscribed,
    /// At least one measurement cycle has started.
    Measuring,
    /// Terminal. A new session is needed to reconnect.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::DeviceSelected => "device_selected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Measuring => "measuring",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Formats a UUID the way BlueZ prints it.
#[must_use]
pub fn uuid_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_uuids_match_short_forms() {
        assert_eq!(
            uuid_string(&gatt::BODY_COMPOSITION_SERVICE),
            "0000181a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid_string(&gatt::MEASUREMENT_CHARACTERISTIC),
            "00002a2f-0000-1000-8000-00805f9b34fb"
        );
        assert!(uuid_string(&gatt::VENDOR_CONFIG_SERVICE).starts_with("00001530-"));
        assert!(uuid_string(&gatt::VENDOR_CONFIG_CHARACTERISTIC).starts_with("00001542-"));
    }

    #[test]
    fn test_control_flags() {
        let reading = DecodedReading {
            control_byte: 0b0010_0010,
            weight_raw: 700,
            impedance_raw: 500,
        };
        assert!(reading.is_stabilized());
        assert!(reading.has_impedance());
        assert!((reading.weight_kg() - 70.0).abs() < f64::EPSILON);

        let bare = DecodedReading {
            control_byte: 0,
            ..reading
        };
        assert!(!bare.is_stabilized());
        assert!(!bare.has_impedance());
    }

    #[test]
    fn test_device_handle_falls_back_to_id() {
        let handle = DeviceHandle::discovered("AA:BB:CC:DD:EE:FF", Some("  ".into()));
        assert_eq!(handle.display_name, "AA:BB:CC:DD:EE:FF");
        assert_eq!(handle.connection_state, ConnectionState::Discovered);

        let named = DeviceHandle::discovered("AA:BB:CC:DD:EE:FF", Some("MIBFS".into()));
        assert_eq!(named.display_name, "MIBFS");
    }

    #[test]
    fn test_measurement_source_serialization() {
        let json = serde_json::to_string(&MeasurementSource::Simulated).unwrap();
        assert_eq!(json, r#"{"kind":"simulated"}"#);

        let json = serde_json::to_string(&MeasurementSource::Device {
            device_id: "AA:BB".into(),
        })
        .unwrap();
        assert!(json.contains(r#""kind":"device""#));
        assert!(json.contains(r#""device_id":"AA:BB""#));
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::DeviceSelected.to_string(), "device_selected");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
