//! Platform BLE boundary.
//!
//! The session drives a scale through [`BleTransport`]. Implementations wrap
//! a concrete stack (BlueZ via [`crate::bluetooth`], or the scripted
//! transport in `mock`) and only move bytes: they never decode frames.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Receiver side of a characteristic notification subscription.
///
/// Payloads arrive in transmission order. The channel closes when the device
/// goes away or the subscription is released.
pub type Notifications = mpsc::Receiver<Vec<u8>>;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host has no usable BLE stack or adapter.
    #[error("Bluetooth Low Energy is not available on this host: {0}")]
    Unsupported(String),

    /// The operator dismissed device selection.
    #[error("device selection was cancelled")]
    Cancelled,

    /// A required GATT service or characteristic is absent.
    #[error("GATT attribute {0} not found on device")]
    AttributeNotFound(Uuid),

    /// The identifier does not name a device the adapter knows.
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// Link-level failure (connect, read, write or subscribe).
    #[error("link error: {0}")]
    Link(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// One advertisement that matched a scan filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Platform identifier.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub services: HashSet<Uuid>,
}

/// Which devices a scan should offer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Accept devices whose advertised name starts with any of these.
    pub name_prefixes: Vec<String>,
    /// Accept devices advertising any of these services.
    pub services: Vec<Uuid>,
    /// Accept only this device id, ignoring the other criteria.
    pub address: Option<String>,
    /// How long to listen for advertisements.
    pub timeout: Duration,
}

impl ScanFilter {
    /// Filter on a single name prefix.
    #[must_use]
    pub fn name_prefix(prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name_prefixes: vec![prefix.into()],
            timeout,
            ..Self::default()
        }
    }

    /// Whether an advertisement passes this filter.
    #[must_use]
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        if let Some(address) = &self.address {
            return device.id.eq_ignore_ascii_case(address);
        }
        if self.name_prefixes.is_empty() && self.services.is_empty() {
            return true;
        }
        let name_match = device.name.as_deref().is_some_and(|name| {
            self.name_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        });
        name_match || self.services.iter().any(|uuid| device.services.contains(uuid))
    }

    /// Short description for log lines and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(address) = &self.address {
            return format!("address {address}");
        }
        let mut parts: Vec<String> = self
            .name_prefixes
            .iter()
            .map(|prefix| format!("name '{prefix}*'"))
            .collect();
        parts.extend(self.services.iter().map(|uuid| format!("service {uuid}")));
        if parts.is_empty() {
            "any device".to_string()
        } else {
            parts.join(" or ")
        }
    }
}

/// The human-consent step of a scan.
///
/// Receives every matching device and returns the ones the operator picked,
/// or `None` when the picker was dismissed.
pub trait DeviceChooser: Send {
    /// Pick devices from `candidates`.
    fn choose(&mut self, candidates: Vec<DiscoveredDevice>) -> Option<Vec<DiscoveredDevice>>;
}

impl<F> DeviceChooser for F
where
    F: FnMut(Vec<DiscoveredDevice>) -> Option<Vec<DiscoveredDevice>> + Send,
{
    fn choose(&mut self, candidates: Vec<DiscoveredDevice>) -> Option<Vec<DiscoveredDevice>> {
        self(candidates)
    }
}

/// Chooser that accepts every matching device without prompting.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl DeviceChooser for AcceptAll {
    fn choose(&mut self, candidates: Vec<DiscoveredDevice>) -> Option<Vec<DiscoveredDevice>> {
        Some(candidates)
    }
}

/// A BLE central able to reach one scale at a time.
///
/// The session owns its transport exclusively; implementations may assume
/// calls never overlap.
pub trait BleTransport: Send {
    /// Run discovery and the device chooser.
    ///
    /// Returns the chosen devices, possibly empty when nothing matched.
    fn discover(
        &mut self,
        filter: &ScanFilter,
    ) -> impl Future<Output = TransportResult<Vec<DiscoveredDevice>>> + Send;

    /// Open the link to `device_id`.
    fn connect(&mut self, device_id: &str) -> impl Future<Output = TransportResult<()>> + Send;

    /// Arm notifications on `characteristic` inside `service`.
    fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = TransportResult<Notifications>> + Send;

    /// Write `payload` to `characteristic` inside `service`.
    fn write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Release the notification subscription and the link.
    ///
    /// Must be safe to call when nothing is connected.
    fn disconnect(&mut self) -> impl Future<Output = TransportResult<()>> + Send;
}
