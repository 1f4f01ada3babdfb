//! Scripted in-memory transport.
//!
//! Lets a [`crate::session::ScaleSession`] run end to end without a Bluetooth
//! adapter. Behaviour is configured up front with the builder methods; a
//! [`MockHandle`] kept by the test observes writes and disconnects and can
//! push further notifications while the session runs.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::transport::{
    BleTransport, DiscoveredDevice, Notifications, ScanFilter, TransportError, TransportResult,
};

#[derive(Debug, Default)]
struct Shared {
    writes: Vec<(Uuid, Uuid, Vec<u8>)>,
    disconnects: usize,
    connect_attempts: usize,
    link: Option<String>,
    live: Option<mpsc::Sender<Vec<u8>>>,
}

/// Observer for a [`MockTransport`] that has been moved into a session.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut shared)
    }

    /// Every `(service, characteristic, payload)` written so far.
    #[must_use]
    pub fn writes(&self) -> Vec<(Uuid, Uuid, Vec<u8>)> {
        self.with(|s| s.writes.clone())
    }

    /// How many times `disconnect` was called on the transport.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.with(|s| s.disconnects)
    }

    /// How many times `connect` was called on the transport.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.with(|s| s.connect_attempts)
    }

    /// Device with a link that is up or still being negotiated.
    #[must_use]
    pub fn open_link(&self) -> Option<String> {
        self.with(|s| s.link.clone())
    }

    /// Deliver a notification on an open subscription.
    ///
    /// Returns `false` when no subscription is open.
    pub async fn notify(&self, payload: impl Into<Vec<u8>>) -> bool {
        let sender = self.with(|s| s.live.clone());
        match sender {
            Some(tx) => tx.send(payload.into()).await.is_ok(),
            None => false,
        }
    }

    /// End the notification stream, as if the scale walked out of range.
    pub fn close(&self) {
        self.with(|s| s.live = None);
    }
}

/// A transport whose every answer is scripted.
#[derive(Debug, Default)]
pub struct MockTransport {
    devices: Vec<DiscoveredDevice>,
    discover_error: Option<TransportError>,
    connect_errors: VecDeque<TransportError>,
    connect_delay: Option<Duration>,
    subscribe_delay: Option<Duration>,
    missing: HashSet<Uuid>,
    frames: Vec<Vec<u8>>,
    keep_open: bool,
    connected: bool,
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// A transport that finds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a device with the given id and name.
    #[must_use]
    pub fn with_device(mut self, id: &str, name: Option<&str>) -> Self {
        self.devices.push(DiscoveredDevice {
            id: id.to_string(),
            name: name.map(str::to_string),
            services: HashSet::new(),
        });
        self
    }

    /// Fail every discovery with `error`.
    #[must_use]
    pub fn failing_discovery(mut self, error: TransportError) -> Self {
        self.discover_error = Some(error);
        self
    }

    /// Fail the next connect attempt with `error`. Stacks in call order.
    #[must_use]
    pub fn failing_connect(mut self, error: TransportError) -> Self {
        self.connect_errors.push_back(error);
        self
    }

    /// Make every connect attempt take `delay`.
    #[must_use]
    pub const fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Make every subscribe take `delay`.
    #[must_use]
    pub const fn subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = Some(delay);
        self
    }

    /// Remove a GATT service or characteristic from the device.
    #[must_use]
    pub fn without_attribute(mut self, uuid: Uuid) -> Self {
        self.missing.insert(uuid);
        self
    }

    /// Notifications delivered right after subscribing.
    #[must_use]
    pub fn with_frames<I, F>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        self.frames.extend(frames.into_iter().map(Into::into));
        self
    }

    /// Keep the notification stream open after the scripted frames, so the
    /// test can push more through [`MockHandle::notify`].
    #[must_use]
    pub const fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    /// Observer sharing state with this transport.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check_attributes(&self, service: Uuid, characteristic: Uuid) -> TransportResult<()> {
        for uuid in [service, characteristic] {
            if self.missing.contains(&uuid) {
                return Err(TransportError::AttributeNotFound(uuid));
            }
        }
        Ok(())
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BleTransport for MockTransport {
    async fn discover(&mut self, filter: &ScanFilter) -> TransportResult<Vec<DiscoveredDevice>> {
        if let Some(error) = &self.discover_error {
            return Err(error.clone());
        }
        Ok(self
            .devices
            .iter()
            .filter(|device| filter.matches(device))
            .cloned()
            .collect())
    }

    async fn connect(&mut self, device_id: &str) -> TransportResult<()> {
        if !self.devices.iter().any(|device| device.id == device_id) {
            return Err(TransportError::UnknownDevice(device_id.to_string()));
        }
        {
            let mut shared = self.shared();
            shared.connect_attempts += 1;
            shared.link = Some(device_id.to_string());
        }
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.connect_errors.pop_front() {
            self.shared().link = None;
            return Err(error);
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, service: Uuid, characteristic: Uuid) -> TransportResult<Notifications> {
        if !self.connected {
            return Err(TransportError::Link("not connected".into()));
        }
        if let Some(delay) = self.subscribe_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_attributes(service, characteristic)?;

        let (tx, rx) = mpsc::channel(self.frames.len().max(1) + 16);
        for frame in self.frames.drain(..) {
            tx.try_send(frame)
                .map_err(|e| TransportError::Link(e.to_string()))?;
        }
        if self.keep_open {
            self.shared().live = Some(tx);
        }
        Ok(rx)
    }

    async fn write(&mut self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Link("not connected".into()));
        }
        self.check_attributes(service, characteristic)?;
        self.shared()
            .writes
            .push((service, characteristic, payload.to_vec()));
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        let mut shared = self.shared();
        shared.disconnects += 1;
        shared.link = None;
        shared.live = None;
        Ok(())
    }
}
