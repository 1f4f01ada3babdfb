//! BlueZ transport for Linux hosts.
//!
//! [`BluerTransport`] talks to `bluetoothd` over D-Bus through `bluer`. It
//! scans for LE advertisements, hands matches to a [`DeviceChooser`] and
//! forwards characteristic notifications into the session's channel.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::pin;

use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{
    AcceptAll, BleTransport, DeviceChooser, DiscoveredDevice, Notifications, ScanFilter,
    TransportError, TransportResult,
};

/// [`BleTransport`] backed by the system Bluetooth daemon.
pub struct BluerTransport {
    _session: Session,
    adapter: Adapter,
    chooser: Box<dyn DeviceChooser>,
    device: Option<Device>,
    pump: Option<JoinHandle<()>>,
    channel_capacity: usize,
}

impl BluerTransport {
    /// Open a D-Bus session and power on an adapter.
    ///
    /// Uses the default adapter when `adapter_name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] when `bluetoothd` is not
    /// reachable or the adapter does not exist.
    pub async fn new(adapter_name: Option<&str>, channel_capacity: usize) -> TransportResult<Self> {
        let session = Session::new().await.map_err(unsupported)?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name).map_err(unsupported)?,
            None => session.default_adapter().await.map_err(unsupported)?,
        };
        adapter.set_powered(true).await.map_err(unsupported)?;
        info!(adapter = adapter.name(), "bluetooth adapter ready");

        Ok(Self {
            _session: session,
            adapter,
            chooser: Box::new(AcceptAll),
            device: None,
            pump: None,
            channel_capacity: channel_capacity.max(1),
        })
    }

    /// Replace the chooser that confirms scan results.
    #[must_use]
    pub fn with_chooser(mut self, chooser: impl DeviceChooser + 'static) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl BleTransport for BluerTransport {
    async fn discover(&mut self, filter: &ScanFilter) -> TransportResult<Vec<DiscoveredDevice>> {
        let le_only = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(le_only)
            .await
            .map_err(link)?;

        let events = self.adapter.discover_devices().await.map_err(link)?;
        let added = events.filter_map(|event| async move {
            match event {
                AdapterEvent::DeviceAdded(address) => Some(address),
                _ => None,
            }
        });
        let adapter = &self.adapter;
        let (seen, matches) =
            collect_matches(added, filter, |address| describe(adapter, address)).await;

        info!(seen, matched = matches.len(), "discovery finished");
        if matches.is_empty() {
            return Ok(matches);
        }
        self.chooser.choose(matches).ok_or(TransportError::Cancelled)
    }

    async fn connect(&mut self, device_id: &str) -> TransportResult<()> {
        let address: Address = device_id
            .parse()
            .map_err(|_| TransportError::UnknownDevice(device_id.to_string()))?;
        let device = self.adapter.device(address).map_err(link)?;
        // Held before connecting so a disconnect after a dropped or timed-out
        // connect cancels the pending BlueZ request.
        self.device = Some(device.clone());
        if !device.is_connected().await.map_err(link)? {
            device.connect().await.map_err(link)?;
        }
        info!(device = %address, "link established");
        Ok(())
    }

    async fn subscribe(&mut self, service: Uuid, characteristic: Uuid) -> TransportResult<Notifications> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| TransportError::Link("not connected".into()))?;
        let characteristic = find_characteristic(device, service, characteristic).await?;

        self.stop_pump();
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();
        self.pump = Some(tokio::spawn(pump_notifications(characteristic, tx, ready_tx)));

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TransportError::Link("notification task ended early".into())),
        }
    }

    async fn write(&mut self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> TransportResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| TransportError::Link("not connected".into()))?;
        let characteristic = find_characteristic(device, service, characteristic).await?;
        characteristic.write(payload).await.map_err(link)
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.stop_pump();
        let Some(device) = self.device.take() else {
            return Ok(());
        };
        // Disconnect also aborts a connect still in flight.
        if let Err(error) = device.disconnect().await {
            if device.is_connected().await.unwrap_or(false) {
                return Err(link(error));
            }
            debug!(%error, "device was not connected");
        }
        info!(device = %device.address(), "link released");
        Ok(())
    }
}

impl Drop for BluerTransport {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Describe each newly added advertiser until the stream ends or the scan
/// window closes, keeping those that pass `filter`.
///
/// An advertiser whose properties cannot be read is skipped; it usually left
/// range between being announced and being queried.
async fn collect_matches<A, S, F, Fut>(
    added: S,
    filter: &ScanFilter,
    mut describe: F,
) -> (usize, Vec<DiscoveredDevice>)
where
    A: Copy + Eq + Hash + Display,
    S: Stream<Item = A>,
    F: FnMut(A) -> Fut,
    Fut: Future<Output = TransportResult<DiscoveredDevice>>,
{
    let mut seen = HashSet::new();
    let mut matches = Vec::new();
    let mut added = pin!(added);
    let deadline = tokio::time::sleep(filter.timeout);
    let mut deadline = pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            next = added.next() => {
                let Some(address) = next else { break };
                if !seen.insert(address) {
                    continue;
                }
                let device = match describe(address).await {
                    Ok(device) => device,
                    Err(error) => {
                        debug!(%address, %error, "skipping unreadable advertiser");
                        continue;
                    }
                };
                debug!(id = %device.id, name = ?device.name, "advertisement");
                if filter.matches(&device) {
                    matches.push(device);
                }
            }
        }
    }
    (seen.len(), matches)
}

async fn describe(adapter: &Adapter, address: Address) -> TransportResult<DiscoveredDevice> {
    let device = adapter.device(address).map_err(link)?;
    let name = device.name().await.map_err(link)?;
    let services = device.uuids().await.map_err(link)?.unwrap_or_default();
    Ok(DiscoveredDevice {
        id: address.to_string(),
        name,
        services,
    })
}

async fn find_characteristic(
    device: &Device,
    service: Uuid,
    characteristic: Uuid,
) -> TransportResult<Characteristic> {
    for candidate in device.services().await.map_err(link)? {
        if candidate.uuid().await.map_err(link)? != service {
            continue;
        }
        for found in candidate.characteristics().await.map_err(link)? {
            if found.uuid().await.map_err(link)? == characteristic {
                return Ok(found);
            }
        }
        return Err(TransportError::AttributeNotFound(characteristic));
    }
    Err(TransportError::AttributeNotFound(service))
}

/// Forward notifications until the device or the receiver goes away.
async fn pump_notifications(
    characteristic: Characteristic,
    tx: mpsc::Sender<Vec<u8>>,
    ready: oneshot::Sender<TransportResult<()>>,
) {
    let stream = match characteristic.notify().await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = ready.send(Err(link(error)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut stream = pin!(stream);
    while let Some(value) = stream.next().await {
        if tx.send(value).await.is_err() {
            debug!("notification receiver dropped");
            return;
        }
    }
    warn!("notification stream ended");
}

fn unsupported(error: bluer::Error) -> TransportError {
    TransportError::Unsupported(error.to_string())
}

fn link(error: bluer::Error) -> TransportError {
    TransportError::Link(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ids_parse_as_addresses() {
        let address: Address = "C8:47:8C:00:00:01".parse().unwrap();
        assert_eq!(address.to_string(), "C8:47:8C:00:00:01");
        assert!("not-an-address".parse::<Address>().is_err());
    }

    fn advertiser(id: &str, name: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: id.to_string(),
            name: Some(name.to_string()),
            services: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn test_unreadable_advertiser_does_not_abort_scan() {
        let added = futures::stream::iter(["AA:00", "BB:00", "AA:00", "CC:00"]);
        let filter = ScanFilter::name_prefix("MIBFS", std::time::Duration::from_secs(5));

        let (seen, matches) = collect_matches(added, &filter, |id: &'static str| async move {
            match id {
                "AA:00" => Err(TransportError::Link("org.bluez.Error.DoesNotExist".into())),
                "BB:00" => Ok(advertiser(id, "Headphones")),
                _ => Ok(advertiser(id, "MIBFS")),
            }
        })
        .await;

        assert_eq!(seen, 3);
        assert_eq!(matches, vec![advertiser("CC:00", "MIBFS")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_window_closes_open_stream() {
        let added = futures::stream::iter(["CC:00"]).chain(futures::stream::pending());
        let filter = ScanFilter::name_prefix("MIBFS", std::time::Duration::from_secs(5));

        let (seen, matches) = collect_matches(added, &filter, |id: &'static str| async move {
            Ok::<_, TransportError>(advertiser(id, "MIBFS"))
        })
        .await;
        assert_eq!(seen, 1);
        assert_eq!(matches.len(), 1);
    }
}
