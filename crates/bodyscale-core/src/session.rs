//! Device session: the connection state machine for one scale.
//!
//! ```text
//! Idle → Scanning → DeviceSelected → Connecting → Connected → Subscribed → Measuring
//!                                                                              │
//!   any state ── disconnect() / fatal transport error ──────────────────→ Disconnected
//! ```
//!
//! A session owns its transport, its calculator and its sink. Each inbound
//! notification is decoded, turned into a [`ScaleMeasurement`] and handed to
//! the sink in delivery order. Bad frames are logged and skipped; they never
//! end the session.
//!
//! `Disconnected` is terminal. Callers must call [`ScaleSession::disconnect`]
//! on every exit path, including after dropping an in-flight `connect` or
//! `subscribe` future, so the transport releases any half-open link.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::calculator::{BioimpedanceCalculator, BiometricProfile};
use crate::error::{Result, ScaleError};
use crate::frame;
use crate::transport::{BleTransport, Notifications, ScanFilter, TransportError};
use crate::types::{
    gatt, ConnectionState, DeviceHandle, MeasurementSource, ScaleMeasurement, SessionState,
};

/// Timeouts and protocol knobs for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on [`ScaleSession::connect`].
    pub connect_timeout: Duration,
    /// Upper bound on [`ScaleSession::subscribe`].
    pub subscribe_timeout: Duration,
    /// Bytes [`ScaleSession::request_measurement`] writes, or `None` to skip
    /// the write for firmware that starts on its own.
    pub start_command: Option<Vec<u8>>,
    /// Capacity of the channel returned by [`ScaleSession::measurement_channel`].
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            subscribe_timeout: Duration::from_secs(10),
            start_command: Some(vec![0x01]),
            channel_capacity: 32,
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Measurements handed to the sink.
    pub emitted: u64,
    /// Notifications that produced no measurement.
    pub discarded: u64,
}

type Callback = Box<dyn FnMut(ScaleMeasurement) + Send>;

enum Sink {
    Callback(Callback),
    Channel(mpsc::Sender<ScaleMeasurement>),
}

impl Sink {
    /// Returns `false` when the receiving side is gone.
    async fn deliver(&mut self, measurement: ScaleMeasurement) -> bool {
        match self {
            Self::Callback(callback) => {
                callback(measurement);
                true
            }
            Self::Channel(tx) => tx.send(measurement).await.is_ok(),
        }
    }
}

/// A connection to one body-composition scale.
pub struct ScaleSession<T: BleTransport> {
    transport: T,
    calculator: BioimpedanceCalculator,
    config: SessionConfig,
    state: SessionState,
    candidates: Vec<DeviceHandle>,
    device: Option<DeviceHandle>,
    notifications: Option<Notifications>,
    sink: Option<Sink>,
    stats: SessionStats,
}

impl<T: BleTransport> ScaleSession<T> {
    /// Create an idle session.
    ///
    /// The profile is fixed for the session's lifetime.
    pub fn new(transport: T, profile: BiometricProfile, config: SessionConfig) -> Self {
        Self {
            transport,
            calculator: BioimpedanceCalculator::new(profile),
            config,
            state: SessionState::Idle,
            candidates: Vec::new(),
            device: None,
            notifications: None,
            sink: None,
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The device being connected or connected to.
    pub const fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// Devices offered by the last successful scan.
    pub fn candidates(&self) -> &[DeviceHandle] {
        &self.candidates
    }

    /// Counters so far.
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Look for scales and ask the operator to pick one.
    ///
    /// Every call is a fresh consent request; nothing retries on its own.
    /// Allowed from `Idle`, `DeviceSelected`, or `Scanning` when a previous
    /// scan future was dropped.
    ///
    /// # Errors
    ///
    /// - [`ScaleError::PlatformUnsupported`]: no BLE stack. The session ends.
    /// - [`ScaleError::UserCancelled`]: picker dismissed. Back to `Idle`.
    /// - [`ScaleError::DeviceNotFound`]: nothing matched. Back to `Idle`.
    /// - [`ScaleError::ScanFailed`]: discovery error. Back to `Idle`.
    #[instrument(skip_all, fields(filter = %filter.describe()))]
    pub async fn scan(&mut self, filter: &ScanFilter) -> Result<Vec<DeviceHandle>> {
        self.expect_state(
            "scan",
            &[
                SessionState::Idle,
                SessionState::Scanning,
                SessionState::DeviceSelected,
            ],
        )?;
        self.candidates.clear();
        self.transition(SessionState::Scanning);

        let outcome = self.transport.discover(filter).await;
        match outcome {
            Ok(found) if found.is_empty() => {
                self.transition(SessionState::Idle);
                Err(ScaleError::DeviceNotFound(filter.describe()))
            }
            Ok(found) => {
                self.candidates = found
                    .into_iter()
                    .map(|device| DeviceHandle::discovered(device.id, device.name))
                    .collect();
                info!(count = self.candidates.len(), "scale selected");
                self.transition(SessionState::DeviceSelected);
                Ok(self.candidates.clone())
            }
            Err(TransportError::Cancelled) => {
                info!("device selection cancelled");
                self.transition(SessionState::Idle);
                Err(ScaleError::UserCancelled)
            }
            Err(TransportError::Unsupported(reason)) => {
                self.release().await;
                Err(ScaleError::PlatformUnsupported(reason))
            }
            Err(other) => {
                warn!(error = %other, "discovery failed");
                self.transition(SessionState::Idle);
                Err(ScaleError::ScanFailed(other.to_string()))
            }
        }
    }

    /// Open the link to `handle`.
    ///
    /// # Errors
    ///
    /// - [`ScaleError::DeviceNotFound`]: `handle` did not come from the last
    ///   scan. Nothing changes.
    /// - [`ScaleError::ConnectionFailed`]: the state stays `DeviceSelected`
    ///   and the call may be repeated.
    /// - [`ScaleError::Timeout`]: the configured bound elapsed. The session
    ///   ends and partial transport state is released.
    /// - [`ScaleError::PlatformUnsupported`]: the session ends.
    #[instrument(skip_all, fields(device = %handle.id))]
    pub async fn connect(&mut self, handle: &DeviceHandle) -> Result<()> {
        self.expect_state("connect", &[SessionState::DeviceSelected])?;
        if !self.candidates.iter().any(|candidate| candidate.id == handle.id) {
            warn!("handle was not returned by the last scan");
            return Err(ScaleError::DeviceNotFound(format!("address {}", handle.id)));
        }

        let mut device = handle.clone();
        device.connection_state = ConnectionState::Connecting;
        self.device = Some(device);
        self.transition(SessionState::Connecting);

        let limit = self.config.connect_timeout;
        let outcome = tokio::time::timeout(limit, self.transport.connect(&handle.id)).await;
        match outcome {
            Ok(Ok(())) => {
                self.set_device_state(ConnectionState::Connected);
                self.transition(SessionState::Connected);
                Ok(())
            }
            Ok(Err(TransportError::Unsupported(reason))) => {
                self.release().await;
                Err(ScaleError::PlatformUnsupported(reason))
            }
            Ok(Err(error)) => {
                warn!(error = %error, "connect failed");
                self.set_device_state(ConnectionState::Discovered);
                self.transition(SessionState::DeviceSelected);
                Err(ScaleError::ConnectionFailed {
                    device_id: handle.id.clone(),
                    reason: error.to_string(),
                })
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "connect timed out");
                self.release().await;
                Err(ScaleError::Timeout {
                    operation: "connect",
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// Resolve the measurement characteristic and arm notifications.
    ///
    /// # Errors
    ///
    /// - [`ScaleError::ServiceUnavailable`]: wrong device model. Not retried;
    ///   the caller should disconnect.
    /// - [`ScaleError::ConnectionFailed`]: the link dropped while resolving.
    /// - [`ScaleError::Timeout`]: the session ends.
    #[instrument(skip_all, fields(device = %self.device_id()))]
    pub async fn subscribe(&mut self) -> Result<()> {
        self.expect_state("subscribe", &[SessionState::Connected])?;

        let limit = self.config.subscribe_timeout;
        let outcome = tokio::time::timeout(
            limit,
            self.transport.subscribe(
                gatt::BODY_COMPOSITION_SERVICE,
                gatt::MEASUREMENT_CHARACTERISTIC,
            ),
        )
        .await;
        match outcome {
            Ok(Ok(notifications)) => {
                self.notifications = Some(notifications);
                self.set_device_state(ConnectionState::Subscribed);
                self.transition(SessionState::Subscribed);
                Ok(())
            }
            Ok(Err(TransportError::AttributeNotFound(uuid))) => {
                warn!(%uuid, "measurement attribute missing");
                Err(ScaleError::ServiceUnavailable(uuid))
            }
            Ok(Err(error)) => Err(ScaleError::ConnectionFailed {
                device_id: self.device_id(),
                reason: error.to_string(),
            }),
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "subscribe timed out");
                self.release().await;
                Err(ScaleError::Timeout {
                    operation: "subscribe",
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// Send every future measurement to `callback`, replacing any previous sink.
    pub fn on_measurement<F>(&mut self, callback: F)
    where
        F: FnMut(ScaleMeasurement) + Send + 'static,
    {
        self.replace_sink(Sink::Callback(Box::new(callback)));
    }

    /// Send every future measurement into a bounded channel, replacing any
    /// previous sink. The channel closes on disconnect.
    pub fn measurement_channel(&mut self) -> mpsc::Receiver<ScaleMeasurement> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        self.replace_sink(Sink::Channel(tx));
        rx
    }

    /// Prompt the scale to start a reading cycle.
    ///
    /// A missing config characteristic or a failed write is logged, not
    /// returned: many firmwares start measuring without being asked.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::InvalidState`] unless subscribed.
    #[instrument(skip_all, fields(device = %self.device_id()))]
    pub async fn request_measurement(&mut self) -> Result<()> {
        self.expect_state(
            "request a measurement",
            &[SessionState::Subscribed, SessionState::Measuring],
        )?;
        self.transition(SessionState::Measuring);

        let Some(command) = self.config.start_command.clone() else {
            debug!("start command disabled");
            return Ok(());
        };
        let write = self.transport.write(
            gatt::VENDOR_CONFIG_SERVICE,
            gatt::VENDOR_CONFIG_CHARACTERISTIC,
            &command,
        );
        match tokio::time::timeout(self.config.subscribe_timeout, write).await {
            Ok(Ok(())) => debug!(bytes = ?command, "start command written"),
            Ok(Err(TransportError::AttributeNotFound(uuid))) => {
                debug!(%uuid, "no vendor config characteristic, relying on auto-start");
            }
            Ok(Err(error)) => warn!(error = %error, "start command write failed"),
            Err(_) => warn!("start command write timed out"),
        }
        Ok(())
    }

    /// Process one notification payload.
    ///
    /// Returns `true` when a measurement reached the sink. Decode and compute
    /// failures are logged and counted; they never propagate.
    pub async fn handle_notification(&mut self, payload: &[u8]) -> bool {
        if !matches!(
            self.state,
            SessionState::Subscribed | SessionState::Measuring
        ) {
            debug!(state = %self.state, "notification outside a subscription ignored");
            return false;
        }

        let reading = match frame::parse(payload) {
            Ok(reading) => reading,
            Err(error) => {
                warn!(error = %error, bytes = ?payload, "discarding notification");
                self.stats.discarded += 1;
                return false;
            }
        };
        debug!(
            control = reading.control_byte,
            weight_raw = reading.weight_raw,
            impedance_raw = reading.impedance_raw,
            "frame decoded"
        );

        let composition = match self
            .calculator
            .compute(reading.weight_kg(), reading.impedance_ohms())
        {
            Ok(composition) => composition,
            Err(error) => {
                warn!(error = %error, "discarding reading");
                self.stats.discarded += 1;
                return false;
            }
        };

        if self.state == SessionState::Subscribed {
            self.transition(SessionState::Measuring);
        }

        let measurement = ScaleMeasurement::new(
            &reading,
            &composition,
            MeasurementSource::Device {
                device_id: self.device_id(),
            },
        );
        self.emit(measurement).await
    }

    /// Drain notifications in delivery order until the stream ends.
    ///
    /// When the device goes away the session disconnects itself.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::InvalidState`] unless subscribed.
    #[instrument(skip_all, fields(device = %self.device_id()))]
    pub async fn run(&mut self) -> Result<SessionStats> {
        self.expect_state("run", &[SessionState::Subscribed, SessionState::Measuring])?;

        loop {
            let next = match self.notifications.as_mut() {
                Some(notifications) => notifications.recv().await,
                None => None,
            };
            let Some(payload) = next else { break };
            self.handle_notification(&payload).await;
        }

        info!(
            emitted = self.stats.emitted,
            discarded = self.stats.discarded,
            "notification stream closed"
        );
        self.disconnect().await;
        Ok(self.stats)
    }

    /// Release the link, the subscription and the sink.
    ///
    /// Safe from any state and idempotent. Teardown errors are logged only.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.release().await;
    }

    async fn release(&mut self) {
        self.notifications = None;
        self.sink = None;
        if let Err(error) = self.transport.disconnect().await {
            warn!(error = %error, "transport teardown failed");
        }
        self.set_device_state(ConnectionState::Disconnected);
        self.transition(SessionState::Disconnected);
    }

    async fn emit(&mut self, measurement: ScaleMeasurement) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            warn!("no measurement sink registered, dropping measurement");
            self.stats.discarded += 1;
            return false;
        };
        let weight_kg = measurement.weight_kg;
        if sink.deliver(measurement).await {
            self.stats.emitted += 1;
            info!(weight_kg, "measurement emitted");
            true
        } else {
            warn!("measurement receiver dropped, removing sink");
            self.sink = None;
            self.stats.discarded += 1;
            false
        }
    }

    fn replace_sink(&mut self, sink: Sink) {
        if self.sink.replace(sink).is_some() {
            debug!("previous measurement sink replaced");
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScaleError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }

    fn set_device_state(&mut self, state: ConnectionState) {
        if let Some(device) = self.device.as_mut() {
            device.connection_state = state;
        }
    }

    fn device_id(&self) -> String {
        self.device
            .as_ref()
            .map_or_else(String::new, |device| device.id.clone())
    }
}

impl<T: BleTransport> Drop for ScaleSession<T> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::Connecting
                | SessionState::Connected
                | SessionState::Subscribed
                | SessionState::Measuring
        ) {
            warn!(
                state = %self.state,
                device = %self.device_id(),
                "session dropped without disconnect; link may stay open"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::calculator::Sex;
    use crate::frame::MIN_FRAME_LEN;
    use crate::mock::MockTransport;

    const SCALE: &str = "C8:47:8C:00:00:01";

    const FRAME: [u8; MIN_FRAME_LEN] = [
        0x22, 0x02, 0xBC, 0x01, 0xF4, 0x07, 0xE8, 0x0A, 0x12, 0x08, 0x1E, 0x00, 0x5A,
    ];

    fn profile() -> BiometricProfile {
        BiometricProfile::new(Sex::Male, 30, 175.0).unwrap()
    }

    fn filter() -> ScanFilter {
        ScanFilter::name_prefix("MIBFS", Duration::from_secs(1))
    }

    fn session(transport: MockTransport) -> ScaleSession<MockTransport> {
        ScaleSession::new(transport, profile(), SessionConfig::default())
    }

    async fn subscribed(transport: MockTransport) -> ScaleSession<MockTransport> {
        let mut session = session(transport);
        let handles = session.scan(&filter()).await.unwrap();
        session.connect(&handles[0]).await.unwrap();
        session.subscribe().await.unwrap();
        session
    }

    fn scale() -> MockTransport {
        MockTransport::new().with_device(SCALE, Some("MIBFS"))
    }

    #[tokio::test]
    async fn test_full_lifecycle_emits_one_measurement() {
        let mut session = subscribed(scale().with_frames([FRAME])).await;
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(
            session.device().unwrap().connection_state,
            ConnectionState::Subscribed
        );

        let mut rx = session.measurement_channel();
        let stats = session.run().await.unwrap();
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.discarded, 0);

        let measurement = rx.recv().await.unwrap();
        assert_eq!(measurement.impedance_ohms, 500);
        assert!((measurement.weight_kg - 70.0).abs() < f64::EPSILON);
        assert_eq!(
            measurement.source,
            MeasurementSource::Device {
                device_id: SCALE.to_string()
            }
        );
        assert!(rx.recv().await.is_none(), "channel closes on disconnect");
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_bad_frames_are_skipped_and_order_is_kept() {
        let mut heavier = FRAME;
        heavier[1] = 0x03;
        heavier[2] = 0x20; // 80.0 kg
        let frames: Vec<Vec<u8>> = vec![
            FRAME.to_vec(),
            vec![0x22, 0x02],
            heavier.to_vec(),
            vec![0x00; MIN_FRAME_LEN],
        ];
        let mut session = subscribed(scale().with_frames(frames)).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session.on_measurement(move |m| sink.lock().unwrap().push(m.weight_kg));

        let stats = session.run().await.unwrap();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.discarded, 2);
        assert_eq!(*received.lock().unwrap(), vec![70.0, 80.0]);
    }

    #[tokio::test]
    async fn test_later_sink_replaces_earlier() {
        let mut session = subscribed(scale().with_frames([FRAME])).await;
        let mut first = session.measurement_channel();
        let mut second = session.measurement_channel();

        session.run().await.unwrap();
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_live_notifications_and_device_loss() {
        let transport = scale().keep_open();
        let mock = transport.handle();
        let mut session = subscribed(transport).await;
        let mut rx = session.measurement_channel();

        assert!(session.handle_notification(&FRAME).await);
        assert_eq!(session.state(), SessionState::Measuring);
        assert!(rx.recv().await.is_some());

        assert!(mock.notify(FRAME.to_vec()).await);
        mock.close();
        let stats = session.run().await.unwrap();
        assert_eq!(stats.emitted, 2);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_no_sink_counts_as_discarded() {
        let mut session = subscribed(scale()).await;
        assert!(!session.handle_notification(&FRAME).await);
        assert_eq!(session.stats().discarded, 1);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_notification_before_subscribe_is_ignored() {
        let mut session = session(scale());
        let received = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&received);
        session.on_measurement(move |_| *counter.lock().unwrap() += 1);
        assert!(!session.handle_notification(&FRAME).await);
        assert_eq!(*received.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_cancelled_then_retried() {
        let mut session = session(scale().failing_discovery(TransportError::Cancelled));
        let err = session.scan(&filter()).await.unwrap_err();
        assert!(matches!(err, ScaleError::UserCancelled));
        assert!(err.is_expected_state());
        assert_eq!(session.state(), SessionState::Idle);

        // A second explicit scan is allowed.
        assert!(matches!(
            session.scan(&filter()).await,
            Err(ScaleError::UserCancelled)
        ));
    }

    #[tokio::test]
    async fn test_scan_without_ble_is_fatal() {
        let transport =
            scale().failing_discovery(TransportError::Unsupported("no adapter".into()));
        let mut session = session(transport);
        let err = session.scan(&filter()).await.unwrap_err();
        assert!(matches!(err, ScaleError::PlatformUnsupported(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.scan(&filter()).await,
            Err(ScaleError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_never_fabricates_devices() {
        let mut session = session(MockTransport::new().with_device(SCALE, Some("Headphones")));
        let err = session.scan(&filter()).await.unwrap_err();
        assert!(matches!(err, ScaleError::DeviceNotFound(_)));
        assert!(session.candidates().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_scan_link_error_is_scan_failed() {
        let transport = scale().failing_discovery(TransportError::Link("dbus".into()));
        let mut session = session(transport);
        assert!(matches!(
            session.scan(&filter()).await,
            Err(ScaleError::ScanFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_failure_is_retryable() {
        let transport = scale().failing_connect(TransportError::Link("le-connection-abort".into()));
        let mock = transport.handle();
        let mut session = session(transport);
        let handles = session.scan(&filter()).await.unwrap();

        let err = session.connect(&handles[0]).await.unwrap_err();
        assert!(matches!(err, ScaleError::ConnectionFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(session.state(), SessionState::DeviceSelected);
        assert_eq!(
            session.device().unwrap().connection_state,
            ConnectionState::Discovered
        );

        session.connect(&handles[0]).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(mock.connect_attempts(), 2);
        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_releases_link() {
        let transport = scale().connect_delay(Duration::from_secs(60));
        let mock = transport.handle();
        let mut session = session(transport);
        let handles = session.scan(&filter()).await.unwrap();

        let err = session.connect(&handles[0]).await.unwrap_err();
        assert!(matches!(
            err,
            ScaleError::Timeout {
                operation: "connect",
                secs: 15
            }
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(mock.disconnects(), 1);
        assert_eq!(mock.open_link(), None, "pending connect is cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_timeout_releases_link() {
        let transport = scale().subscribe_delay(Duration::from_secs(60));
        let mock = transport.handle();
        let mut session = session(transport);
        let handles = session.scan(&filter()).await.unwrap();
        session.connect(&handles[0]).await.unwrap();
        assert_eq!(mock.open_link().as_deref(), Some(SCALE));

        let err = session.subscribe().await.unwrap_err();
        assert!(matches!(
            err,
            ScaleError::Timeout {
                operation: "subscribe",
                secs: 10
            }
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            session.device().unwrap().connection_state,
            ConnectionState::Disconnected
        );
        assert_eq!(mock.disconnects(), 1);
        assert_eq!(mock.open_link(), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_unscanned_handle() {
        let transport = scale();
        let mock = transport.handle();
        let mut session = session(transport);
        session.scan(&filter()).await.unwrap();

        let stranger = DeviceHandle::discovered("BB:BB:BB:BB:BB:BB", Some("MIBFS".into()));
        let err = session.connect(&stranger).await.unwrap_err();
        assert!(matches!(err, ScaleError::DeviceNotFound(ref what) if what.contains("BB:BB:BB:BB:BB:BB")));
        assert_eq!(session.state(), SessionState::DeviceSelected);
        assert_eq!(mock.connect_attempts(), 0);
        assert_eq!(mock.open_link(), None);

        let handles = session.candidates().to_vec();
        session.connect(&handles[0]).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_missing_service_is_service_unavailable() {
        let transport = scale().without_attribute(gatt::MEASUREMENT_CHARACTERISTIC);
        let mut session = session(transport);
        let handles = session.scan(&filter()).await.unwrap();
        session.connect(&handles[0]).await.unwrap();

        let err = session.subscribe().await.unwrap_err();
        assert!(
            matches!(err, ScaleError::ServiceUnavailable(uuid) if uuid == gatt::MEASUREMENT_CHARACTERISTIC)
        );
        assert!(!err.is_retryable());
        assert_eq!(session.state(), SessionState::Connected);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_request_measurement_writes_start_command() {
        let transport = scale();
        let mock = transport.handle();
        let mut session = subscribed(transport).await;

        session.request_measurement().await.unwrap();
        assert_eq!(session.state(), SessionState::Measuring);
        assert_eq!(
            mock.writes(),
            vec![(
                gatt::VENDOR_CONFIG_SERVICE,
                gatt::VENDOR_CONFIG_CHARACTERISTIC,
                vec![0x01]
            )]
        );
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_request_measurement_tolerates_missing_config_characteristic() {
        let transport = scale().without_attribute(gatt::VENDOR_CONFIG_CHARACTERISTIC);
        let mock = transport.handle();
        let mut session = subscribed(transport).await;

        assert!(session.request_measurement().await.is_ok());
        assert!(mock.writes().is_empty());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_operations_rejected_in_wrong_state() {
        let mut session = session(scale());
        assert!(matches!(
            session.subscribe().await,
            Err(ScaleError::InvalidState {
                operation: "subscribe",
                state: SessionState::Idle
            })
        ));
        assert!(matches!(
            session.connect(&DeviceHandle::discovered(SCALE, None)).await,
            Err(ScaleError::InvalidState { .. })
        ));
        assert!(matches!(
            session.request_measurement().await,
            Err(ScaleError::InvalidState { .. })
        ));
        assert!(matches!(session.run().await, Err(ScaleError::InvalidState { .. })));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = scale();
        let mock = transport.handle();
        let mut session = subscribed(transport).await;

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(mock.disconnects(), 1);
        assert_eq!(
            session.device().unwrap().connection_state,
            ConnectionState::Disconnected
        );
    }
}
