use crate::{
    ble::{BleManager, CommandSink, ControlEndpoint, RawNotification, TrainerConnection},
    error::{Result, TrainerError},
    protocol,
    telemetry::{CrankTracker, WheelTracker},
    types::{
        CommandKind, ConnectionParams, DeviceInfo, LoopConfig, ResistanceCommand,
        TelemetryReading, TrainerEvent, TrainerStatus,
    },
    workout,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Main interface for controlling a smart bicycle trainer
///
/// `Trainer` owns the BLE link, the telemetry decode path and the command
/// transmission loop. Control input is a virtual grade (or a raw resistance
/// fraction); the trainer converts it through the calibration table and
/// transmits it in whichever dialect the device speaks.
///
/// # Command coalescing
///
/// [`queue_grade`](Self::queue_grade) and
/// [`queue_resistance`](Self::queue_resistance) write into a single pending
/// slot: the newest command replaces any not-yet-transmitted one. A
/// background loop drains the slot every 200 ms, retrying failed writes
/// after a 2 s back-off without dropping the command, and never starts a
/// write before the previous one has completed.
///
/// # Examples
///
/// ```no_run
/// use spinlink::Trainer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut trainer = Trainer::connect_first().await?;
///
///     let mut events = trainer.take_events().expect("events taken once");
///     tokio::spawn(async move {
///         while let Some(event) = events.recv().await {
///             println!("{event:?}");
///         }
///     });
///
///     trainer.queue_grade(5.0).await;
///     Ok(())
/// }
/// ```
pub struct Trainer {
    connection: Arc<Mutex<Option<TrainerConnection>>>,
    device_info: DeviceInfo,
    endpoint: ControlEndpoint,
    status: Arc<RwLock<TrainerStatus>>,
    pending: Arc<Mutex<Option<ResistanceCommand>>>,
    loop_active: Arc<RwLock<bool>>,
    events_tx: mpsc::UnboundedSender<TrainerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TrainerEvent>>,
    loop_config: LoopConfig,
}

impl Trainer {
    /// Connect to the first trainer found during a scan, with defaults
    ///
    /// Devices are ranked by signal strength when several are in range.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::DeviceNotFound`] if the scan finds nothing,
    /// or any connection error from the underlying link establishment.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_params(ConnectionParams::default()).await
    }

    /// Connect to the first trainer found, with custom parameters
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::DeviceNotFound`] if the scan finds nothing,
    /// or any connection error from the underlying link establishment.
    pub async fn connect_first_with_params(params: ConnectionParams) -> Result<Self> {
        let manager = BleManager::new().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let _ = events_tx.send(TrainerEvent::StatusChanged(TrainerStatus::Scanning));
        let mut devices = manager.scan_for_trainers(&params).await?;
        for device in &devices {
            let _ = events_tx.send(TrainerEvent::DeviceDiscovered(device.clone()));
        }

        if devices.is_empty() {
            return Err(TrainerError::DeviceNotFound);
        }
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        let device_info = devices.remove(0);

        Self::connect_internal(&manager, device_info, params, events_tx, events_rx).await
    }

    /// Connect to a specific trainer discovered through [`BleManager`]
    ///
    /// # Errors
    ///
    /// Returns connection errors from the underlying link establishment.
    pub async fn connect_to_device(
        manager: &BleManager,
        device_info: DeviceInfo,
        params: ConnectionParams,
    ) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::connect_internal(manager, device_info, params, events_tx, events_rx).await
    }

    async fn connect_internal(
        manager: &BleManager,
        device_info: DeviceInfo,
        params: ConnectionParams,
        events_tx: mpsc::UnboundedSender<TrainerEvent>,
        events_rx: mpsc::UnboundedReceiver<TrainerEvent>,
    ) -> Result<Self> {
        let _ = events_tx.send(TrainerEvent::StatusChanged(TrainerStatus::Connecting));

        let mut connection = manager.connect_to_device(&device_info, &params).await?;
        let endpoint = connection.endpoint();
        let notifications = connection
            .take_notifications()
            .ok_or_else(|| TrainerError::Other("notification channel unavailable".to_string()))?;

        let trainer = Self {
            connection: Arc::new(Mutex::new(Some(connection))),
            device_info,
            endpoint,
            status: Arc::new(RwLock::new(TrainerStatus::Connected)),
            pending: Arc::new(Mutex::new(None)),
            loop_active: Arc::new(RwLock::new(true)),
            events_tx,
            events_rx: Some(events_rx),
            loop_config: LoopConfig::default(),
        };
        let _ = trainer
            .events_tx
            .send(TrainerEvent::StatusChanged(TrainerStatus::Connected));

        trainer.spawn_decode_task(notifications, params.wheel_circumference_m);

        trainer.send_init_command().await?;
        *trainer.status.write().await = TrainerStatus::Ready;
        let _ = trainer
            .events_tx
            .send(TrainerEvent::StatusChanged(TrainerStatus::Ready));

        trainer.spawn_command_loop();

        Ok(trainer)
    }

    /// Get device information
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Which control dialect the trainer speaks
    #[must_use]
    pub const fn endpoint(&self) -> ControlEndpoint {
        self.endpoint
    }

    /// Get the current link status
    pub async fn status(&self) -> TrainerStatus {
        *self.status.read().await
    }

    /// Check if the device is connected
    pub async fn is_connected(&self) -> bool {
        if let Some(conn) = self.connection.lock().await.as_ref() {
            conn.is_connected().await
        } else {
            false
        }
    }

    /// Take the event receiver
    ///
    /// Yields `Some` exactly once; the embedding application owns the
    /// receiver afterwards.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TrainerEvent>> {
        self.events_rx.take()
    }

    /// Queue a raw resistance fraction for transmission
    ///
    /// The fraction is clamped to `[0, 1]`. Overwrites any pending command.
    pub async fn queue_resistance(&self, fraction: f64) {
        let command = ResistanceCommand::from_fraction(fraction);
        debug!("Queueing resistance {:.3}", command.resistance_fraction);
        *self.pending.lock().await = Some(command);
    }

    /// Queue a virtual grade for transmission
    ///
    /// The grade is mapped through the calibration table to a device-safe
    /// resistance fraction. Overwrites any pending command.
    pub async fn queue_grade(&self, grade_percent: f64) {
        let fraction = workout::grade_to_resistance(grade_percent);
        let command = ResistanceCommand::from_grade(grade_percent, fraction);
        debug!(
            "Queueing grade {:.1}% (resistance {:.3})",
            grade_percent, fraction
        );
        *self.pending.lock().await = Some(command);
    }

    /// Send the one-time init/unlock command
    ///
    /// Sent once at connection establishment, outside the coalescing loop:
    /// the vendor dialect requires an unlock before it accepts control
    /// writes, FTMS requires taking control of the machine.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Disconnected`] if there is no link, or the
    /// write error from the transport.
    pub async fn send_init_command(&self) -> Result<()> {
        let frame = match self.endpoint {
            ControlEndpoint::Vendor => protocol::encode_unlock(),
            ControlEndpoint::Ftms => protocol::encode_opcode(protocol::FTMS_OP_REQUEST_CONTROL),
        };

        info!("Sending init command for {:?} endpoint", self.endpoint);
        let connection = self.connection.lock().await;
        match connection.as_ref() {
            Some(conn) => conn.write_command(&frame).await,
            None => Err(TrainerError::Disconnected),
        }
    }

    /// Disconnect from the trainer and stop the command loop
    ///
    /// Stops the transmission loop, discards any pending command and tears
    /// down the link. No write is attempted after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if the transport-level disconnect
    /// fails; local state is cleaned up regardless.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from trainer");

        *self.loop_active.write().await = false;
        self.pending.lock().await.take();
        *self.status.write().await = TrainerStatus::Disconnected;
        let _ = self
            .events_tx
            .send(TrainerEvent::StatusChanged(TrainerStatus::Disconnected));

        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect().await?;
        }

        Ok(())
    }

    /// Decode incoming telemetry and emit events until the link drops
    fn spawn_decode_task(
        &self,
        mut notifications: mpsc::UnboundedReceiver<RawNotification>,
        wheel_circumference_m: f64,
    ) {
        let events = self.events_tx.clone();
        let status = self.status.clone();
        let pending = self.pending.clone();
        let loop_active = self.loop_active.clone();

        tokio::spawn(async move {
            let mut wheel = WheelTracker::new(wheel_circumference_m);
            let mut crank = CrankTracker::new();

            while let Some(notification) = notifications.recv().await {
                handle_notification(&notification, &mut wheel, &mut crank, &events);
            }

            // Stream closed: the link is gone. Stop the command loop and
            // discard whatever was pending before anyone can write again.
            warn!("Telemetry stream closed - link lost");
            *loop_active.write().await = false;
            pending.lock().await.take();
            *status.write().await = TrainerStatus::Disconnected;
            let _ = events.send(TrainerEvent::ConnectionLost);
        });
    }

    fn spawn_command_loop(&self) {
        let connection = self.connection.clone();
        let pending = self.pending.clone();
        let active = self.loop_active.clone();
        let endpoint = self.endpoint;
        let config = self.loop_config.clone();

        tokio::spawn(async move {
            let sink = ConnectionSink(connection);
            run_command_loop(&sink, &pending, &active, endpoint, &config).await;
            debug!("Command loop terminated");
        });
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        let connection = self.connection.clone();
        let active = self.loop_active.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            *active.write().await = false;
            pending.lock().await.take();
            let value = connection.lock().await.take();
            if let Some(conn) = value {
                let _ = conn.disconnect().await;
            }
        });
    }
}

/// Encode a pending command for the connected dialect
///
/// The vendor dialect always takes the pre-mapped resistance fraction. FTMS
/// distinguishes intent: a grade command becomes a simulation frame driven by
/// the trainer's own physics model, a raw resistance command becomes a target
/// resistance level carrying the fraction.
fn encode_command(endpoint: ControlEndpoint, command: &ResistanceCommand) -> Bytes {
    match (endpoint, command.kind) {
        (ControlEndpoint::Vendor, _) => {
            protocol::encode_resistance_mode(command.resistance_fraction)
        }
        (ControlEndpoint::Ftms, CommandKind::Grade) => {
            protocol::encode_ftms_simulation_default(command.target_grade_percent)
        }
        (ControlEndpoint::Ftms, CommandKind::Resistance) => {
            protocol::encode_ftms_resistance(command.resistance_fraction)
        }
    }
}

/// Route one raw notification through the codec and emit derived events
fn handle_notification(
    notification: &RawNotification,
    wheel: &mut WheelTracker,
    crank: &mut CrankTracker,
    events: &mpsc::UnboundedSender<TrainerEvent>,
) {
    for reading in protocol::decode_notification(notification.uuid, &notification.data) {
        match reading {
            TelemetryReading::Power { watts } => {
                let _ = events.send(TrainerEvent::PowerReceived { watts });
            }
            TelemetryReading::Wheel(data) => {
                if let Some(sample) = wheel.update(data) {
                    let _ = events.send(TrainerEvent::SpeedUpdated {
                        speed_kph: sample.speed_kph,
                        distance_m: sample.distance_m,
                    });
                }
            }
            TelemetryReading::Crank(data) => {
                if let Some(sample) = crank.update(data) {
                    let _ = events.send(TrainerEvent::CadenceUpdated { rpm: sample.rpm });
                }
            }
        }
    }
}

/// The command transmission loop
///
/// One state machine with two states: Idle (slot empty) and Pending (slot
/// holds the newest queued command). Each tick attempts at most one write;
/// a successful write empties the slot unless a newer command arrived while
/// the write was in flight, a failed write keeps the command and waits out
/// the back-off. The loop exits when `active` is cleared or the sink
/// reports a connection-level error, and always clears the slot on the way
/// out so no stale command survives a reconnect.
async fn run_command_loop(
    sink: &dyn CommandSink,
    pending: &Mutex<Option<ResistanceCommand>>,
    active: &RwLock<bool>,
    endpoint: ControlEndpoint,
    config: &LoopConfig,
) {
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !*active.read().await {
            break;
        }

        let Some(command) = *pending.lock().await else {
            continue;
        };

        let frame = encode_command(endpoint, &command);
        match sink.write_command(&frame).await {
            Ok(()) => {
                let mut slot = pending.lock().await;
                // Only clear the slot if it still holds what we just sent;
                // a newer command queued mid-write must not be lost.
                if *slot == Some(command) {
                    *slot = None;
                }
                debug!(
                    "Transmitted command (grade {:.1}%)",
                    command.target_grade_percent
                );
            }
            Err(e) if e.is_connection_error() => {
                warn!("Command loop stopping, link error: {}", e);
                break;
            }
            Err(e) => {
                warn!(
                    "Command write failed, retrying in {:?}: {}",
                    config.retry_backoff, e
                );
                tokio::time::sleep(config.retry_backoff).await;
            }
        }
    }

    pending.lock().await.take();
}

/// Adapts the shared, optional connection into a [`CommandSink`]
struct ConnectionSink(Arc<Mutex<Option<TrainerConnection>>>);

#[async_trait::async_trait]
impl CommandSink for ConnectionSink {
    async fn write_command(&self, data: &[u8]) -> Result<()> {
        let connection = self.0.lock().await;
        match connection.as_ref() {
            Some(conn) => conn.write_command(data).await,
            None => Err(TrainerError::Disconnected),
        }
    }
}
