use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex, Notify},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, TrainerError},
    types::{ConnectionParams, DeviceInfo},
    CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID, CYCLING_POWER_MEASUREMENT_UUID,
    CYCLING_POWER_SERVICE_UUID, FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID,
    VENDOR_TRAINER_CONTROL_UUID, VENDOR_TRAINER_SERVICE_UUID,
};

/// Which control dialect the connected trainer speaks
///
/// Determined once at connection time by probing the advertised services in
/// priority order; all outgoing command encoding is dispatched on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEndpoint {
    /// Proprietary vendor control characteristic
    Vendor,
    /// Standard Fitness Machine Control Point
    Ftms,
}

/// A raw notification delivered by the transport
///
/// The decode entry point receives the characteristic UUID plus an owned
/// byte buffer; the core never holds references back into transport objects.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Source characteristic
    pub uuid: Uuid,
    /// Notification payload
    pub data: Vec<u8>,
}

/// BLE manager for trainer discovery and connection
pub struct BleManager {
    central: Adapter,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    stop_signal: Notify,
}

impl BleManager {
    /// Create a new BLE manager on the first available adapter
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::DeviceNotFound`] if no Bluetooth adapter is
    /// available, or [`TrainerError::Ble`] if the adapter cannot be
    /// initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or(TrainerError::DeviceNotFound)?;

        Ok(Self {
            central,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            stop_signal: Notify::new(),
        })
    }

    /// Scan for smart trainers
    ///
    /// Starts a filtered scan, waits for the configured scan window (or
    /// until [`stop_scanning`](Self::stop_scanning) is called from another
    /// task), stops scanning and returns every peripheral found so far that
    /// advertises a known trainer service.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] for Bluetooth-related errors.
    pub async fn scan_for_trainers(&self, params: &ConnectionParams) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for smart trainers...");

        let scan_filter = ScanFilter {
            services: vec![
                VENDOR_TRAINER_SERVICE_UUID,
                FTMS_SERVICE_UUID,
                CYCLING_POWER_SERVICE_UUID,
            ],
        };

        self.central.start_scan(scan_filter).await?;
        scan_window(
            Duration::from_millis(params.scan_timeout_ms),
            &self.stop_signal,
        )
        .await;
        self.central.stop_scan().await?;

        let peripherals = self.central.peripherals().await?;
        let mut devices = Vec::new();
        for peripheral in peripherals {
            if let Some(device_info) = Self::extract_trainer_info(&peripheral).await {
                devices.push(device_info.clone());

                self.peripherals
                    .lock()
                    .await
                    .insert(device_info.address.clone(), peripheral);

                info!("Found trainer: {}", device_info.name);
            }
        }

        info!("Scan completed. Found {} trainer(s)", devices.len());
        Ok(devices)
    }

    /// Stop an in-progress scan early
    ///
    /// Wakes a concurrent [`scan_for_trainers`](Self::scan_for_trainers)
    /// call out of its scan window; that call then returns whatever devices
    /// were discovered up to this point.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if the adapter refuses to stop.
    pub async fn stop_scanning(&self) -> Result<()> {
        self.stop_signal.notify_waiters();
        self.central.stop_scan().await?;
        Ok(())
    }

    /// Connect to a previously discovered trainer
    ///
    /// Establishes the link, discovers services, locates the control
    /// characteristic by probing the known dialects in priority order,
    /// subscribes to the telemetry characteristics and spawns the
    /// notification forwarding task.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::DeviceNotFound`] if the device was not seen
    /// during scanning, [`TrainerError::Timeout`] if connection times out,
    /// [`TrainerError::ControlEndpointNotFound`] if no usable control
    /// characteristic exists, or [`TrainerError::Ble`] for other failures.
    pub async fn connect_to_device(
        &self,
        device_info: &DeviceInfo,
        params: &ConnectionParams,
    ) -> Result<TrainerConnection> {
        info!("Connecting to trainer: {}", device_info.name);

        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(&device_info.address)
            .cloned()
            .ok_or(TrainerError::DeviceNotFound)?;

        let connect_future = peripheral.connect();
        timeout(Duration::from_millis(params.timeout_ms), connect_future)
            .await
            .map_err(|_| TrainerError::Timeout {
                timeout_ms: params.timeout_ms,
            })?
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        let (control_char, endpoint) = find_control_endpoint(&peripheral.characteristics())
            .ok_or(TrainerError::ControlEndpointNotFound)?;
        info!("Using control endpoint: {:?}", endpoint);

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        subscribe_telemetry(&peripheral).await?;
        spawn_notification_forwarder(peripheral.clone(), notification_tx);

        info!("Successfully connected to {}", device_info.name);

        Ok(TrainerConnection {
            peripheral,
            control_char,
            endpoint,
            notifications: Some(notification_rx),
        })
    }

    /// Build a [`DeviceInfo`] if the peripheral looks like a trainer
    async fn extract_trainer_info(peripheral: &Peripheral) -> Option<DeviceInfo> {
        let properties = peripheral.properties().await.ok()??;

        let advertises_trainer = properties.services.iter().any(|uuid| {
            *uuid == VENDOR_TRAINER_SERVICE_UUID
                || *uuid == FTMS_SERVICE_UUID
                || *uuid == CYCLING_POWER_SERVICE_UUID
        });
        if !advertises_trainer {
            return None;
        }

        let name = properties
            .local_name
            .unwrap_or_else(|| "Unknown Trainer".to_string());

        Some(DeviceInfo::new(
            name,
            properties.address.to_string(),
            properties.rssi.unwrap_or(0),
        ))
    }
}

/// Wait out a scan window, returning early if the stop signal fires
async fn scan_window(window: Duration, stop: &Notify) {
    tokio::select! {
        () = tokio::time::sleep(window) => {}
        () = stop.notified() => {
            debug!("Scan window cut short by stop request");
        }
    }
}

/// Probe the discovered characteristics for a usable control endpoint
///
/// Candidates are tried in priority order: the vendor characteristic first,
/// the standard FTMS control point second. The first match wins.
fn find_control_endpoint(
    characteristics: &std::collections::BTreeSet<Characteristic>,
) -> Option<(Characteristic, ControlEndpoint)> {
    let probes = [
        (VENDOR_TRAINER_CONTROL_UUID, ControlEndpoint::Vendor),
        (FTMS_CONTROL_POINT_UUID, ControlEndpoint::Ftms),
    ];

    probes.into_iter().find_map(|(uuid, endpoint)| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .map(|c| (c, endpoint))
    })
}

/// Subscribe to every telemetry characteristic the trainer exposes
async fn subscribe_telemetry(peripheral: &Peripheral) -> Result<()> {
    for characteristic in peripheral.characteristics() {
        let wanted = characteristic.uuid == CYCLING_POWER_MEASUREMENT_UUID
            || characteristic.uuid == CSC_MEASUREMENT_UUID;
        if wanted {
            match peripheral.subscribe(&characteristic).await {
                Ok(()) => debug!("Subscribed to {}", characteristic.uuid),
                Err(e) => warn!("Failed to subscribe to {}: {}", characteristic.uuid, e),
            }
        }
    }
    Ok(())
}

/// Forward transport notifications into the decode channel
///
/// Ends when the notification stream closes (disconnect) or the receiving
/// side is dropped; dropping the sender is what signals connection loss to
/// the decode task.
fn spawn_notification_forwarder(
    peripheral: Peripheral,
    sender: mpsc::UnboundedSender<RawNotification>,
) {
    tokio::spawn(async move {
        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open notification stream: {}", e);
                return;
            }
        };

        while let Some(notification) = stream.next().await {
            let forwarded = sender.send(RawNotification {
                uuid: notification.uuid,
                data: notification.value,
            });
            if forwarded.is_err() {
                break;
            }
        }

        debug!("Notification stream ended");
    });
}

/// A sink the command transmission loop writes encoded commands into
///
/// Trait seam between the loop and the transport so the loop's coalescing
/// and retry behavior can be tested against an in-memory sink.
#[async_trait::async_trait]
pub trait CommandSink: Send + Sync {
    /// Write one encoded command to the control endpoint
    async fn write_command(&self, data: &[u8]) -> Result<()>;
}

/// Active connection to a smart trainer
pub struct TrainerConnection {
    peripheral: Peripheral,
    control_char: Characteristic,
    endpoint: ControlEndpoint,
    notifications: Option<mpsc::UnboundedReceiver<RawNotification>>,
}

impl TrainerConnection {
    /// Which control dialect this connection uses
    #[must_use]
    pub const fn endpoint(&self) -> ControlEndpoint {
        self.endpoint
    }

    /// Take the telemetry notification receiver
    ///
    /// Yields `Some` exactly once; the decode task owns the receiver for
    /// the lifetime of the connection.
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<RawNotification>> {
        self.notifications.take()
    }

    /// Check if the device is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Disconnect from the device
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    /// Get the peripheral address
    #[must_use]
    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }
}

#[async_trait::async_trait]
impl CommandSink for TrainerConnection {
    async fn write_command(&self, data: &[u8]) -> Result<()> {
        debug!("Writing command: {:02X?}", data);

        self.peripheral
            .write(&self.control_char, data, WriteType::WithResponse)
            .await
            .map_err(|e| TrainerError::WriteFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::bleuuid;

    #[test]
    fn test_control_probe_order_prefers_vendor() {
        // The probe table is ordered; vendor must come before FTMS
        let probes = [
            (VENDOR_TRAINER_CONTROL_UUID, ControlEndpoint::Vendor),
            (FTMS_CONTROL_POINT_UUID, ControlEndpoint::Ftms),
        ];
        assert_eq!(probes[0].1, ControlEndpoint::Vendor);
        assert_eq!(probes[1].1, ControlEndpoint::Ftms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_cuts_scan_window_short() {
        let stop = Arc::new(Notify::new());
        let started = tokio::time::Instant::now();

        let signal = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signal.notify_waiters();
        });

        // A ten-second window must end as soon as the signal fires
        scan_window(Duration::from_secs(10), &stop).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_window_expires_without_signal() {
        let stop = Notify::new();
        let started = tokio::time::Instant::now();

        scan_window(Duration::from_millis(200), &stop).await;
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_uuid_constants_match_short_forms() {
        assert_eq!(FTMS_SERVICE_UUID, bleuuid::uuid_from_u16(0x1826));
        assert_eq!(FTMS_CONTROL_POINT_UUID, bleuuid::uuid_from_u16(0x2AD9));
        assert_eq!(CYCLING_POWER_SERVICE_UUID, bleuuid::uuid_from_u16(0x1818));
        assert_eq!(
            CYCLING_POWER_MEASUREMENT_UUID,
            bleuuid::uuid_from_u16(0x2A63)
        );
        assert_eq!(CSC_SERVICE_UUID, bleuuid::uuid_from_u16(0x1816));
        assert_eq!(CSC_MEASUREMENT_UUID, bleuuid::uuid_from_u16(0x2A5B));
    }
}
