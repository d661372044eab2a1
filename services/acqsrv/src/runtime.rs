//! Gateway runtime
//!
//! Builds devices from configuration, owns the shared device registry and
//! the Refreshed broadcast channel, and hands devices to the scheduler.

use crate::archive::{ArchiveBackend, DeviceArchive};
use crate::config::{AcqConfig, SchedulerConfig, TransportConfig};
use crate::device::{Device, DevicePayload, RefreshedEvent};
use crate::error::{AcqError, Result};
use crate::reconnect::ReconnectPolicy;
use crate::scheduler::{Scheduler, SchedulerHandle, SharedDevice};
use crate::transport::{MemoryTransport, ModbusTcpTransport, SimulatedPlc, Transport};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Capacity of the Refreshed channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Gateway {
    devices: DashMap<String, SharedDevice>,
    simulators: DashMap<String, SimulatedPlc>,
    events: broadcast::Sender<RefreshedEvent>,
    /// First tick after everything already archived
    resume_tick: u64,
}

impl Gateway {
    /// Build and initialize every configured device.
    ///
    /// `archive` is `None` in validate mode; devices then run without
    /// durable storage.
    pub async fn build(config: &AcqConfig, archive: Option<ArchiveBackend>) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut gateway = Self {
            devices: DashMap::new(),
            simulators: DashMap::new(),
            events,
            resume_tick: 0,
        };

        for device_config in &config.devices {
            if gateway.devices.contains_key(&device_config.id) {
                return Err(AcqError::AlreadyExists {
                    resource: "Device",
                    id: device_config.id.clone(),
                });
            }

            let transport: Box<dyn Transport> = match &device_config.transport {
                TransportConfig::ModbusTcp {
                    host,
                    port,
                    unit_id,
                    timeout_ms,
                } => Box::new(ModbusTcpTransport::new(
                    host.clone(),
                    *port,
                    *unit_id,
                    Duration::from_millis(*timeout_ms),
                )),
                TransportConfig::Simulated => {
                    let plc = SimulatedPlc::new();
                    gateway
                        .simulators
                        .insert(device_config.id.clone(), plc.clone());
                    Box::new(MemoryTransport::new(plc))
                },
            };

            let mut device = Device::new(device_config, transport, gateway.events.clone())?;
            if let Some(backend) = &archive {
                device = device.with_archive(DeviceArchive::new(
                    backend.clone(),
                    device_config.id.clone(),
                    config.archive.buffer_size,
                ));
            }
            device.init().await?;
            if let Some(last) = device.archive().and_then(|archive| archive.last_tick()) {
                gateway.resume_tick = gateway.resume_tick.max(last.saturating_add(1));
            }

            gateway
                .devices
                .insert(device_config.id.clone(), Arc::new(Mutex::new(device)));
        }

        info!(
            "Gateway built with {} devices, ticks resume at {}",
            gateway.devices.len(),
            gateway.resume_tick
        );
        Ok(gateway)
    }

    pub fn device(&self, id: &str) -> Result<SharedDevice> {
        self.devices
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AcqError::NotFound {
                resource: "Device",
                id: id.to_string(),
            })
    }

    /// Device ids in sorted order
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// PLC image behind a simulated device
    pub fn simulator(&self, id: &str) -> Option<SimulatedPlc> {
        self.simulators.get(id).map(|entry| entry.value().clone())
    }

    pub fn resume_tick(&self) -> u64 {
        self.resume_tick
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshedEvent> {
        self.events.subscribe()
    }

    /// Shared handles, cloned out so no map guard is held across awaits
    fn shared_devices(&self) -> Vec<(String, SharedDevice)> {
        let mut devices: Vec<(String, SharedDevice)> = self
            .devices
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices
    }

    /// Connect every device; failures leave the device Inactive for the
    /// scheduler to retry. Returns the number of active devices.
    pub async fn connect_all(&self) -> usize {
        let mut active = 0;
        for (id, device) in self.shared_devices() {
            match device.lock().await.connect().await {
                Ok(()) => active += 1,
                Err(e) => warn!("Device {} not connected at startup: {}", id, e),
            }
        }
        active
    }

    pub fn start(&self, config: &SchedulerConfig) -> SchedulerHandle {
        let mut scheduler = Scheduler::new(
            config.tick_period(),
            ReconnectPolicy::from_config(&config.reconnect),
        )
        .starting_at(self.resume_tick);
        for (_, device) in self.shared_devices() {
            scheduler.add_device(device);
        }
        scheduler.start()
    }

    pub async fn snapshot(&self) -> Vec<DevicePayload> {
        let mut payloads = Vec::with_capacity(self.devices.len());
        for (_, device) in self.shared_devices() {
            payloads.push(device.lock().await.payload());
        }
        payloads
    }

    /// Disconnect every device
    pub async fn shutdown(&self) {
        for (id, device) in self.shared_devices() {
            if let Err(e) = device.lock().await.disconnect().await {
                warn!("Device {} disconnect failed: {}", id, e);
            }
        }
        info!("Gateway shut down");
    }
}
