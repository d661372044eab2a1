//! Tick scheduler
//!
//! One driver task advances the global tick on a `watch` channel; every
//! device gets its own worker task. A worker holds its device lock for the
//! whole tick, so ticks of one device never overlap while devices run in
//! parallel. A worker that falls behind skips straight to the latest tick.

use crate::device::{Device, DeviceState};
use crate::reconnect::{ConnectionState, ReconnectGate, ReconnectPolicy};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type SharedDevice = Arc<Mutex<Device>>;

pub struct Scheduler {
    period: Duration,
    policy: ReconnectPolicy,
    origin: u64,
    devices: Vec<SharedDevice>,
}

/// Running scheduler
pub struct SchedulerHandle {
    token: CancellationToken,
    tick_rx: watch::Receiver<u64>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(period: Duration, policy: ReconnectPolicy) -> Self {
        Self {
            period,
            policy,
            origin: 0,
            devices: Vec::new(),
        }
    }

    /// First tick to publish
    pub fn starting_at(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }

    pub fn add_device(&mut self, device: SharedDevice) {
        self.devices.push(device);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Spawn the driver and one worker per device
    pub fn start(self) -> SchedulerHandle {
        let token = CancellationToken::new();
        let (tick_tx, tick_rx) = watch::channel(self.origin);
        let mut tasks = Vec::with_capacity(self.devices.len() + 1);

        for device in self.devices {
            tasks.push(tokio::spawn(run_device(
                device,
                tick_tx.subscribe(),
                ReconnectGate::new(self.policy.clone()),
                token.clone(),
            )));
        }
        tasks.push(tokio::spawn(drive(
            self.period,
            self.origin,
            tick_tx,
            token.clone(),
        )));

        info!(
            "Scheduler started: {} devices, tick {:?} from {}",
            tasks.len() - 1,
            self.period,
            self.origin
        );
        SchedulerHandle {
            token,
            tick_rx,
            tasks,
        }
    }
}

impl SchedulerHandle {
    /// Latest published tick
    pub fn current_tick(&self) -> u64 {
        *self.tick_rx.borrow()
    }

    /// Receiver that observes every published tick
    pub fn ticks(&self) -> watch::Receiver<u64> {
        self.tick_rx.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel all tasks and wait for in-flight ticks to finish
    pub async fn stop(self) {
        self.token.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!("Scheduler task failed: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

async fn drive(
    period: Duration,
    origin: u64,
    tick_tx: watch::Sender<u64>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick = origin;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                tick_tx.send_replace(tick);
                tick = tick.wrapping_add(1);
            }
        }
    }
    debug!("Tick driver stopped at {}", tick);
}

async fn run_device(
    device: SharedDevice,
    mut tick_rx: watch::Receiver<u64>,
    mut gate: ReconnectGate,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = tick_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let tick = *tick_rx.borrow_and_update();

        let mut device = device.lock().await;
        ensure_connected(&mut device, &mut gate).await;
        device.tick(tick).await;
    }
}

/// Reconnect an inactive device when its backoff allows
async fn ensure_connected(device: &mut Device, gate: &mut ReconnectGate) {
    match device.state() {
        DeviceState::Active => {
            if gate.state() != ConnectionState::Connected {
                gate.mark_connected();
            }
        },
        DeviceState::Initialized | DeviceState::Inactive => {
            if gate.state() == ConnectionState::Connected {
                gate.mark_disconnected();
            }
            let now = Instant::now();
            if !gate.attempt_due(now) {
                return;
            }
            match device.connect().await {
                Ok(()) => gate.mark_connected(),
                Err(_) => {
                    gate.record_failure(now);
                },
            }
        },
        DeviceState::Uninitialized => {},
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::transport::{MemoryTransport, SimulatedPlc};
    use tokio::sync::broadcast;
    use voltage_codec::Protocol;

    async fn shared(plc: &SimulatedPlc) -> SharedDevice {
        let (events, _) = broadcast::channel(16);
        let mut device = Device::new(
            &DeviceConfig::simulated("sim", Protocol::Modbus),
            Box::new(MemoryTransport::new(plc.clone())),
            events,
        )
        .unwrap();
        device.init().await.unwrap();
        Arc::new(Mutex::new(device))
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_ticks_advance_and_stop() {
        let plc = SimulatedPlc::new();
        let device = shared(&plc).await;
        let mut scheduler = Scheduler::new(Duration::from_millis(5), fast_policy());
        scheduler.add_device(device.clone());
        assert_eq!(scheduler.device_count(), 1);

        let handle = scheduler.start();
        let mut ticks = handle.ticks();
        while *ticks.borrow_and_update() < 3 {
            ticks.changed().await.unwrap();
        }
        assert!(handle.current_tick() >= 3);
        handle.stop().await;

        assert_eq!(device.lock().await.state(), DeviceState::Active);
    }

    #[tokio::test]
    async fn test_ticks_start_at_origin() {
        let plc = SimulatedPlc::new();
        let device = shared(&plc).await;
        let mut scheduler =
            Scheduler::new(Duration::from_millis(5), fast_policy()).starting_at(1_000);
        scheduler.add_device(device);

        let handle = scheduler.start();
        let mut ticks = handle.ticks();
        ticks.changed().await.unwrap();
        assert!(*ticks.borrow_and_update() >= 1_000);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_inactive_device_reconnects() {
        let plc = SimulatedPlc::new();
        plc.set_refuse_connect(true);
        let device = shared(&plc).await;
        let mut scheduler = Scheduler::new(Duration::from_millis(2), fast_policy());
        scheduler.add_device(device.clone());
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ne!(device.lock().await.state(), DeviceState::Active);

        plc.set_refuse_connect(false);
        let mut active = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if device.lock().await.state() == DeviceState::Active {
                active = true;
                break;
            }
        }
        handle.stop().await;
        assert!(active);
    }
}
