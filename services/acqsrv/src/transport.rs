//! Device transports
//!
//! A transport moves address units (registers, bits or bytes, one per
//! `u16`) for a [`RequestKey`]. Framing lives below this line:
//! - [`ModbusTcpTransport`]: Modbus TCP client on `tokio-modbus`
//! - [`MemoryTransport`]: in-process PLC image backed by [`SimulatedPlc`]

use crate::error::TransportError;
use crate::request::{RequestKey, S7Address};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_modbus::prelude::*;
use tracing::{debug, info};
use voltage_codec::function_code::{
    READ_COILS, READ_DISCRETE_INPUTS, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS, S7_READ_VAR,
    S7_WRITE_VAR, WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_COIL,
    WRITE_SINGLE_REGISTER,
};
use voltage_codec::AddressUnit;

type TransportResult<T> = std::result::Result<T, TransportError>;

/// Abstract "read/write units at offset" link to one device
///
/// Implementations report a clean error instead of partial data.
#[async_trait]
pub trait Transport: Send {
    /// Human-readable endpoint, used in logs
    fn endpoint(&self) -> String;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> TransportResult<()>;

    async fn disconnect(&mut self) -> TransportResult<()>;

    async fn read_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        count: u32,
    ) -> TransportResult<Vec<u16>>;

    async fn write_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        units: &[u16],
    ) -> TransportResult<()>;
}

// ============================================================================
// Modbus TCP
// ============================================================================

pub struct ModbusTcpTransport {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<client::Context>,
}

impl ModbusTcpTransport {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
            ctx: None,
        }
    }
}

fn modbus_u16(value: u32) -> TransportResult<u16> {
    u16::try_from(value).map_err(|_| TransportError::InvalidAddress(value))
}

/// Await a client call under `timeout`, flattening transport and exception errors
async fn call<T, E, X>(
    timeout: Duration,
    fut: impl Future<Output = std::result::Result<std::result::Result<T, X>, E>>,
) -> TransportResult<T>
where
    E: Display,
    X: Debug,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
        .map_err(|e| TransportError::Io(e.to_string()))?
        .map_err(|e| TransportError::Exception(format!("{:?}", e)))
}

#[async_trait]
impl Transport for ModbusTcpTransport {
    fn endpoint(&self) -> String {
        format!("{}:{}#{}", self.host, self.port, self.unit_id)
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        let endpoint = self.endpoint();
        let failed = |reason: String| TransportError::ConnectFailed {
            endpoint: endpoint.clone(),
            reason,
        };

        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| failed(e.to_string()))?
            .next()
            .ok_or_else(|| failed("host did not resolve".to_string()))?;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, Slave(self.unit_id)))
            .await
            .map_err(|_| failed("connection timeout".to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        self.ctx = Some(ctx);
        info!("Modbus TCP connected: {}", endpoint);
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.disconnect()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            debug!("Modbus TCP disconnected: {}", self.endpoint());
        }
        Ok(())
    }

    async fn read_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        count: u32,
    ) -> TransportResult<Vec<u16>> {
        if key.area.is_some() {
            return Err(TransportError::Unsupported(key.function_code));
        }
        let timeout = self.timeout;
        let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;
        let address = modbus_u16(start)?;
        let quantity = modbus_u16(count)?;

        let bits_to_units = |bits: Vec<bool>| -> Vec<u16> {
            bits.into_iter()
                .take(count as usize)
                .map(u16::from)
                .collect()
        };

        match key.function_code {
            READ_COILS => Ok(bits_to_units(
                call(timeout, ctx.read_coils(address, quantity)).await?,
            )),
            READ_DISCRETE_INPUTS => Ok(bits_to_units(
                call(timeout, ctx.read_discrete_inputs(address, quantity)).await?,
            )),
            READ_HOLDING_REGISTERS => {
                call(timeout, ctx.read_holding_registers(address, quantity)).await
            },
            READ_INPUT_REGISTERS => call(timeout, ctx.read_input_registers(address, quantity)).await,
            other => Err(TransportError::Unsupported(other)),
        }
    }

    async fn write_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        units: &[u16],
    ) -> TransportResult<()> {
        if key.area.is_some() {
            return Err(TransportError::Unsupported(key.function_code));
        }
        let timeout = self.timeout;
        let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;
        let address = modbus_u16(start)?;
        let first = || {
            units.first().copied().ok_or(TransportError::ShortResponse {
                expected: 1,
                actual: 0,
            })
        };

        match key.function_code {
            WRITE_SINGLE_COIL => {
                call(timeout, ctx.write_single_coil(address, first()? != 0)).await
            },
            WRITE_SINGLE_REGISTER => {
                call(timeout, ctx.write_single_register(address, first()?)).await
            },
            WRITE_MULTIPLE_COILS => {
                let coils: Vec<bool> = units.iter().map(|u| *u != 0).collect();
                call(timeout, ctx.write_multiple_coils(address, &coils)).await
            },
            WRITE_MULTIPLE_REGISTERS => {
                call(timeout, ctx.write_multiple_registers(address, units)).await
            },
            other => Err(TransportError::Unsupported(other)),
        }
    }
}

// ============================================================================
// In-memory PLC
// ============================================================================

/// Memory region of the simulated PLC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
    /// S7 area, byte addressed
    S7(S7Address),
}

/// One operation seen by the simulated PLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    pub function_code: u8,
    pub start: u32,
    pub count: u32,
    pub write: bool,
}

#[derive(Debug, Default)]
struct PlcState {
    memory: HashMap<(MemoryArea, u32), u16>,
    failing: bool,
    refuse_connect: bool,
    calls: Vec<TransportCall>,
}

/// Shared image of a simulated PLC
///
/// Cloning yields another handle on the same image, so a test can keep one
/// while the device owns the transport. Unset addresses read as zero.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlc {
    state: Arc<Mutex<PlcState>>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, area: MemoryArea, address: u32, value: u16) {
        self.state.lock().memory.insert((area, address), value);
    }

    fn get(&self, area: MemoryArea, address: u32) -> u16 {
        self.state
            .lock()
            .memory
            .get(&(area, address))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_holding(&self, address: u32, value: u16) {
        self.set(MemoryArea::HoldingRegisters, address, value);
    }

    pub fn set_holding_words(&self, address: u32, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.set_holding(address + i as u32, *word);
        }
    }

    pub fn set_input(&self, address: u32, value: u16) {
        self.set(MemoryArea::InputRegisters, address, value);
    }

    pub fn set_coil(&self, address: u32, value: bool) {
        self.set(MemoryArea::Coils, address, u16::from(value));
    }

    pub fn set_discrete(&self, address: u32, value: bool) {
        self.set(MemoryArea::DiscreteInputs, address, u16::from(value));
    }

    pub fn set_s7_byte(&self, area: S7Address, address: u32, value: u8) {
        self.set(MemoryArea::S7(area), address, u16::from(value));
    }

    pub fn holding(&self, address: u32) -> u16 {
        self.get(MemoryArea::HoldingRegisters, address)
    }

    pub fn coil(&self, address: u32) -> bool {
        self.get(MemoryArea::Coils, address) != 0
    }

    pub fn s7_byte(&self, area: S7Address, address: u32) -> u8 {
        self.get(MemoryArea::S7(area), address) as u8
    }

    /// Make every read and write fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, key: &RequestKey, start: u32, count: u32, write: bool) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall {
            function_code: key.function_code,
            start,
            count,
            write,
        });
        if state.failing {
            return Err(TransportError::Io("simulated failure".to_string()));
        }
        Ok(())
    }
}

/// Resolve the memory region and access direction of a request key
fn region(key: &RequestKey) -> TransportResult<(MemoryArea, bool)> {
    if let Some(area) = key.area {
        return match key.function_code {
            S7_READ_VAR => Ok((MemoryArea::S7(area), false)),
            S7_WRITE_VAR => Ok((MemoryArea::S7(area), true)),
            other => Err(TransportError::Unsupported(other)),
        };
    }
    match key.function_code {
        READ_COILS => Ok((MemoryArea::Coils, false)),
        WRITE_SINGLE_COIL | WRITE_MULTIPLE_COILS => Ok((MemoryArea::Coils, true)),
        READ_DISCRETE_INPUTS => Ok((MemoryArea::DiscreteInputs, false)),
        READ_HOLDING_REGISTERS => Ok((MemoryArea::HoldingRegisters, false)),
        WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_REGISTERS => {
            Ok((MemoryArea::HoldingRegisters, true))
        },
        READ_INPUT_REGISTERS => Ok((MemoryArea::InputRegisters, false)),
        other => Err(TransportError::Unsupported(other)),
    }
}

/// Transport over a [`SimulatedPlc`]
pub struct MemoryTransport {
    plc: SimulatedPlc,
    connected: bool,
}

impl MemoryTransport {
    pub fn new(plc: SimulatedPlc) -> Self {
        Self {
            plc,
            connected: false,
        }
    }

    pub fn plc(&self) -> &SimulatedPlc {
        &self.plc
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn endpoint(&self) -> String {
        "simulated".to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.plc.state.lock().refuse_connect {
            return Err(TransportError::ConnectFailed {
                endpoint: self.endpoint(),
                reason: "connection refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn read_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        count: u32,
    ) -> TransportResult<Vec<u16>> {
        self.ensure_connected()?;
        let (area, write) = region(key)?;
        if write {
            return Err(TransportError::Unsupported(key.function_code));
        }
        self.plc.record(key, start, count, false)?;

        let units = (start..start + count)
            .map(|address| match (area, key.unit) {
                (MemoryArea::S7(_), AddressUnit::Bit) => {
                    let byte = self.plc.get(area, address / 8);
                    (byte >> (address % 8)) & 1
                },
                _ => self.plc.get(area, address),
            })
            .collect();
        Ok(units)
    }

    async fn write_units(
        &mut self,
        key: &RequestKey,
        start: u32,
        units: &[u16],
    ) -> TransportResult<()> {
        self.ensure_connected()?;
        let (area, write) = region(key)?;
        if !write {
            return Err(TransportError::Unsupported(key.function_code));
        }
        self.plc.record(key, start, units.len() as u32, true)?;

        for (i, unit) in units.iter().enumerate() {
            let address = start + i as u32;
            match (area, key.unit) {
                (MemoryArea::S7(_), AddressUnit::Bit) => {
                    let mask = 1u16 << (address % 8);
                    let byte = self.plc.get(area, address / 8);
                    let next = if *unit != 0 { byte | mask } else { byte & !mask };
                    self.plc.set(area, address / 8, next);
                },
                (MemoryArea::Coils, _) => self.plc.set(area, address, u16::from(*unit != 0)),
                _ => self.plc.set(area, address, *unit),
            }
        }
        Ok(())
    }
}
