//! Device tick / refresh cycle
//!
//! A device owns its variables, calculated elements, the request table and
//! the transport. One [`Device::tick`] runs the whole cycle:
//!
//! ```text
//! tick(n) ─▶ due requests (n % cadence == 0) ─▶ transport ─▶ decode ─▶ stage
//!                 │ (skipped unless Active)            │ batch failure: nothing staged
//!                 ▼                                    ▼
//!          calculated elements (config order) ─▶ Refreshed event ─▶ archive
//! ```
//!
//! `tick` never fails: transport and archive errors are logged and absorbed
//! so one faulty device cannot stall the scheduler.

use crate::archive::{check_id, DeviceArchive};
use crate::calc::{CalculatedElement, CalculationElementPayload};
use crate::config::DeviceConfig;
use crate::error::{AcqError, Result, TransportError};
use crate::request::{build_requests, RequestLimits, RequestTable};
use crate::transport::Transport;
use crate::variable::{Variable, VariablePayload};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use voltage_codec::{CodecError, Protocol, Value};

/// Device lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Uninitialized,
    Initialized,
    Active,
    Inactive,
}

/// Emitted exactly once per tick
#[derive(Debug, Clone)]
pub struct RefreshedEvent {
    pub device_id: String,
    pub tick: u64,
    /// Variables whose decoded value changed this tick
    pub changed: BTreeMap<String, Variable>,
    /// Calculated elements whose value changed this tick
    pub changed_elements: BTreeMap<String, f64>,
}

/// Serializable device snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub state: DeviceState,
    pub variables: Vec<VariablePayload>,
    pub calculation_elements: Vec<CalculationElementPayload>,
}

pub struct Device {
    id: String,
    name: String,
    protocol: Protocol,
    limits: RequestLimits,
    state: DeviceState,
    transport: Box<dyn Transport>,
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    elements: Vec<CalculatedElement>,
    requests: RequestTable,
    archive: Option<DeviceArchive>,
    /// Archived entities changed since their last archive write
    pending_archive: HashSet<String>,
    events: broadcast::Sender<RefreshedEvent>,
}

fn due(tick: u64, cadence: u32) -> bool {
    tick % u64::from(cadence) == 0
}

impl Device {
    /// Build a device from configuration.
    ///
    /// Fails on the first invalid variable or element; no partial device is
    /// returned.
    pub fn new(
        config: &DeviceConfig,
        transport: Box<dyn Transport>,
        events: broadcast::Sender<RefreshedEvent>,
    ) -> Result<Self> {
        if config.id.trim().is_empty() {
            return Err(AcqError::config("device id is required"));
        }
        check_id("device", &config.id)?;

        let mut device = Self {
            id: config.id.clone(),
            name: config.name.clone(),
            protocol: config.protocol,
            limits: config.limits,
            state: DeviceState::Uninitialized,
            transport,
            variables: Vec::with_capacity(config.variables.len()),
            index: HashMap::new(),
            elements: Vec::with_capacity(config.calculation_elements.len()),
            requests: RequestTable::new(),
            archive: None,
            pending_archive: HashSet::new(),
            events,
        };

        for payload in &config.variables {
            device.ensure_unique(&payload.id)?;
            let variable = Variable::from_payload(device.protocol, payload)?;
            device.index.insert(variable.id().to_string(), device.variables.len());
            device.variables.push(variable);
        }
        for payload in &config.calculation_elements {
            device.ensure_unique(&payload.id)?;
            let element = CalculatedElement::from_payload(payload, &device.variable_refs())?;
            device.elements.push(element);
        }
        device.rebuild();
        Ok(device)
    }

    /// Attach archive storage; series open during [`Device::init`]
    pub fn with_archive(mut self, archive: DeviceArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Open archive series and move to `Initialized`
    pub async fn init(&mut self) -> Result<()> {
        if self.state != DeviceState::Uninitialized {
            return Ok(());
        }
        let series: Vec<String> = self.archived_ids().collect();
        if let Some(archive) = self.archive.as_mut() {
            for id in &series {
                archive.open_series(id).await?;
            }
        }
        self.state = DeviceState::Initialized;
        info!("Device {} initialized ({} variables)", self.id, self.variables.len());
        Ok(())
    }

    // ---------- accessors ----------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.index.get(id).map(|idx| &self.variables[*idx])
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn element(&self, id: &str) -> Option<&CalculatedElement> {
        self.elements.iter().find(|e| e.id() == id)
    }

    pub fn requests(&self) -> &RequestTable {
        &self.requests
    }

    pub fn archive(&self) -> Option<&DeviceArchive> {
        self.archive.as_ref()
    }

    pub fn archive_mut(&mut self) -> Option<&mut DeviceArchive> {
        self.archive.as_mut()
    }

    pub fn payload(&self) -> DevicePayload {
        DevicePayload {
            id: self.id.clone(),
            name: self.name.clone(),
            protocol: self.protocol,
            state: self.state,
            variables: self.variables.iter().map(Variable::payload).collect(),
            calculation_elements: self.elements.iter().map(CalculatedElement::payload).collect(),
        }
    }

    // ---------- connection ----------

    pub async fn connect(&mut self) -> Result<()> {
        if self.state == DeviceState::Uninitialized {
            return Err(AcqError::Validation(format!(
                "device {} must be initialized before connecting",
                self.id
            )));
        }
        match self.transport.connect().await {
            Ok(()) => {
                self.state = DeviceState::Active;
                info!("Device {} active ({})", self.id, self.transport.endpoint());
                Ok(())
            },
            Err(e) => {
                self.state = DeviceState::Inactive;
                warn!("Device {} connect failed: {}", self.id, e);
                Err(e.into())
            },
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.transport.disconnect().await;
        if self.state != DeviceState::Uninitialized {
            self.state = DeviceState::Inactive;
        }
        info!("Device {} disconnected", self.id);
        result.map_err(AcqError::from)
    }

    fn mark_inactive(&mut self, error: &TransportError) {
        if self.state == DeviceState::Active {
            warn!("Device {} inactive: {}", self.id, error);
            self.state = DeviceState::Inactive;
        }
    }

    // ---------- tick ----------

    /// Run one refresh cycle. Never fails.
    pub async fn tick(&mut self, tick: u64) -> RefreshedEvent {
        let mut changed = BTreeMap::new();

        if self.state == DeviceState::Active {
            match self.poll(tick).await {
                Ok(staged) => {
                    for (idx, value) in staged {
                        if self.stage(idx, value) {
                            let variable = &self.variables[idx];
                            changed.insert(variable.id().to_string(), variable.clone());
                        }
                    }
                },
                Err(e) => {
                    warn!(device = %self.id, tick, "Poll failed, no variables changed: {}", e);
                    if let AcqError::Transport(transport_error) = &e {
                        self.mark_inactive(transport_error);
                    }
                },
            }
        }

        let changed_elements = self.evaluate_elements(tick);

        let event = RefreshedEvent {
            device_id: self.id.clone(),
            tick,
            changed,
            changed_elements,
        };
        // No subscribers is fine
        let _ = self.events.send(event.clone());

        self.archive_changes(tick).await;
        event
    }

    /// Run every due request; all-or-nothing
    async fn poll(&mut self, tick: u64) -> Result<Vec<(usize, Value)>> {
        let mut staged = Vec::new();

        for (cadence, requests) in &self.requests {
            if !due(tick, *cadence) {
                continue;
            }
            for request in requests {
                let indices = request
                    .variables
                    .iter()
                    .filter_map(|id| self.index.get(id).copied());

                if self.protocol.is_write(request.key.function_code) {
                    let mut buffer = vec![0u16; request.count as usize];
                    for idx in indices {
                        let variable = &self.variables[idx];
                        let (_, start, _) = variable.address(request.key.function_code);
                        let units = variable.encode_units(variable.value())?;
                        let offset = (start - request.start) as usize;
                        buffer[offset..offset + units.len()].copy_from_slice(&units);
                    }
                    self.transport
                        .write_units(&request.key, request.start, &buffer)
                        .await?;
                    continue;
                }

                let units = self
                    .transport
                    .read_units(&request.key, request.start, request.count)
                    .await?;
                if units.len() != request.count as usize {
                    return Err(TransportError::ShortResponse {
                        expected: request.count as usize,
                        actual: units.len(),
                    }
                    .into());
                }
                for idx in indices {
                    let variable = &self.variables[idx];
                    let (_, start, len) = variable.address(request.key.function_code);
                    let offset = (start - request.start) as usize;
                    let value = variable.decode_units(&units[offset..offset + len as usize])?;
                    staged.push((idx, value));
                }
            }
        }
        Ok(staged)
    }

    /// Commit a value; marks archived variables for the next archive tick
    fn stage(&mut self, idx: usize, value: Value) -> bool {
        let variable = &mut self.variables[idx];
        if !variable.set_value(value) {
            return false;
        }
        if variable.archived() {
            self.pending_archive.insert(variable.id().to_string());
        }
        true
    }

    fn evaluate_elements(&mut self, tick: u64) -> BTreeMap<String, f64> {
        let refs: HashMap<String, &Variable> = self
            .variables
            .iter()
            .map(|v| (v.id().to_string(), v))
            .collect();

        let mut changed = BTreeMap::new();
        for element in self.elements.iter_mut() {
            if !due(tick, element.sample_time()) {
                continue;
            }
            if element.evaluate(&refs) {
                if element.archived() {
                    self.pending_archive.insert(element.id().to_string());
                }
                changed.insert(element.id().to_string(), element.value());
            }
        }
        changed
    }

    async fn archive_changes(&mut self, tick: u64) {
        let Some(archive) = self.archive.as_ref() else {
            return;
        };
        if self.pending_archive.is_empty() {
            return;
        }

        let mut samples: Vec<(String, Option<f64>)> = Vec::new();
        for variable in &self.variables {
            if variable.archived()
                && due(tick, variable.archive_sample_time())
                && self.pending_archive.contains(variable.id())
            {
                samples.push((variable.id().to_string(), variable.value().as_f64()));
            }
        }
        for element in &self.elements {
            if element.archived()
                && due(tick, element.archive_sample_time())
                && self.pending_archive.contains(element.id())
            {
                samples.push((element.id().to_string(), Some(element.value())));
            }
        }

        for (id, value) in samples {
            let Some(value) = value else {
                self.pending_archive.remove(&id);
                continue;
            };
            match archive.append(&id, tick, value).await {
                Ok(entry) => {
                    if let Some(entry) = entry {
                        debug!("Archived {}.{} event {}", self.id, id, entry.event_id);
                    }
                    self.pending_archive.remove(&id);
                },
                Err(e) => {
                    warn!(device = %self.id, tick, "Archive append for {} failed: {}", id, e);
                },
            }
        }
    }

    // ---------- single-item access ----------

    fn ensure_active(&self) -> Result<()> {
        if self.state == DeviceState::Active {
            Ok(())
        } else {
            Err(AcqError::NotActive(self.id.clone()))
        }
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AcqError::variable_not_found(id))
    }

    /// Read one variable with its single-item read code
    pub async fn get_single(&mut self, variable_id: &str) -> Result<Value> {
        self.ensure_active()?;
        let idx = self.position(variable_id)?;
        let (key, start, len) = {
            let variable = &self.variables[idx];
            variable.address(variable.codes().get_single)
        };

        let units = match self.transport.read_units(&key, start, len).await {
            Ok(units) => units,
            Err(e) => {
                self.mark_inactive(&e);
                return Err(e.into());
            },
        };
        if units.len() != len as usize {
            return Err(TransportError::ShortResponse {
                expected: len as usize,
                actual: units.len(),
            }
            .into());
        }
        let value = self.variables[idx].decode_units(&units)?;
        self.stage(idx, value.clone());
        Ok(value)
    }

    /// Write one variable with its single-item write code
    pub async fn set_single(&mut self, variable_id: &str, value: Value) -> Result<()> {
        self.ensure_active()?;
        let idx = self.position(variable_id)?;
        let (key, start, units) = {
            let variable = &self.variables[idx];
            let (key, start, _) = variable.address(variable.codes().set_single);
            (key, start, variable.encode_units(&value)?)
        };

        if let Err(e) = self.transport.write_units(&key, start, &units).await {
            self.mark_inactive(&e);
            return Err(e.into());
        }
        self.stage(idx, value);
        Ok(())
    }

    fn current_bytes(&self, variable_id: &str) -> Result<Vec<u8>> {
        let variable = &self.variables[self.position(variable_id)?];
        variable
            .value()
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                AcqError::Codec(CodecError::ValueTypeMismatch {
                    expected: "byteArray".to_string(),
                    actual: variable.kind().type_name().to_string(),
                })
            })
    }

    /// Set one bit of a byte-array variable, writing the whole array
    pub async fn set_bit(&mut self, variable_id: &str, byte_index: usize, bit_index: u8) -> Result<()> {
        let bytes = voltage_codec::set_bit(&self.current_bytes(variable_id)?, byte_index, bit_index)?;
        self.set_single(variable_id, Value::Bytes(bytes)).await
    }

    pub async fn clear_bit(
        &mut self,
        variable_id: &str,
        byte_index: usize,
        bit_index: u8,
    ) -> Result<()> {
        let bytes =
            voltage_codec::clear_bit(&self.current_bytes(variable_id)?, byte_index, bit_index)?;
        self.set_single(variable_id, Value::Bytes(bytes)).await
    }

    // ---------- configuration changes ----------

    fn ensure_unique(&self, id: &str) -> Result<()> {
        if self.index.contains_key(id) || self.elements.iter().any(|e| e.id() == id) {
            return Err(AcqError::AlreadyExists {
                resource: "Variable",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn variable_refs(&self) -> HashMap<String, &Variable> {
        self.variables
            .iter()
            .map(|v| (v.id().to_string(), v))
            .collect()
    }

    fn archived_ids(&self) -> impl Iterator<Item = String> + '_ {
        let variables = self
            .variables
            .iter()
            .filter(|v| v.archived())
            .map(|v| v.id().to_string());
        let elements = self
            .elements
            .iter()
            .filter(|e| e.archived())
            .map(|e| e.id().to_string());
        variables.chain(elements)
    }

    /// Open a series for a newly archived entity once the device is initialized
    async fn open_series_if_needed(&mut self, id: &str, archived: bool) -> Result<()> {
        if !archived || self.state == DeviceState::Uninitialized {
            return Ok(());
        }
        if let Some(archive) = self.archive.as_mut() {
            archive.open_series(id).await?;
        }
        Ok(())
    }

    /// Full rebuild of the lookup index and request table
    fn rebuild(&mut self) {
        self.index = self
            .variables
            .iter()
            .enumerate()
            .map(|(idx, v)| (v.id().to_string(), idx))
            .collect();
        self.requests = build_requests(&self.variables, &self.limits);
        debug!(
            "Device {} request table rebuilt: {} requests in {} cadences",
            self.id,
            self.requests.values().map(Vec::len).sum::<usize>(),
            self.requests.len()
        );
    }

    pub async fn create_variable(&mut self, payload: &VariablePayload) -> Result<()> {
        self.ensure_unique(&payload.id)?;
        let variable = Variable::from_payload(self.protocol, payload)?;
        self.open_series_if_needed(variable.id(), variable.archived())
            .await?;
        self.variables.push(variable);
        self.rebuild();
        Ok(())
    }

    /// Replace a variable's definition. Keeps the current value when the
    /// payload carries none and the kind is unchanged.
    pub async fn edit_variable(&mut self, payload: &VariablePayload) -> Result<()> {
        let idx = self.position(&payload.id)?;
        let mut variable = Variable::from_payload(self.protocol, payload)?;

        if !variable.kind().is_numeric() {
            if let Some(element) = self.elements.iter().find(|e| e.references(&payload.id)) {
                return Err(AcqError::InUse {
                    variable: payload.id.clone(),
                    element: element.id().to_string(),
                });
            }
        }

        let previous = &self.variables[idx];
        if payload.value.is_none() && previous.kind() == variable.kind() {
            variable.set_value(previous.value().clone());
        }

        self.open_series_if_needed(variable.id(), variable.archived())
            .await?;
        self.variables[idx] = variable;
        self.rebuild();
        Ok(())
    }

    /// Remove a variable and drop its archive series
    pub async fn remove_variable(&mut self, variable_id: &str) -> Result<()> {
        let idx = self.position(variable_id)?;
        if let Some(element) = self.elements.iter().find(|e| e.references(variable_id)) {
            return Err(AcqError::InUse {
                variable: variable_id.to_string(),
                element: element.id().to_string(),
            });
        }
        if let Some(archive) = self.archive.as_mut() {
            archive.drop_series(variable_id).await?;
        }
        self.variables.remove(idx);
        self.pending_archive.remove(variable_id);
        self.rebuild();
        Ok(())
    }

    pub async fn create_calculation_element(
        &mut self,
        payload: &CalculationElementPayload,
    ) -> Result<()> {
        self.ensure_unique(&payload.id)?;
        let element = CalculatedElement::from_payload(payload, &self.variable_refs())?;
        self.open_series_if_needed(element.id(), element.archived())
            .await?;
        self.elements.push(element);
        Ok(())
    }

    pub async fn remove_calculation_element(&mut self, element_id: &str) -> Result<()> {
        let idx = self
            .elements
            .iter()
            .position(|e| e.id() == element_id)
            .ok_or_else(|| AcqError::NotFound {
                resource: "Calculation element",
                id: element_id.to_string(),
            })?;
        if let Some(archive) = self.archive.as_mut() {
            archive.drop_series(element_id).await?;
        }
        self.elements.remove(idx);
        self.pending_archive.remove(element_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, SimulatedPlc};
    use tracing_test::traced_test;

    async fn device(plc: &SimulatedPlc, variables: Vec<VariablePayload>) -> Device {
        let mut config = DeviceConfig::simulated("plc", Protocol::Modbus);
        config.variables = variables;
        let (events, _) = broadcast::channel(8);
        let mut device =
            Device::new(&config, Box::new(MemoryTransport::new(plc.clone())), events).unwrap();
        device.init().await.unwrap();
        device
    }

    #[test]
    fn test_due() {
        assert!(due(0, 3));
        assert!(!due(1, 3));
        assert!(due(6, 3));
        assert!(due(7, 1));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let plc = SimulatedPlc::new();
        let mut config = DeviceConfig::simulated("plc", Protocol::Modbus);
        config.variables = vec![
            VariablePayload::new("a", "int16", 0, 3, 1),
            VariablePayload::new("a", "int16", 1, 3, 1),
        ];
        let (events, _) = broadcast::channel(8);
        let result = Device::new(&config, Box::new(MemoryTransport::new(plc)), events);
        assert!(matches!(result, Err(AcqError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_initialized_device_skips_io() {
        let plc = SimulatedPlc::new();
        let mut device = device(&plc, vec![VariablePayload::new("a", "int16", 0, 3, 1)]).await;
        assert_eq!(device.state(), DeviceState::Initialized);

        let event = device.tick(0).await;
        assert_eq!(event.device_id, "plc");
        assert!(plc.calls().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_poll_failure_logged_as_warning() {
        let plc = SimulatedPlc::new();
        let mut device = device(&plc, vec![VariablePayload::new("a", "int16", 0, 3, 1)]).await;
        device.connect().await.unwrap();

        plc.set_failing(true);
        device.tick(4).await;
        assert!(logs_contain("Poll failed"));
        assert!(logs_contain("simulated failure"));
        assert_eq!(device.state(), DeviceState::Inactive);
    }

    #[tokio::test]
    async fn test_disconnect_marks_inactive() {
        let plc = SimulatedPlc::new();
        let mut device = device(&plc, Vec::new()).await;
        device.connect().await.unwrap();
        device.disconnect().await.unwrap();
        assert_eq!(device.state(), DeviceState::Inactive);
    }
}
