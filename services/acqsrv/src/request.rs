//! Request grouping
//!
//! Partitions a device's variables into protocol requests. Variables are
//! bucketed by poll cadence, then by [`RequestKey`] (function code, S7 area
//! and address unit), sorted by start address and greedily merged while the
//! merged span stays contiguous and within the unit's payload limit.
//!
//! The table is always rebuilt from scratch when the variable set changes.

use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use voltage_codec::AddressUnit;

// ============================================================================
// Addressing
// ============================================================================

/// S7 memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum S7Area {
    #[serde(rename = "I")]
    Inputs,
    #[serde(rename = "Q")]
    Outputs,
    #[serde(rename = "M")]
    Flags,
    #[serde(rename = "DB")]
    DataBlock,
}

/// S7 area plus data block number (0 outside data blocks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S7Address {
    pub area: S7Area,
    pub db_number: u16,
}

/// Everything two variables must share to travel in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub function_code: u8,
    pub area: Option<S7Address>,
    pub unit: AddressUnit,
}

/// Per-unit payload ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestLimits {
    pub max_registers: u32,
    pub max_bits: u32,
    pub max_bytes: u32,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_registers: 125,
            max_bits: 2000,
            max_bytes: 222,
        }
    }
}

impl RequestLimits {
    pub fn limit(&self, unit: AddressUnit) -> u32 {
        match unit {
            AddressUnit::Register => self.max_registers,
            AddressUnit::Bit => self.max_bits,
            AddressUnit::Byte => self.max_bytes,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One batched protocol operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: RequestKey,
    /// First address, in `key.unit`
    pub start: u32,
    /// Span, in `key.unit`
    pub count: u32,
    /// Contributing variable ids, ordered by start address
    pub variables: Vec<String>,
}

impl Request {
    fn open(key: RequestKey, variable: &Variable, start: u32, len: u32) -> Self {
        Self {
            key,
            start,
            count: len,
            variables: vec![variable.id().to_string()],
        }
    }

    pub fn end(&self) -> u32 {
        self.start + self.count
    }
}

/// Request table indexed by cadence
pub type RequestTable = BTreeMap<u32, Vec<Request>>;

struct Span<'a> {
    variable: &'a Variable,
    start: u32,
    len: u32,
}

/// Build the request table for a variable set.
///
/// Ties on start address keep insertion order. A variable wider than the
/// payload limit gets a request of its own.
pub fn build_requests(
    variables: &[Variable],
    limits: &RequestLimits,
) -> RequestTable {
    // cadence -> key -> spans, keys in first-seen order
    let mut buckets: BTreeMap<u32, Vec<(RequestKey, Vec<Span<'_>>)>> = BTreeMap::new();

    for variable in variables {
        let (key, start, len) = variable.address(variable.codes().bulk);
        let groups = buckets.entry(variable.sample_time()).or_default();
        let span = Span {
            variable,
            start,
            len,
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, spans)) => spans.push(span),
            None => groups.push((key, vec![span])),
        }
    }

    let mut table = RequestTable::new();
    for (cadence, groups) in buckets {
        let mut requests = Vec::new();
        for (key, mut spans) in groups {
            spans.sort_by_key(|span| span.start);
            let limit = limits.limit(key.unit);

            let mut current: Option<Request> = None;
            for span in spans {
                if let Some(request) = current.as_mut() {
                    let merged_end = request.end().max(span.start + span.len);
                    if span.start <= request.end() && merged_end - request.start <= limit {
                        request.count = merged_end - request.start;
                        request.variables.push(span.variable.id().to_string());
                        continue;
                    }
                }
                if let Some(done) = current.take() {
                    requests.push(done);
                }
                current = Some(Request::open(key, span.variable, span.start, span.len));
            }
            if let Some(done) = current {
                requests.push(done);
            }
        }
        table.insert(cadence, requests);
    }
    table
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::variable::VariablePayload;
    use std::collections::HashMap;
    use voltage_codec::Protocol;

    fn modbus(id: &str, kind: &str, offset: u32, f_code: u8, sample_time: u32) -> Variable {
        let mut payload = VariablePayload::new(id, kind, offset, f_code, sample_time);
        if kind == "byteArray" {
            payload.length = Some(4);
        }
        Variable::from_payload(Protocol::Modbus, &payload).unwrap()
    }

    fn ids(request: &Request) -> Vec<&str> {
        request.variables.iter().map(String::as_str).collect()
    }

    // ---------- bucketing ----------

    #[test]
    fn test_buckets_by_cadence() {
        let vars = vec![
            modbus("a", "uInt16", 0, 3, 1),
            modbus("b", "uInt16", 1, 3, 2),
            modbus("c", "uInt16", 2, 3, 1),
        ];
        let table = build_requests(&vars, &RequestLimits::default());

        assert_eq!(table.len(), 2);
        // a and c are not adjacent without b
        assert_eq!(table[&1].len(), 2);
        assert_eq!(table[&2].len(), 1);
        assert_eq!(ids(&table[&2][0]), vec!["b"]);
    }

    #[test]
    fn test_merges_adjacent_and_overlapping() {
        let vars = vec![
            modbus("f", "float32", 10, 3, 1),
            modbus("i", "int16", 12, 3, 1),
            modbus("u", "uInt32", 11, 3, 1),
        ];
        let table = build_requests(&vars, &RequestLimits::default());

        let requests = &table[&1];
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start, 10);
        assert_eq!(requests[0].count, 3);
        assert_eq!(ids(&requests[0]), vec!["f", "u", "i"]);
    }

    #[test]
    fn test_gap_starts_new_request() {
        let vars = vec![modbus("a", "uInt16", 0, 3, 1), modbus("b", "uInt16", 2, 3, 1)];
        let table = build_requests(&vars, &RequestLimits::default());
        assert_eq!(table[&1].len(), 2);
    }

    #[test]
    fn test_function_code_mismatch_splits() {
        let vars = vec![
            modbus("holding", "uInt16", 0, 3, 1),
            modbus("input", "uInt16", 1, 4, 1),
            modbus("coil", "boolean", 2, 1, 1),
            modbus("write", "uInt16", 3, 16, 1),
        ];
        let table = build_requests(&vars, &RequestLimits::default());

        let requests = &table[&1];
        assert_eq!(requests.len(), 4);
        let codes: Vec<u8> = requests.iter().map(|r| r.key.function_code).collect();
        assert_eq!(codes, vec![3, 4, 1, 16]);
        assert_eq!(requests[2].key.unit, AddressUnit::Bit);
    }

    #[test]
    fn test_equal_offsets_keep_insertion_order() {
        let vars = vec![
            modbus("second", "uInt16", 5, 3, 1),
            modbus("first", "int16", 5, 3, 1),
        ];
        let table = build_requests(&vars, &RequestLimits::default());
        assert_eq!(ids(&table[&1][0]), vec!["second", "first"]);
    }

    #[test]
    fn test_bulk_write_codes_merge() {
        let vars = vec![
            modbus("sp1", "uInt16", 10, 16, 1),
            modbus("sp2", "float32", 11, 16, 1),
            modbus("coil", "boolean", 10, 15, 1),
            modbus("coil2", "boolean", 11, 15, 1),
        ];
        let table = build_requests(&vars, &RequestLimits::default());

        let requests = &table[&1];
        assert_eq!(requests.len(), 2);
        assert_eq!(ids(&requests[0]), vec!["sp1", "sp2"]);
        assert_eq!((requests[0].start, requests[0].count), (10, 3));
        assert_eq!(ids(&requests[1]), vec!["coil", "coil2"]);
        assert_eq!(requests[1].key.unit, AddressUnit::Bit);
    }

    // ---------- size ceiling ----------

    #[test]
    fn test_size_ceiling_splits() {
        let limits = RequestLimits {
            max_registers: 4,
            ..Default::default()
        };
        let vars: Vec<Variable> = (0..6)
            .map(|i| modbus(&format!("v{}", i), "uInt16", i, 3, 1))
            .collect();
        let table = build_requests(&vars, &limits);

        let requests = &table[&1];
        assert_eq!(requests.len(), 2);
        assert_eq!((requests[0].start, requests[0].count), (0, 4));
        assert_eq!((requests[1].start, requests[1].count), (4, 2));
    }

    #[test]
    fn test_oversize_variable_gets_singleton() {
        let limits = RequestLimits {
            max_registers: 3,
            ..Default::default()
        };
        let vars = vec![
            modbus("small", "uInt16", 0, 3, 1),
            modbus("blob", "byteArray", 1, 3, 1),
            modbus("tail", "uInt16", 5, 3, 1),
        ];
        let table = build_requests(&vars, &limits);

        let requests = &table[&1];
        assert_eq!(requests.len(), 3);
        assert_eq!(ids(&requests[1]), vec!["blob"]);
        assert_eq!(requests[1].count, 4);
    }

    // ---------- S7 addressing ----------

    #[test]
    fn test_s7_areas_do_not_mix() {
        let mut a = VariablePayload::new("a", "int16", 0, 4, 1);
        a.area = Some(S7Area::DataBlock);
        a.db_number = Some(1);
        let mut b = VariablePayload::new("b", "int16", 2, 4, 1);
        b.area = Some(S7Area::DataBlock);
        b.db_number = Some(2);
        let mut c = VariablePayload::new("c", "int16", 2, 4, 1);
        c.area = Some(S7Area::DataBlock);
        c.db_number = Some(1);

        let vars: Vec<Variable> = [a, b, c]
            .iter()
            .map(|p| Variable::from_payload(Protocol::S7, p).unwrap())
            .collect();
        let table = build_requests(&vars, &RequestLimits::default());

        let requests = &table[&1];
        assert_eq!(requests.len(), 2);
        assert_eq!(ids(&requests[0]), vec!["a", "c"]);
        assert_eq!(requests[0].key.unit, AddressUnit::Byte);
        assert_eq!(requests[0].count, 4);
    }

    #[test]
    fn test_s7_booleans_use_bit_addresses() {
        let mut x = VariablePayload::new("x", "boolean", 3, 4, 1);
        x.area = Some(S7Area::Flags);
        x.bit = Some(7);
        let mut y = VariablePayload::new("y", "boolean", 4, 4, 1);
        y.area = Some(S7Area::Flags);
        y.bit = Some(0);

        let vars: Vec<Variable> = [x, y]
            .iter()
            .map(|p| Variable::from_payload(Protocol::S7, p).unwrap())
            .collect();
        let table = build_requests(&vars, &RequestLimits::default());

        let requests = &table[&1];
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start, 31);
        assert_eq!(requests[0].count, 2);
    }

    // ---------- coverage ----------

    #[test]
    fn test_every_variable_covered_exactly_once() {
        let limits = RequestLimits {
            max_registers: 8,
            ..Default::default()
        };
        let mut vars = Vec::new();
        let kinds = ["uInt16", "float32", "int32", "int16", "swappedFloat32"];
        let mut offset = 0;
        for i in 0..40u32 {
            let kind = kinds[(i as usize) % kinds.len()];
            let cadence = 1 + i % 3;
            vars.push(modbus(&format!("v{}", i), kind, offset, 3, cadence));
            offset += if i % 7 == 0 { 5 } else { 1 };
        }
        let table = build_requests(&vars, &limits);

        let by_id: HashMap<&str, &Variable> = vars.iter().map(|v| (v.id(), v)).collect();
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (cadence, requests) in &table {
            for request in requests {
                let single = request.variables.len() == 1;
                assert!(request.count <= limits.max_registers || single);
                for id in &request.variables {
                    let var = by_id[id.as_str()];
                    assert_eq!(var.sample_time(), *cadence);
                    let (_, start, len) = var.address(var.codes().bulk);
                    assert!(start >= request.start && start + len <= request.end());
                    *seen.entry(var.id()).or_default() += 1;
                }
            }
        }
        assert_eq!(seen.len(), vars.len());
        assert!(seen.values().all(|count| *count == 1));
    }
}
