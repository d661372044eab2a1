use serde::{Deserialize, Serialize};

/// One immutable archived sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    /// Assigned by [`crate::EventStorage`], strictly increasing
    pub event_id: u64,
    /// External ordering key (device tick)
    pub tick_id: u64,
    pub value: f64,
}

/// Observed sample offered to [`crate::EventStorage::refresh`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub tick_id: u64,
    pub value: f64,
}

impl Candidate {
    pub fn new(tick_id: u64, value: f64) -> Self {
        Self { tick_id, value }
    }
}

impl EventEntry {
    /// Same observation: equal tick and equal value
    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.tick_id == candidate.tick_id && self.value == candidate.value
    }
}
