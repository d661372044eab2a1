//! Calculated elements
//!
//! Derived values computed from already-decoded variable values, never from
//! raw words.

use crate::archive::check_id;
use crate::error::{AcqError, Result};
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregation applied to the weighted contributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CalculationKind {
    /// Σ value × factor
    #[default]
    Sum,
    /// Σ value × factor / n
    Average,
}

/// One weighted contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_factor() -> f64 {
    1.0
}

/// Configuration payload of one calculated element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationElementPayload {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: CalculationKind,
    pub name: String,
    pub sample_time: u32,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sample_time: Option<u32>,
    pub variables: Vec<Contribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedElement {
    id: String,
    name: String,
    kind: CalculationKind,
    sample_time: u32,
    archived: bool,
    archive_sample_time: u32,
    contributions: Vec<Contribution>,
    unit: String,
    value: f64,
}

impl CalculatedElement {
    /// Build an element against the current variable set.
    ///
    /// Every referenced variable must exist and have a numeric value.
    pub fn from_payload(
        payload: &CalculationElementPayload,
        variables: &HashMap<String, &Variable>,
    ) -> Result<Self> {
        if payload.id.trim().is_empty() {
            return Err(AcqError::config("calculation element id is required"));
        }
        check_id("calculation element", &payload.id)?;
        if payload.sample_time == 0 {
            return Err(AcqError::config(format!(
                "calculation element {}: sampleTime must be greater than zero",
                payload.id
            )));
        }
        let archive_sample_time = payload.archive_sample_time.unwrap_or(payload.sample_time);
        if archive_sample_time == 0 {
            return Err(AcqError::config(format!(
                "calculation element {}: archiveSampleTime must be greater than zero",
                payload.id
            )));
        }
        if payload.variables.is_empty() {
            return Err(AcqError::config(format!(
                "calculation element {}: at least one variable is required",
                payload.id
            )));
        }

        for contribution in &payload.variables {
            let variable = variables
                .get(&contribution.id)
                .ok_or_else(|| AcqError::variable_not_found(&contribution.id))?;
            if !variable.kind().is_numeric() {
                return Err(AcqError::Validation(format!(
                    "calculation element {}: variable {} is not numeric",
                    payload.id, contribution.id
                )));
            }
            if !contribution.factor.is_finite() {
                return Err(AcqError::Validation(format!(
                    "calculation element {}: factor of {} must be finite",
                    payload.id, contribution.id
                )));
            }
        }

        Ok(Self {
            id: payload.id.clone(),
            name: payload.name.clone(),
            kind: payload.kind,
            sample_time: payload.sample_time,
            archived: payload.archived,
            archive_sample_time,
            contributions: payload.variables.clone(),
            unit: payload.unit.clone(),
            value: payload.value.unwrap_or(0.0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sample_time(&self) -> u32 {
        self.sample_time
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn archive_sample_time(&self) -> u32 {
        self.archive_sample_time
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn references(&self, variable_id: &str) -> bool {
        self.contributions.iter().any(|c| c.id == variable_id)
    }

    /// Recompute from current variable values; returns whether the value changed
    pub fn evaluate(&mut self, variables: &HashMap<String, &Variable>) -> bool {
        let sum: f64 = self
            .contributions
            .iter()
            .filter_map(|c| {
                let value = variables.get(&c.id)?.value().as_f64()?;
                Some(value * c.factor)
            })
            .sum();

        let next = match self.kind {
            CalculationKind::Sum => sum,
            CalculationKind::Average => sum / self.contributions.len() as f64,
        };

        if next == self.value {
            return false;
        }
        self.value = next;
        true
    }

    pub fn payload(&self) -> CalculationElementPayload {
        CalculationElementPayload {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            sample_time: self.sample_time,
            archived: self.archived,
            archive_sample_time: Some(self.archive_sample_time),
            variables: self.contributions.clone(),
            value: Some(self.value),
            unit: self.unit.clone(),
        }
    }
}
