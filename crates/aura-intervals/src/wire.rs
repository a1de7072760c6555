//! The wire format and legacy id synthesis, as described in `SPEC_FULL.md`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::properties::{RESERVED_INTERVAL_ID, RESERVED_REFERENCE_RANGE_LABELS};
use crate::reference::{IntervalType, Position, Side, Stickiness};

/// A delta-shaped wire record: properties are always present, but the four
/// endpoint fields are only populated when `includeEndpoints` was set at
/// serialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedIntervalDelta {
    /// The start position, if endpoints were included.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start: Option<Position>,
    /// The end position, if endpoints were included.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end: Option<Position>,
    /// The start side, if endpoints were included.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_side: Option<Side>,
    /// The end side, if endpoints were included.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_side: Option<Side>,
    /// The interval's legacy behavior tag.
    pub interval_type: IntervalType,
    /// The interval's derived stickiness at serialization time.
    pub stickiness: Stickiness,
    /// The client's current sequence number at serialization time.
    pub sequence_number: i64,
    /// `{...userProps, intervalId, referenceRangeLabels}`.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A full serialization: a delta with all four endpoint fields populated.
pub type SerializedInterval = SerializedIntervalDelta;

/// The reserved keys extracted from a wire record's properties, plus the
/// remaining user-visible properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedProperties {
    /// The interval's id (from `properties.intervalId`, or synthesized).
    pub id: String,
    /// The interval's labels (from `properties.referenceRangeLabels`).
    pub labels: Vec<String>,
    /// The remaining user-visible properties.
    pub properties: Map<String, Value>,
}

/// Extract the reserved `intervalId`/`referenceRangeLabels` keys from a
/// wire record, synthesizing a legacy id when `intervalId` is absent.
///
/// The legacy scheme (`"legacy" + start + "-" + end`) collides across
/// intervals sharing identical `(start, end)` positions; this is preserved
/// verbatim, as documented in `DESIGN.md`, rather than disambiguated.
pub fn get_serialized_properties(serialized: &SerializedIntervalDelta) -> SerializedProperties {
    let mut properties = serialized.properties.clone();

    let id = match properties.remove(RESERVED_INTERVAL_ID) {
        Some(Value::String(id)) => id,
        _ => {
            let start = serialized
                .start
                .map(|p| p.to_string())
                .unwrap_or_default();
            let end = serialized.end.map(|p| p.to_string()).unwrap_or_default();
            let legacy_id = format!("legacy{start}-{end}");
            tracing::warn!(%legacy_id, "wire record missing intervalId; synthesizing legacy id");
            legacy_id
        }
    };

    let labels = match properties.remove(RESERVED_REFERENCE_RANGE_LABELS) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                other => {
                    tracing::warn!(?other, "dropping non-string referenceRangeLabels entry");
                    None
                }
            })
            .collect(),
        Some(other) => {
            tracing::warn!(?other, "dropping malformed referenceRangeLabels property");
            Vec::new()
        }
        None => Vec::new(),
    };

    SerializedProperties {
        id,
        labels,
        properties,
    }
}
