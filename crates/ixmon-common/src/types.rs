use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder token written into every field of a sentinel record.
pub const NA: &str = "NA";

/// Token pair used when a boolean response field is coerced to text for
/// time-series sinks (e.g. `transmitState`).
pub const BOOL_TRUE_TOKEN: &str = "active";
pub const BOOL_FALSE_TOKEN: &str = "idle";

/// One category of chassis data, each with its own REST resource,
/// field allow-list and polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ports,
    Sensors,
    Performance,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ports => "ports",
            Category::Sensors => "sensors",
            Category::Performance => "performance",
        }
    }

    /// Response fields kept by normalization. Anything outside this list is
    /// vendor noise and gets dropped.
    pub fn allowed_fields(&self) -> &'static [&'static str] {
        match self {
            Category::Ports => &[
                "owner",
                "cardNumber",
                "portNumber",
                "fullyQualifiedPortName",
                "linkState",
                "transmitState",
            ],
            Category::Sensors => &["name", "type", "unit", "value"],
            Category::Performance => &["cpuUtilization", "memoryUtilization"],
        }
    }

    /// Derived per-device aggregate fields attached to every record of this
    /// category. Only the port category carries aggregates.
    pub fn aggregate_fields(&self) -> &'static [&'static str] {
        match self {
            Category::Ports => &["totalPorts", "ownedPorts", "freePorts"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ports" => Ok(Category::Ports),
            "sensors" => Ok(Category::Sensors),
            "performance" | "perf" => Ok(Category::Performance),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// A normalized field value. Text carries state tokens and identifiers,
/// Integer carries counts, Float carries sensor and utilization readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn na() -> Self {
        FieldValue::Text(NA.to_string())
    }

    pub fn is_na(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s == NA)
    }

    /// Boolean coercion policy: sinks never see raw booleans.
    pub fn from_bool(v: bool) -> Self {
        FieldValue::Text(if v { BOOL_TRUE_TOKEN } else { BOOL_FALSE_TOKEN }.to_string())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

/// One row of fleet data for one sub-resource (a port, a sensor, a
/// performance sample) on one device.
///
/// All records produced in the same poll cycle share the same
/// `cycle_timestamp`, regardless of per-device latency. Fields are kept in a
/// `BTreeMap` so iteration order is deterministic for sinks and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_address: String,
    pub device_type: String,
    pub category: Category,
    pub cycle_timestamp: DateTime<Utc>,
    /// Identity of the sub-resource within the device: the fully qualified
    /// port name, the sensor name, or `"chassis"` for performance samples.
    pub sub_resource_id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl DeviceRecord {
    /// Placeholder substituted when a device's fetch fails: every
    /// allow-listed field and aggregate is `"NA"`, only the address is real.
    /// Keeps the one-outcome-per-device guarantee so dashboards degrade
    /// instead of going empty.
    pub fn sentinel(address: &str, category: Category, cycle_timestamp: DateTime<Utc>) -> Self {
        let mut fields = BTreeMap::new();
        for key in category.allowed_fields() {
            fields.insert((*key).to_string(), FieldValue::na());
        }
        for key in category.aggregate_fields() {
            fields.insert((*key).to_string(), FieldValue::na());
        }
        Self {
            device_address: address.to_string(),
            device_type: NA.to_string(),
            category,
            cycle_timestamp,
            sub_resource_id: NA.to_string(),
            fields,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sub_resource_id == NA && self.fields.values().all(FieldValue::is_na)
    }
}

/// Per-device outcome of one fetch attempt. Never mixes real and sentinel
/// records for the same device.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Device answered with at least one sub-resource.
    Success(Vec<DeviceRecord>),
    /// Device reachable but no sub-resources present.
    Empty,
    /// Fetch failed; the sentinel stands in for the device this cycle.
    Failed(DeviceRecord),
}

/// Device-level counts for one cycle, reported in the cycle summary log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub success: usize,
    pub failed: usize,
    pub empty: usize,
}

impl CycleStats {
    pub fn devices(&self) -> usize {
        self.success + self.failed + self.empty
    }
}

/// The consolidated result of one poll cycle: all device outcomes in
/// completion order, stamped with the single cycle timestamp.
///
/// A batch lives for exactly one cycle: created at cycle start, frozen when
/// the last device reports, handed to the sinks, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub cycle_timestamp: DateTime<Utc>,
    pub records: Vec<DeviceRecord>,
    pub stats: CycleStats,
}

impl Batch {
    pub fn new(cycle_timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle_timestamp,
            records: Vec::new(),
            stats: CycleStats::default(),
        }
    }

    /// Folds one device's outcome into the batch, preserving the device's
    /// own record order.
    pub fn absorb(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Success(records) => {
                self.stats.success += 1;
                self.records.extend(records);
            }
            PollOutcome::Empty => {
                self.stats.empty += 1;
            }
            PollOutcome::Failed(sentinel) => {
                self.stats.failed += 1;
                self.records.push(sentinel);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
