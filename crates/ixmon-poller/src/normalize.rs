//! Normalization of raw per-device responses into uniform records.
//!
//! The rules here are business rules, not parsing conveniences: the `"Free"`
//! owner default and the denormalized port aggregates are what the dashboards
//! downstream are built on.

use chrono::{DateTime, Utc};
use ixmon_client::{DeviceConfig, RawResponse};
use ixmon_common::types::{Category, DeviceRecord, FieldValue, NA};
use serde_json::Value;
use std::collections::BTreeMap;

/// Owner value written when a port has no owner. Counted as unassigned by
/// the aggregate computation.
pub const FREE_OWNER: &str = "Free";

/// Raw response fields that feed numeric time-series columns; the `"NA"`
/// placeholder in one of these coerces to zero instead of poisoning the
/// column type.
fn reading_field(key: &str) -> bool {
    matches!(key, "value" | "cpuUtilization" | "memoryUtilization")
}

fn coerce_value(key: &str, value: &Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::from_bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        Value::String(s) if reading_field(key) && s == NA => Some(FieldValue::Float(0.0)),
        Value::String(s) => Some(FieldValue::Text(s.clone())),
        // null and nested structures count as absent
        _ => None,
    }
}

/// Explicit ownership rule: a port is assigned iff its owner is a non-empty
/// string other than [`FREE_OWNER`]. Empty string and missing both normalize
/// to `"Free"` and count as unassigned.
pub fn owner_is_assigned(fields: &BTreeMap<String, FieldValue>) -> bool {
    matches!(
        fields.get("owner"),
        Some(FieldValue::Text(s)) if !s.is_empty() && s != FREE_OWNER
    )
}

fn identify(category: Category, fields: &BTreeMap<String, FieldValue>) -> Option<String> {
    match category {
        Category::Ports => {
            if let Some(FieldValue::Text(name)) = fields.get("fullyQualifiedPortName") {
                if !name.is_empty() {
                    return Some(name.clone());
                }
            }
            match (fields.get("cardNumber"), fields.get("portNumber")) {
                (Some(card), Some(port)) => Some(format!("{card}/{port}")),
                _ => None,
            }
        }
        Category::Sensors => match fields.get("name") {
            Some(FieldValue::Text(name)) if !name.is_empty() => Some(name.clone()),
            _ => None,
        },
        // One performance sample per device, keyed to the chassis itself.
        Category::Performance => Some("chassis".to_string()),
    }
}

/// Maps one raw response into normalized records for one device.
///
/// Fields outside the category's allow-list are dropped, missing port owners
/// are filled with `"Free"`, and for the port category the per-device
/// aggregates (`totalPorts`/`ownedPorts`/`freePorts`) are attached to every
/// record. Rows that cannot be minimally identified are dropped with a
/// logged warning, never silently.
pub fn normalize(
    raw: &RawResponse,
    device: &DeviceConfig,
    category: Category,
    cycle_timestamp: DateTime<Utc>,
) -> Vec<DeviceRecord> {
    let mut records = Vec::with_capacity(raw.rows.len());

    for row in &raw.rows {
        let mut fields = BTreeMap::new();
        for key in category.allowed_fields() {
            if let Some(value) = row.get(*key) {
                if let Some(coerced) = coerce_value(key, value) {
                    fields.insert((*key).to_string(), coerced);
                }
            }
        }

        if category == Category::Ports {
            let missing_owner = !matches!(
                fields.get("owner"),
                Some(FieldValue::Text(s)) if !s.is_empty()
            );
            if missing_owner {
                fields.insert("owner".to_string(), FieldValue::Text(FREE_OWNER.to_string()));
            }
        }

        let sub_resource_id = match identify(category, &fields) {
            Some(id) => id,
            None => {
                tracing::warn!(
                    device = %device.address,
                    category = %category,
                    "Dropping response row with no identifiable sub-resource"
                );
                continue;
            }
        };

        records.push(DeviceRecord {
            device_address: device.address.clone(),
            device_type: NA.to_string(),
            category,
            cycle_timestamp,
            sub_resource_id,
            fields,
        });
    }

    if category == Category::Ports && !records.is_empty() {
        let total = records.len() as i64;
        let owned = records
            .iter()
            .filter(|r| owner_is_assigned(&r.fields))
            .count() as i64;
        for record in &mut records {
            record
                .fields
                .insert("totalPorts".to_string(), FieldValue::Integer(total));
            record
                .fields
                .insert("ownedPorts".to_string(), FieldValue::Integer(owned));
            record
                .fields
                .insert("freePorts".to_string(), FieldValue::Integer(total - owned));
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> DeviceConfig {
        DeviceConfig {
            address: "10.0.0.1".into(),
            username: "admin".into(),
            password: "admin".into(),
        }
    }

    fn raw(rows: Vec<Value>) -> RawResponse {
        RawResponse {
            rows: rows
                .into_iter()
                .map(|v| match v {
                    Value::Object(map) => map,
                    _ => panic!("test rows must be objects"),
                })
                .collect(),
        }
    }

    #[test]
    fn absent_owner_defaults_to_free() {
        let raw = raw(vec![json!({
            "fullyQualifiedPortName": "Card 1/Port 1",
            "cardNumber": 1,
            "portNumber": 1,
            "linkState": "LINK_UP"
        })]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fields.get("owner"),
            Some(&FieldValue::Text("Free".into()))
        );
    }

    #[test]
    fn empty_string_owner_is_filled_and_counted_free() {
        let raw = raw(vec![
            json!({"fullyQualifiedPortName": "p1", "owner": ""}),
            json!({"fullyQualifiedPortName": "p2", "owner": "alice"}),
        ]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());

        assert_eq!(
            records[0].fields.get("owner"),
            Some(&FieldValue::Text("Free".into()))
        );
        assert_eq!(records[0].fields.get("ownedPorts"), Some(&FieldValue::Integer(1)));
        assert_eq!(records[0].fields.get("freePorts"), Some(&FieldValue::Integer(1)));
    }

    #[test]
    fn aggregates_are_denormalized_onto_every_record() {
        let raw = raw(vec![
            json!({"fullyQualifiedPortName": "p1", "owner": "alice"}),
            json!({"fullyQualifiedPortName": "p2", "owner": "bob"}),
            json!({"fullyQualifiedPortName": "p3"}),
        ]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());

        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.fields.get("totalPorts"), Some(&FieldValue::Integer(3)));
            assert_eq!(record.fields.get("ownedPorts"), Some(&FieldValue::Integer(2)));
            assert_eq!(record.fields.get("freePorts"), Some(&FieldValue::Integer(1)));
        }
    }

    #[test]
    fn unknown_fields_are_dropped_idempotently() {
        let rows = vec![json!({
            "fullyQualifiedPortName": "p1",
            "owner": "alice",
            "vendorInternalId": "xyzzy",
            "resourceUri": "/api/v2/ports/1"
        })];
        let input = raw(rows);

        let first = normalize(&input, &device(), Category::Ports, Utc::now());
        let second = normalize(&input, &device(), Category::Ports, Utc::now());

        for records in [&first, &second] {
            assert!(!records[0].fields.contains_key("vendorInternalId"));
            assert!(!records[0].fields.contains_key("resourceUri"));
        }
        assert_eq!(
            first[0].fields.keys().collect::<Vec<_>>(),
            second[0].fields.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn boolean_transmit_state_becomes_fixed_tokens() {
        let raw = raw(vec![json!({
            "fullyQualifiedPortName": "p1",
            "transmitState": true
        })]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());
        assert_eq!(
            records[0].fields.get("transmitState"),
            Some(&FieldValue::Text("active".into()))
        );
    }

    #[test]
    fn na_reading_coerces_to_zero() {
        let raw = raw(vec![json!({
            "name": "Fan 1",
            "type": "FAN",
            "unit": "PERCENTAGE",
            "value": "NA"
        })]);
        let records = normalize(&raw, &device(), Category::Sensors, Utc::now());
        assert_eq!(records[0].fields.get("value"), Some(&FieldValue::Float(0.0)));
    }

    #[test]
    fn unidentifiable_rows_are_dropped() {
        let raw = raw(vec![
            json!({"linkState": "LINK_UP"}),
            json!({"fullyQualifiedPortName": "p1"}),
        ]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_resource_id, "p1");
        assert_eq!(records[0].fields.get("totalPorts"), Some(&FieldValue::Integer(1)));
    }

    #[test]
    fn port_identity_falls_back_to_card_and_port_numbers() {
        let raw = raw(vec![json!({"cardNumber": 2, "portNumber": 7})]);
        let records = normalize(&raw, &device(), Category::Ports, Utc::now());
        assert_eq!(records[0].sub_resource_id, "2/7");
    }

    #[test]
    fn performance_sample_is_keyed_to_the_chassis() {
        let raw = raw(vec![json!({
            "cpuUtilization": 42.0,
            "memoryUtilization": 63.5,
            "uptimeSecs": 991
        })]);
        let records = normalize(&raw, &device(), Category::Performance, Utc::now());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_resource_id, "chassis");
        assert_eq!(
            records[0].fields.get("cpuUtilization"),
            Some(&FieldValue::Float(42.0))
        );
        assert!(!records[0].fields.contains_key("uptimeSecs"));
    }
}
