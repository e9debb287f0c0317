use crate::SinkWriter;
use anyhow::Result;
use async_trait::async_trait;
use ixmon_common::types::{Batch, Category, DeviceRecord, FieldValue, NA};
use prometheus::{GaugeVec, IntGaugeVec, Opts, Registry};

/// Exports batches as prometheus gauges on an injected [`Registry`].
///
/// The registry is owned by the caller (the daemon creates one at startup and
/// serves it on `/metrics`), so gauge lifecycle is tied to process start/stop
/// instead of hiding in module-level globals.
pub struct GaugeSink {
    port_total: IntGaugeVec,
    port_owned: IntGaugeVec,
    port_free: IntGaugeVec,
    sensor_temperature: GaugeVec,
    sensor_current: GaugeVec,
    sensor_fan_ratio: GaugeVec,
    cpu_utilization: GaugeVec,
    memory_utilization: GaugeVec,
}

fn as_f64(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Integer(v) => Some(*v as f64),
        FieldValue::Float(v) => Some(*v),
        FieldValue::Text(s) if s == NA => Some(0.0),
        FieldValue::Text(_) => None,
    }
}

fn as_i64(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Integer(v) => Some(*v),
        FieldValue::Float(v) => Some(*v as i64),
        FieldValue::Text(s) if s == NA => Some(0),
        FieldValue::Text(_) => None,
    }
}

fn text<'a>(record: &'a DeviceRecord, key: &str) -> Option<&'a str> {
    match record.fields.get(key) {
        Some(FieldValue::Text(s)) => Some(s.as_str()),
        _ => None,
    }
}

impl GaugeSink {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let chassis = ["chassis"];
        let sensor = ["chassis", "sensor_name", "sensor_type"];

        let port_total = IntGaugeVec::new(
            Opts::new("chassis_port_total", "Total ports reported by the chassis"),
            &chassis,
        )?;
        let port_owned = IntGaugeVec::new(
            Opts::new("chassis_port_owned", "Ports with an assigned owner"),
            &chassis,
        )?;
        let port_free = IntGaugeVec::new(
            Opts::new("chassis_port_free", "Ports without an owner"),
            &chassis,
        )?;
        let sensor_temperature = GaugeVec::new(
            Opts::new(
                "chassis_sensor_temperature_celsius",
                "Temperature sensor reading in Celsius",
            ),
            &sensor,
        )?;
        let sensor_current = GaugeVec::new(
            Opts::new(
                "chassis_sensor_current_amperes",
                "Current sensor reading in Amperes",
            ),
            &sensor,
        )?;
        let sensor_fan_ratio = GaugeVec::new(
            Opts::new(
                "chassis_sensor_fan_speed_ratio",
                "Fan speed as a 0-1 ratio",
            ),
            &sensor,
        )?;
        let cpu_utilization = GaugeVec::new(
            Opts::new("chassis_cpu_utilization", "CPU utilization of the chassis"),
            &chassis,
        )?;
        let memory_utilization = GaugeVec::new(
            Opts::new(
                "chassis_memory_utilization",
                "Memory utilization of the chassis",
            ),
            &chassis,
        )?;

        registry.register(Box::new(port_total.clone()))?;
        registry.register(Box::new(port_owned.clone()))?;
        registry.register(Box::new(port_free.clone()))?;
        registry.register(Box::new(sensor_temperature.clone()))?;
        registry.register(Box::new(sensor_current.clone()))?;
        registry.register(Box::new(sensor_fan_ratio.clone()))?;
        registry.register(Box::new(cpu_utilization.clone()))?;
        registry.register(Box::new(memory_utilization.clone()))?;

        Ok(Self {
            port_total,
            port_owned,
            port_free,
            sensor_temperature,
            sensor_current,
            sensor_fan_ratio,
            cpu_utilization,
            memory_utilization,
        })
    }

    fn export_ports(&self, record: &DeviceRecord) {
        let chassis = record.device_address.as_str();
        // Aggregates are denormalized onto every record of the device, so
        // repeated sets within one batch are idempotent.
        if let Some(v) = record.fields.get("totalPorts").and_then(as_i64) {
            self.port_total.with_label_values(&[chassis]).set(v);
        }
        if let Some(v) = record.fields.get("ownedPorts").and_then(as_i64) {
            self.port_owned.with_label_values(&[chassis]).set(v);
        }
        if let Some(v) = record.fields.get("freePorts").and_then(as_i64) {
            self.port_free.with_label_values(&[chassis]).set(v);
        }
    }

    fn export_sensor(&self, record: &DeviceRecord) {
        let value = match record.fields.get("value").and_then(as_f64) {
            Some(v) => v,
            None => return,
        };
        let chassis = record.device_address.as_str();
        let name = text(record, "name").unwrap_or(&record.sub_resource_id);
        let sensor_type = text(record, "type").unwrap_or(NA);
        let labels = [chassis, name, sensor_type];

        // Route to the metric family matching the sensor's unit.
        match text(record, "unit") {
            Some("CELSIUS") => self.sensor_temperature.with_label_values(&labels).set(value),
            Some("AMPERAGE") => self.sensor_current.with_label_values(&labels).set(value),
            Some("PERCENTAGE") => self
                .sensor_fan_ratio
                .with_label_values(&labels)
                .set(value / 100.0),
            other => {
                tracing::debug!(unit = ?other, sensor = name, "Unrecognized sensor unit, skipped");
            }
        }
    }

    fn export_performance(&self, record: &DeviceRecord) {
        let chassis = record.device_address.as_str();
        if let Some(v) = record.fields.get("cpuUtilization").and_then(as_f64) {
            self.cpu_utilization.with_label_values(&[chassis]).set(v);
        }
        if let Some(v) = record.fields.get("memoryUtilization").and_then(as_f64) {
            self.memory_utilization.with_label_values(&[chassis]).set(v);
        }
    }
}

#[async_trait]
impl SinkWriter for GaugeSink {
    fn name(&self) -> &str {
        "gauges"
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        for record in &batch.records {
            // A sentinel carries no numeric reading; gauges keep their last
            // real value instead of dipping to zero.
            if record.is_sentinel() {
                continue;
            }
            match record.category {
                Category::Ports => self.export_ports(record),
                Category::Sensors => self.export_sensor(record),
                Category::Performance => self.export_performance(record),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sensor_record(unit: &str, value: f64) -> DeviceRecord {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::Text("Fan 1".into()));
        fields.insert("type".to_string(), FieldValue::Text("FAN".into()));
        fields.insert("unit".to_string(), FieldValue::Text(unit.into()));
        fields.insert("value".to_string(), FieldValue::Float(value));
        DeviceRecord {
            device_address: "10.0.0.1".into(),
            device_type: NA.into(),
            category: Category::Sensors,
            cycle_timestamp: Utc::now(),
            sub_resource_id: "Fan 1".into(),
            fields,
        }
    }

    #[tokio::test]
    async fn routes_sensor_values_by_unit() {
        let registry = Registry::new();
        let sink = GaugeSink::register(&registry).unwrap();

        let mut batch = Batch::new(Utc::now());
        batch.records.push(sensor_record("CELSIUS", 41.0));
        batch.records.push(sensor_record("PERCENTAGE", 50.0));
        sink.write_batch(&batch).await.unwrap();

        let labels = ["10.0.0.1", "Fan 1", "FAN"];
        assert_eq!(
            sink.sensor_temperature.with_label_values(&labels).get(),
            41.0
        );
        // Percentages are exported as 0-1 ratios
        assert_eq!(sink.sensor_fan_ratio.with_label_values(&labels).get(), 0.5);
        assert_eq!(sink.sensor_current.with_label_values(&labels).get(), 0.0);
    }

    #[tokio::test]
    async fn sentinel_records_do_not_touch_gauges() {
        let registry = Registry::new();
        let sink = GaugeSink::register(&registry).unwrap();

        let mut batch = Batch::new(Utc::now());
        batch
            .records
            .push(DeviceRecord::sentinel("10.0.0.9", Category::Ports, Utc::now()));
        sink.write_batch(&batch).await.unwrap();

        // No family gathered a sample for the failed device
        let gathered = registry.gather();
        assert!(gathered.iter().all(|mf| mf.get_metric().is_empty()));
    }

    #[tokio::test]
    async fn port_aggregates_set_per_device_gauges() {
        let registry = Registry::new();
        let sink = GaugeSink::register(&registry).unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("totalPorts".to_string(), FieldValue::Integer(8));
        fields.insert("ownedPorts".to_string(), FieldValue::Integer(3));
        fields.insert("freePorts".to_string(), FieldValue::Integer(5));
        let record = DeviceRecord {
            device_address: "10.0.0.2".into(),
            device_type: NA.into(),
            category: Category::Ports,
            cycle_timestamp: Utc::now(),
            sub_resource_id: "Card 1/Port 1".into(),
            fields,
        };
        let mut batch = Batch::new(Utc::now());
        batch.records.push(record);
        sink.write_batch(&batch).await.unwrap();

        assert_eq!(sink.port_total.with_label_values(&["10.0.0.2"]).get(), 8);
        assert_eq!(sink.port_owned.with_label_values(&["10.0.0.2"]).get(), 3);
        assert_eq!(sink.port_free.with_label_values(&["10.0.0.2"]).get(), 5);
    }
}
