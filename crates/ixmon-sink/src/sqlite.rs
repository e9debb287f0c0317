use crate::SinkWriter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ixmon_common::types::{Batch, Category, DeviceRecord, FieldValue};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chassis_port_details (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chassis TEXT NOT NULL,
    sub_resource TEXT NOT NULL,
    card_number TEXT,
    port_number TEXT,
    link_state TEXT,
    transmit_state TEXT,
    owner TEXT,
    total_ports INTEGER,
    owned_ports INTEGER,
    free_ports INTEGER,
    cycle_timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_port_details_cycle
    ON chassis_port_details (cycle_timestamp);
";

/// Writes one relational row per port record into a local SQLite database.
///
/// Only the port category is persisted here; sensors and performance samples
/// go to the time-series sinks. Sentinel records are inserted with NULL
/// counts so a failed device still leaves a trace row for the cycle.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

fn text_field(record: &DeviceRecord, key: &str) -> Option<String> {
    record.fields.get(key).map(|v| v.to_string())
}

fn int_field(record: &DeviceRecord, key: &str) -> Option<i64> {
    match record.fields.get(key) {
        Some(FieldValue::Integer(v)) => Some(*v),
        _ => None,
    }
}

impl SqliteSink {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite database at {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("creating chassis_port_details table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl SinkWriter for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection lock poisoned"))?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO chassis_port_details (
                    chassis, sub_resource, card_number, port_number,
                    link_state, transmit_state, owner,
                    total_ports, owned_ports, free_ports, cycle_timestamp
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for record in batch
                .records
                .iter()
                .filter(|r| r.category == Category::Ports)
            {
                stmt.execute(rusqlite::params![
                    &record.device_address,
                    &record.sub_resource_id,
                    text_field(record, "cardNumber"),
                    text_field(record, "portNumber"),
                    text_field(record, "linkState"),
                    text_field(record, "transmitState"),
                    text_field(record, "owner"),
                    int_field(record, "totalPorts"),
                    int_field(record, "ownedPorts"),
                    int_field(record, "freePorts"),
                    record.cycle_timestamp.timestamp(),
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;

        tracing::debug!(rows = inserted, "Batch written to sqlite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ixmon_common::types::NA;
    use std::collections::BTreeMap;

    fn port_record(sub_resource: &str, owner: &str) -> DeviceRecord {
        let mut fields = BTreeMap::new();
        fields.insert("owner".to_string(), FieldValue::Text(owner.into()));
        fields.insert("cardNumber".to_string(), FieldValue::Integer(1));
        fields.insert("linkState".to_string(), FieldValue::Text("LINK_UP".into()));
        fields.insert("totalPorts".to_string(), FieldValue::Integer(2));
        fields.insert("ownedPorts".to_string(), FieldValue::Integer(1));
        fields.insert("freePorts".to_string(), FieldValue::Integer(1));
        DeviceRecord {
            device_address: "10.0.0.1".into(),
            device_type: NA.into(),
            category: Category::Ports,
            cycle_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            sub_resource_id: sub_resource.into(),
            fields,
        }
    }

    fn sensor_record() -> DeviceRecord {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::Text("Fan 1".into()));
        fields.insert("value".to_string(), FieldValue::Float(40.0));
        DeviceRecord {
            device_address: "10.0.0.1".into(),
            device_type: NA.into(),
            category: Category::Sensors,
            cycle_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            sub_resource_id: "Fan 1".into(),
            fields,
        }
    }

    #[tokio::test]
    async fn inserts_one_row_per_port_record() {
        let sink = SqliteSink::new(Path::new(":memory:")).unwrap();

        let mut batch = Batch::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        batch.records.push(port_record("p1", "alice"));
        batch.records.push(port_record("p2", "Free"));
        batch.records.push(sensor_record());
        sink.write_batch(&batch).await.unwrap();

        let conn = sink.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chassis_port_details", [], |r| {
                r.get(0)
            })
            .unwrap();
        // Sensor records are not persisted relationally
        assert_eq!(count, 2);

        let (owner, total, ts): (String, i64, i64) = conn
            .query_row(
                "SELECT owner, total_ports, cycle_timestamp
                 FROM chassis_port_details WHERE sub_resource = 'p1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(owner, "alice");
        assert_eq!(total, 2);
        assert_eq!(ts, 1772366400);
    }

    #[tokio::test]
    async fn sentinel_rows_keep_null_counts() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let sink = SqliteSink::new(Path::new(":memory:")).unwrap();

        let mut batch = Batch::new(ts);
        batch
            .records
            .push(DeviceRecord::sentinel("10.0.0.9", Category::Ports, ts));
        sink.write_batch(&batch).await.unwrap();

        let conn = sink.conn.lock().unwrap();
        let (chassis, owner, total): (String, String, Option<i64>) = conn
            .query_row(
                "SELECT chassis, owner, total_ports FROM chassis_port_details",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(chassis, "10.0.0.9");
        assert_eq!(owner, NA);
        assert_eq!(total, None);
    }

    #[tokio::test]
    async fn writes_accumulate_across_cycles() {
        let sink = SqliteSink::new(Path::new(":memory:")).unwrap();

        for _ in 0..3 {
            let mut batch = Batch::new(Utc::now());
            batch.records.push(port_record("p1", "alice"));
            sink.write_batch(&batch).await.unwrap();
        }

        let conn = sink.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chassis_port_details", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 3);
    }
}
