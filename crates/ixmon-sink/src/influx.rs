use crate::SinkWriter;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ixmon_common::types::{Batch, Category, DeviceRecord, FieldValue, NA};

/// Writes batches to an InfluxDB v2 `/api/v2/write` endpoint as line
/// protocol, one line per record, timestamped with the cycle timestamp in
/// seconds precision.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    health_url: String,
    token: String,
}

/// Numeric coercion target for fields that must never carry the `"NA"`
/// placeholder into a typed column.
enum NumericKind {
    Count,
    Reading,
}

fn measurement(category: Category) -> &'static str {
    match category {
        Category::Ports => "portUtilization",
        Category::Sensors => "sensorReadings",
        Category::Performance => "chassisPerformance",
    }
}

fn numeric_kind(key: &str) -> Option<NumericKind> {
    match key {
        "totalPorts" | "ownedPorts" | "freePorts" => Some(NumericKind::Count),
        "value" | "cpuUtilization" | "memoryUtilization" => Some(NumericKind::Reading),
        _ => None,
    }
}

/// Escape for measurement names: `,` and space.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape for tag keys, tag values and field keys: `,`, `=` and space.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Escape for quoted field string values: `\` and `"`.
fn escape_field_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn render_field_value(key: &str, value: &FieldValue) -> String {
    match value {
        FieldValue::Integer(v) => format!("{v}i"),
        FieldValue::Float(v) => format!("{v}"),
        FieldValue::Text(s) => match numeric_kind(key) {
            // "NA" in a numeric column becomes zero rather than a type clash.
            Some(NumericKind::Count) if s == NA => "0i".to_string(),
            Some(NumericKind::Reading) if s == NA => "0".to_string(),
            _ => format!("\"{}\"", escape_field_string(s)),
        },
    }
}

/// Renders one record as a line-protocol line, or `None` when the record has
/// no fields to write.
fn render_line(record: &DeviceRecord) -> Option<String> {
    if record.fields.is_empty() {
        return None;
    }

    let mut line = String::new();
    line.push_str(escape_measurement(measurement(record.category)).as_str());
    line.push_str(&format!(",chassis={}", escape_tag(&record.device_address)));
    if record.category == Category::Ports {
        if let Some(card) = record.fields.get("cardNumber") {
            line.push_str(&format!(",card={}", escape_tag(&card.to_string())));
        }
    }
    line.push_str(&format!(
        ",subResource={}",
        escape_tag(&record.sub_resource_id)
    ));

    let fields: Vec<String> = record
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_tag(key), render_field_value(key, value)))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    line.push_str(&format!(" {}", record.cycle_timestamp.timestamp()));
    Some(line)
}

impl InfluxSink {
    /// `request_timeout` bounds every write and probe round-trip so a
    /// stalled database connection fails the write instead of wedging the
    /// scheduler loop that awaits it.
    pub fn new(
        url: &str,
        token: &str,
        org: &str,
        bucket: &str,
        request_timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building influx http client")?;
        let base = url.trim_end_matches('/');
        Ok(Self {
            client,
            write_url: format!("{base}/api/v2/write?org={org}&bucket={bucket}&precision=s"),
            health_url: format!("{base}/health"),
            token: token.to_string(),
        })
    }

    /// Startup probe so an unreachable database fails the process before the
    /// first cycle rather than silently dropping every batch.
    pub async fn probe(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .context("influx health probe failed")?;
        if !resp.status().is_success() {
            bail!("influx health probe returned HTTP {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl SinkWriter for InfluxSink {
    fn name(&self) -> &str {
        "influx"
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        let lines: Vec<String> = batch.records.iter().filter_map(render_line).collect();
        if lines.is_empty() {
            return Ok(());
        }

        let body = lines.join("\n");
        let resp = self
            .client
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("influx write rejected: HTTP {status}: {body}");
        }

        tracing::debug!(lines = lines.len(), "Batch written to influx");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ixmon_common::types::DeviceRecord;
    use std::collections::BTreeMap;

    fn port_record() -> DeviceRecord {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("owner".to_string(), FieldValue::Text("Free".into()));
        fields.insert("cardNumber".to_string(), FieldValue::Integer(2));
        fields.insert("linkState".to_string(), FieldValue::Text("LINK UP".into()));
        fields.insert("transmitState".to_string(), FieldValue::Text("idle".into()));
        fields.insert("totalPorts".to_string(), FieldValue::Integer(8));
        fields.insert("ownedPorts".to_string(), FieldValue::Integer(3));
        fields.insert("freePorts".to_string(), FieldValue::Integer(5));
        DeviceRecord {
            device_address: "10.0.0.1".into(),
            device_type: NA.into(),
            category: Category::Ports,
            cycle_timestamp: ts,
            sub_resource_id: "Card 2/Port 1".into(),
            fields,
        }
    }

    #[test]
    fn renders_tags_fields_and_second_precision_timestamp() {
        let line = render_line(&port_record()).unwrap();

        assert!(line.starts_with("portUtilization,chassis=10.0.0.1,card=2,subResource=Card\\ 2/Port\\ 1 "));
        assert!(line.contains("totalPorts=8i"));
        assert!(line.contains("linkState=\"LINK UP\""));
        assert!(line.ends_with(&format!(" {}", 1772366400)));
    }

    #[test]
    fn sentinel_numeric_fields_coerce_to_zero_not_na() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let sentinel = DeviceRecord::sentinel("10.0.0.9", Category::Ports, ts);
        let line = render_line(&sentinel).unwrap();

        assert!(line.contains("totalPorts=0i"));
        assert!(line.contains("ownedPorts=0i"));
        assert!(line.contains("freePorts=0i"));
        // Non-numeric fields keep the placeholder as a string value
        assert!(line.contains("owner=\"NA\""));
        assert!(!line.contains("totalPorts=\"NA\""));
    }

    #[test]
    fn escapes_line_protocol_special_characters() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
        assert_eq!(escape_field_string("say \"hi\"\\"), "say \\\"hi\\\"\\\\");
        assert_eq!(escape_measurement("port util"), "port\\ util");
    }

    #[tokio::test]
    async fn stalled_server_fails_the_write_instead_of_hanging() {
        use std::time::Duration;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and hold them open without ever answering.
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });

        let sink = InfluxSink::new(
            &format!("http://{addr}"),
            "token",
            "org",
            "bucket",
            Duration::from_millis(250),
        )
        .unwrap();

        let mut batch = Batch::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        batch.records.push(port_record());

        let result = tokio::time::timeout(Duration::from_secs(5), sink.write_batch(&batch))
            .await
            .expect("write must fail fast, not hang");
        assert!(result.is_err());
    }

    #[test]
    fn reading_fields_render_as_floats() {
        assert_eq!(
            render_field_value("cpuUtilization", &FieldValue::Float(12.5)),
            "12.5"
        );
        assert_eq!(
            render_field_value("value", &FieldValue::Text(NA.into())),
            "0"
        );
    }
}
