use ixmon_client::DeviceConfig;
use serde::Deserialize;

/// Shortest interval the daemon will poll at; anything lower hammers the
/// chassis REST API for no extra fidelity.
pub const MIN_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub influx: InfluxConfig,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Port state changes quickly; polled on the short interval.
    #[serde(default = "default_ports_interval_secs")]
    pub ports_interval_secs: u64,
    /// Sensors and performance counters move slowly; polled on this one.
    #[serde(default = "default_slow_interval_secs")]
    pub slow_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            ports_interval_secs: default_ports_interval_secs(),
            slow_interval_secs: default_slow_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_ports_interval_secs() -> u64 {
    10
}

fn default_slow_interval_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_influx_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            timeout_secs: default_influx_timeout_secs(),
        }
    }
}

fn default_influx_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> String {
    "data/ixmon.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9100".to_string()
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Startup policy, applied once before any scheduler spawns. Rejects
    /// configurations that cannot produce data and clamps intervals below
    /// the floor.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.devices.is_empty() {
            anyhow::bail!("no devices configured; at least one [[devices]] entry is required");
        }
        if !self.influx.enabled && !self.sqlite.enabled && !self.metrics.enabled {
            anyhow::bail!("all sinks disabled; enable [influx], [sqlite] or [metrics]");
        }
        if self.influx.enabled && self.influx.url.is_empty() {
            anyhow::bail!("influx.url is required when the influx sink is enabled");
        }
        if self.influx.enabled && self.influx.timeout_secs == 0 {
            anyhow::bail!("influx.timeout_secs must be positive");
        }
        if self.sqlite.enabled && self.sqlite.path.is_empty() {
            anyhow::bail!("sqlite.path is required when the sqlite sink is enabled");
        }
        if self.poller.fetch_timeout_secs == 0 {
            anyhow::bail!("poller.fetch_timeout_secs must be positive");
        }

        for (name, value) in [
            ("ports_interval_secs", &mut self.poller.ports_interval_secs),
            ("slow_interval_secs", &mut self.poller.slow_interval_secs),
        ] {
            if *value == 0 {
                anyhow::bail!("poller.{name} must be positive");
            }
            if *value < MIN_INTERVAL_SECS {
                tracing::warn!(
                    setting = name,
                    requested = *value,
                    floor = MIN_INTERVAL_SECS,
                    "Polling interval below floor, clamping"
                );
                *value = MIN_INTERVAL_SECS;
            }
        }

        Ok(())
    }
}
