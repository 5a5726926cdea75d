use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub max_retries: u32,
    pub connect_timeout_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            max_retries: 5,
            connect_timeout_ms: 30_000,
        }
    }
}

impl WifiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        let ssid = self.ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

/// Remote endpoints and the form field prefixes the collector expects.
///
/// The field prefixes are a deployment contract with the server; the
/// defaults match a collector reading `Temperature` and `Humidity` form
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub interval_url: String,
    pub data_url: String,
    pub temperature_field: String,
    pub humidity_field: String,
    pub request_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            interval_url: "https://your.website.address/interval.txt".to_string(),
            data_url: "https://your.website.address/collect.php".to_string(),
            temperature_field: "Temperature=".to_string(),
            humidity_field: "&Humidity=".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorConfig {
    pub gpio: i32,
    pub read_attempts: u32,
    pub retry_delay_ms: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gpio: 25,
            read_attempts: 5,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub gpio: i32,
    pub blink_ms: u32,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            gpio: 16,
            blink_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleConfig {
    pub attempts: u32,
    pub default_interval_min: u32,
    pub boot_overhead_us: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            default_interval_min: 10,
            boot_overhead_us: 250_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub wifi: WifiConfig,
    pub endpoints: EndpointConfig,
    pub sensor: SensorConfig,
    pub indicator: IndicatorConfig,
    pub cycle: CycleConfig,
}

impl NodeConfig {
    /// Defaults overlaid with values baked in at compile time.
    pub fn from_build_env() -> Self {
        let mut config = Self::default();
        config.wifi.ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
        config.wifi.password = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
        if let Some(url) = option_env!("INTERVAL_URL") {
            config.endpoints.interval_url = url.to_string();
        }
        if let Some(url) = option_env!("DATA_URL") {
            config.endpoints.data_url = url.to_string();
        }
        config.sanitize();
        config
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.wifi.max_retries = self.wifi.max_retries.min(50);
        self.wifi.connect_timeout_ms = self.wifi.connect_timeout_ms.clamp(1_000, 300_000);

        self.endpoints.request_timeout_ms = self.endpoints.request_timeout_ms.clamp(1_000, 60_000);

        self.sensor.read_attempts = self.sensor.read_attempts.clamp(1, 20);
        self.sensor.retry_delay_ms = self.sensor.retry_delay_ms.min(10_000);

        self.indicator.blink_ms = self.indicator.blink_ms.clamp(10, 5_000);

        self.cycle.attempts = self.cycle.attempts.clamp(1, 10);
        if self.cycle.default_interval_min == 0 {
            self.cycle.default_interval_min = CycleConfig::default().default_interval_min;
        }
        self.cycle.boot_overhead_us = self.cycle.boot_overhead_us.min(10_000_000);
    }
}
