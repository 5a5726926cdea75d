use serde::{Deserialize, Serialize};

pub const MICROS_PER_MINUTE: u64 = 60_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    ExhaustedRetries,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::ExhaustedRetries => "EXHAUSTED_RETRIES",
        }
    }
}

/// Bounded failure counter. The count only moves on a consumed failure and
/// never passes `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    count: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// Records one failure. Returns `false` without counting when the budget
    /// is already spent.
    pub fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementSample {
    #[serde(rename = "temperatureC")]
    pub temperature_c: f32,
    #[serde(rename = "humidityPct")]
    pub humidity_pct: u8,
}

impl MeasurementSample {
    pub fn from_raw(temperature_c: f32, raw_humidity: f32) -> Self {
        Self {
            temperature_c,
            humidity_pct: round_humidity(raw_humidity),
        }
    }
}

/// Round-half-up to a whole percent; the sensor is only accurate to about 2 %.
pub fn round_humidity(raw: f32) -> u8 {
    (raw + 0.5).floor().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntervalSource {
    Remote,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalConfig {
    pub minutes: u32,
    pub source: IntervalSource,
}

impl IntervalConfig {
    pub fn remote(minutes: u32) -> Self {
        Self {
            minutes,
            source: IntervalSource::Remote,
        }
    }

    pub fn fallback(minutes: u32) -> Self {
        Self {
            minutes,
            source: IntervalSource::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SleepPlan {
    #[serde(rename = "intervalMin")]
    pub interval_min: u32,
    #[serde(rename = "elapsedUs")]
    pub elapsed_us: u64,
    #[serde(rename = "bootOverheadUs")]
    pub boot_overhead_us: u64,
    #[serde(rename = "sleepUs")]
    pub sleep_us: u64,
}

impl SleepPlan {
    /// `interval - elapsed - overhead`, floored at zero.
    pub fn compute(interval_min: u32, elapsed_us: u64, boot_overhead_us: u64) -> Self {
        let interval_us = u64::from(interval_min).saturating_mul(MICROS_PER_MINUTE);
        Self {
            interval_min,
            elapsed_us,
            boot_overhead_us,
            sleep_us: interval_us
                .saturating_sub(elapsed_us)
                .saturating_sub(boot_overhead_us),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleResult {
    pub success: bool,
    pub interval: IntervalConfig,
}
