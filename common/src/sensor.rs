use std::{thread, time::Duration};

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::{
    config::SensorConfig,
    error::{SensorError, SensorFault},
    types::MeasurementSample,
};

/// Unrounded values as decoded by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub temperature_c: f32,
    pub relative_humidity: f32,
}

pub trait Hygrometer {
    fn read(&mut self) -> Result<RawReading, SensorFault>;
}

/// [`DelayNs`] backed by `thread::sleep`, for hosted targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

pub struct SensorAcquisition<H, D> {
    sensor: H,
    delay: D,
    attempts: u32,
    retry_delay_ms: u32,
}

impl<H: Hygrometer, D: DelayNs> SensorAcquisition<H, D> {
    pub fn new(sensor: H, delay: D, config: &SensorConfig) -> Self {
        Self {
            sensor,
            delay,
            attempts: config.read_attempts.max(1),
            retry_delay_ms: config.retry_delay_ms,
        }
    }

    /// Reads one sample, retrying up to the configured attempt count. The
    /// settle delay runs before every attempt, the first included.
    pub fn read(&mut self) -> Result<MeasurementSample, SensorError> {
        let mut last = SensorFault::Timeout;

        for attempt in 1..=self.attempts {
            self.delay.delay_ms(self.retry_delay_ms);

            match self.sensor.read() {
                Ok(raw) => {
                    let sample = MeasurementSample::from_raw(raw.temperature_c, raw.relative_humidity);
                    info!(
                        "sensor read on attempt {attempt}/{}: {:.1}°C {}%",
                        self.attempts, sample.temperature_c, sample.humidity_pct
                    );
                    return Ok(sample);
                }
                Err(fault) => {
                    warn!("sensor read attempt {attempt}/{} failed: {fault}", self.attempts);
                    last = fault;
                }
            }
        }

        Err(SensorError {
            attempts: self.attempts,
            last,
        })
    }
}
