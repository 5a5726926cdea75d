//! One boot's worth of work: connect, fetch/read/post with retries,
//! disconnect, then either deep sleep or fail-stop.

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::{
    config::CycleConfig,
    connection::{ConnectionManager, Radio},
    error::{AssociationError, NetworkError, NodeError},
    indicator::StatusIndicator,
    remote::{resolve_interval, HttpTransport, RemoteSyncClient},
    sensor::{Hygrometer, SensorAcquisition},
    sleep::{MonotonicClock, SleepScheduler, WakeTimer},
    types::{CycleResult, IntervalConfig, IntervalSource},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sleep for the resolved interval, whether or not the upload succeeded.
    Sleep(CycleResult),
    /// No network. The node blinks until someone power-cycles it.
    Halt(AssociationError),
}

pub struct CycleOrchestrator<R, H, D, T> {
    connection: ConnectionManager<R>,
    sensor: SensorAcquisition<H, D>,
    remote: RemoteSyncClient<T>,
    attempts: u32,
    default_interval_min: u32,
}

impl<R, H, D, T> CycleOrchestrator<R, H, D, T>
where
    R: Radio,
    H: Hygrometer,
    D: DelayNs,
    T: HttpTransport,
{
    pub fn new(
        connection: ConnectionManager<R>,
        sensor: SensorAcquisition<H, D>,
        remote: RemoteSyncClient<T>,
        config: &CycleConfig,
    ) -> Self {
        Self {
            connection,
            sensor,
            remote,
            attempts: config.attempts.max(1),
            default_interval_min: config.default_interval_min,
        }
    }

    pub fn execute(&mut self, indicator: &mut impl StatusIndicator) -> CycleOutcome {
        indicator.blink_once();

        if !self.connection.connect() {
            return CycleOutcome::Halt(AssociationError {
                retries: self.connection.max_retries(),
            });
        }

        let mut interval = IntervalConfig::fallback(self.default_interval_min);
        let mut success = false;

        for attempt in 1..=self.attempts {
            match self.attempt(&mut interval) {
                Ok(()) => {
                    info!("measurement cycle succeeded on attempt {attempt}/{}", self.attempts);
                    success = true;
                    break;
                }
                Err(err) => {
                    warn!("measurement attempt {attempt}/{} failed: {err}", self.attempts);
                }
            }
        }

        self.connection.disconnect();

        CycleOutcome::Sleep(CycleResult { success, interval })
    }

    /// Runs the cycle and enters its terminal state.
    pub fn run<C, W>(
        &mut self,
        indicator: &mut impl StatusIndicator,
        scheduler: &mut SleepScheduler<C, W>,
    ) -> !
    where
        C: MonotonicClock,
        W: WakeTimer,
    {
        match self.execute(indicator) {
            CycleOutcome::Sleep(result) => {
                info!(
                    "cycle finished: {}",
                    serde_json::to_string(&result).unwrap_or_default()
                );
                scheduler.sleep(result.interval.minutes)
            }
            CycleOutcome::Halt(err) => {
                error!("{err}; halting until manual reset");
                indicator.blink_forever()
            }
        }
    }

    fn attempt(&mut self, interval: &mut IntervalConfig) -> Result<(), NodeError> {
        let mut session = self.remote.session();

        let fetched = session.fetch_interval();
        // A remote value from an earlier attempt outlives later fetch failures.
        if fetched.is_ok() || interval.source == IntervalSource::Default {
            *interval = resolve_interval(&fetched, self.default_interval_min);
        }
        match fetched {
            Ok(_) | Err(NetworkError::InvalidInterval(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let sample = self.sensor.read()?;
        session.try_post_sample(&sample)?;
        Ok(())
    }
}
