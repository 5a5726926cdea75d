use std::{
    io::Read,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Local;
use tracing::{info, warn};

use weather_station_common::{
    read_body, AssociationEvent, AssociationHandler, ConnectionManager, ConnectionSignal,
    CycleOrchestrator, HttpResponse, HttpTransport, Hygrometer, MonotonicClock, NodeConfig, Radio,
    RadioCommand, RawReading, RemoteSyncClient, SensorAcquisition, SensorFault, SleepScheduler,
    StatusIndicator, ThreadDelay, TransportError, WakeTimer,
};

const ASSOCIATION_LATENCY_MS: u64 = 200;

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let clock = HostClock::new();
    let config = load_config().context("failed to load node configuration")?;
    let mut scheduler = SleepScheduler::new(clock, ProcessWakeTimer, config.cycle.boot_overhead_us);

    let sim_failures = std::env::var("SIM_ASSOC_FAILURES")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(0);
    let sim_sensor_failures = std::env::var("SIM_SENSOR_FAILURES")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(0);

    let signal = Arc::new(ConnectionSignal::new());
    let handler = AssociationHandler::new(signal.clone(), config.wifi.max_retries);
    let radio = SimulatedRadio::new(handler, sim_failures);

    let transport = UreqTransport::new(Duration::from_millis(
        config.endpoints.request_timeout_ms,
    ));

    let mut orchestrator = CycleOrchestrator::new(
        ConnectionManager::new(radio, signal, &config.wifi),
        SensorAcquisition::new(
            SimulatedHygrometer::new(sim_sensor_failures),
            ThreadDelay,
            &config.sensor,
        ),
        RemoteSyncClient::new(transport, config.endpoints.clone()),
        &config.cycle,
    );
    let mut indicator = LogIndicator {
        blink: Duration::from_millis(u64::from(config.indicator.blink_ms)),
    };

    info!(
        "simulated node started (interval source {}, data sink {})",
        config.endpoints.interval_url, config.endpoints.data_url
    );

    orchestrator.run(&mut indicator, &mut scheduler)
}

/// Defaults, then an optional JSON file, then individual environment
/// overrides. Read once at boot.
fn load_config() -> anyhow::Result<NodeConfig> {
    let mut config = match std::env::var("WEATHER_NODE_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            NodeConfig::from_json(&json).with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => NodeConfig::default(),
    };

    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        config.wifi.ssid = ssid;
    }
    if let Ok(url) = std::env::var("INTERVAL_URL") {
        config.endpoints.interval_url = url;
    }
    if let Ok(url) = std::env::var("DATA_URL") {
        config.endpoints.data_url = url;
    }

    config.sanitize();
    Ok(config)
}

/// Emits association events from its own thread, failing a fixed number of
/// times before handing out an address.
struct SimulatedRadio {
    handler: Arc<Mutex<AssociationHandler>>,
    failures: u32,
}

impl SimulatedRadio {
    fn new(handler: AssociationHandler, failures: u32) -> Self {
        Self {
            handler: Arc::new(Mutex::new(handler)),
            failures,
        }
    }
}

impl Radio for SimulatedRadio {
    type Error = std::io::Error;

    fn start(&mut self) -> Result<(), Self::Error> {
        let handler = self.handler.clone();
        let mut failures_left = self.failures;

        thread::Builder::new()
            .name("sim-wifi-events".to_string())
            .spawn(move || {
                let mut event = AssociationEvent::StationStarted;
                loop {
                    let command = handler
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .handle(event);
                    if command != Some(RadioCommand::Connect) {
                        break;
                    }

                    thread::sleep(Duration::from_millis(ASSOCIATION_LATENCY_MS));
                    event = if failures_left > 0 {
                        failures_left -= 1;
                        AssociationEvent::Disconnected
                    } else {
                        AssociationEvent::AddressAcquired
                    };
                }
            })?;

        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(AssociationEvent::Disconnected);
        Ok(())
    }
}

struct SimulatedHygrometer {
    failures_left: u32,
}

impl SimulatedHygrometer {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: failures,
        }
    }
}

impl Hygrometer for SimulatedHygrometer {
    fn read(&mut self) -> Result<RawReading, SensorFault> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SensorFault::Timeout);
        }

        // Drifts slowly with wall-clock minutes so successive runs differ.
        let minute = (Local::now().timestamp() / 60) as f32;
        Ok(RawReading {
            temperature_c: 20.0 + (minute % 12.0) * 0.25,
            relative_humidity: 45.0 + (minute % 7.0) * 1.3,
        })
    }
}

struct UreqTransport {
    timeout: Duration,
    agent: ureq::Agent,
}

impl UreqTransport {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            agent: build_agent(timeout),
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent("weather-station-sensor")
        .build()
}

fn into_response(
    url: &str,
    result: Result<ureq::Response, ureq::Error>,
) -> Result<HttpResponse, TransportError> {
    let response = match result {
        Ok(response) => response,
        // Non-2xx statuses are still responses; the sync client judges them.
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(err)) => {
            return Err(TransportError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })
        }
    };

    let status = response.status();
    let mut reader = response.into_reader();
    let body = read_body(url, |buf| reader.read(buf))?;

    Ok(HttpResponse { status, body })
}

impl HttpTransport for UreqTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        into_response(url, self.agent.get(url).call())
    }

    fn post_form(&mut self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        into_response(
            url,
            self.agent
                .post(url)
                .set("Content-Type", "application/x-www-form-urlencoded")
                .send_string(body),
        )
    }

    fn release(&mut self) {
        // A fresh agent drops every pooled connection.
        self.agent = build_agent(self.timeout);
    }
}

struct LogIndicator {
    blink: Duration,
}

impl StatusIndicator for LogIndicator {
    fn blink_once(&mut self) {
        info!("status led: blink");
        thread::sleep(self.blink);
    }

    fn blink_forever(&mut self) -> ! {
        loop {
            warn!("status led: blink (association failed)");
            thread::sleep(self.blink * 2);
        }
    }
}

struct HostClock {
    origin: Instant,
}

impl HostClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl MonotonicClock for HostClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Leaves the process; the next "boot" is the next invocation.
struct ProcessWakeTimer;

impl WakeTimer for ProcessWakeTimer {
    fn arm(&mut self, duration_us: u64) {
        let wake_at = Local::now() + chrono::Duration::microseconds(duration_us as i64);
        info!(
            "wake timer armed for {duration_us} us (next boot due {})",
            wake_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    fn deep_sleep(&mut self) -> ! {
        info!("entering simulated deep sleep");
        std::process::exit(0)
    }
}
