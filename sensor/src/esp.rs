use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht22, DhtError};
use embedded_svc::{
    http::{
        client::{Client as HttpClient, Response},
        Method, Status,
    },
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, AnyOutputPin, InputOutput, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    sys::EspError,
    wifi::{EspWifi, WifiEvent},
};
use log::{debug, info, warn};

use weather_station_common::{
    read_body, AssociationEvent, AssociationHandler, ConnectionManager, ConnectionSignal,
    CycleOrchestrator, HttpResponse, HttpTransport, Hygrometer, MonotonicClock, NodeConfig, Radio,
    RadioCommand, RawReading, RemoteSyncClient, SensorAcquisition, SensorFault, SleepScheduler,
    StatusIndicator, TransportError, WakeTimer, WifiConfig,
};

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = NodeConfig::from_build_env();
    let mut scheduler =
        SleepScheduler::new(BootClock, RtcWakeTimer, config.cycle.boot_overhead_us);

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let mut indicator = LedIndicator::new(config.indicator.gpio, config.indicator.blink_ms)
        .context("failed to initialize status led")?;

    if !config.wifi.has_credentials() {
        warn!("wifi credentials missing; set WIFI_SSID/WIFI_PASS at build time");
    }

    let signal = Arc::new(ConnectionSignal::new());
    let radio = StationRadio::new(modem, sys_loop, nvs_partition, &config.wifi, signal.clone())
        .context("failed to initialize wifi")?;
    let hygrometer = Dht22::new(config.sensor.gpio).context("failed to initialize DHT22")?;
    let transport = EspTransport::new(Duration::from_millis(config.endpoints.request_timeout_ms));

    let mut orchestrator = CycleOrchestrator::new(
        ConnectionManager::new(radio, signal, &config.wifi),
        SensorAcquisition::new(hygrometer, FreeRtos, &config.sensor),
        RemoteSyncClient::new(transport, config.endpoints.clone()),
        &config.cycle,
    );

    orchestrator.run(&mut indicator, &mut scheduler)
}

/// Wi-Fi station. Association events arrive on the system event loop task
/// and are forwarded to the shared handler.
struct StationRadio {
    wifi: EspWifi<'static>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl StationRadio {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &WifiConfig,
        signal: Arc<ConnectionSignal>,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

        let auth_method = if network.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        let handler = Arc::new(Mutex::new(AssociationHandler::new(
            signal,
            network.max_retries,
        )));

        let wifi_events = {
            let handler = handler.clone();
            sys_loop.subscribe::<WifiEvent, _>(move |event| {
                let event = match event {
                    WifiEvent::StaStarted => AssociationEvent::StationStarted,
                    WifiEvent::StaDisconnected { .. } => AssociationEvent::Disconnected,
                    _ => return,
                };
                dispatch(&handler, event);
            })?
        };

        let ip_events = sys_loop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(_) = event {
                dispatch(&handler, AssociationEvent::AddressAcquired);
            }
        })?;

        Ok(Self {
            wifi,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }
}

fn dispatch(handler: &Mutex<AssociationHandler>, event: AssociationEvent) {
    let command = handler
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .handle(event);

    if command == Some(RadioCommand::Connect) {
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_connect() };
        if rc != esp_idf_svc::sys::ESP_OK {
            warn!("esp_wifi_connect failed: esp_err_t={rc}");
        }
    }
}

impl Radio for StationRadio {
    type Error = EspError;

    fn start(&mut self) -> Result<(), EspError> {
        self.wifi.start()
    }

    fn stop(&mut self) -> Result<(), EspError> {
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err:?}");
        }
        self.wifi.stop()
    }
}

struct Dht22 {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

impl Dht22 {
    fn new(gpio: i32) -> anyhow::Result<Self> {
        // Pin number is build configuration; no other driver claims it.
        let pin = unsafe { AnyIOPin::new(gpio) };
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        info!("DHT22 on GPIO{gpio}");
        Ok(Self { pin, delay: Ets })
    }
}

impl Hygrometer for Dht22 {
    fn read(&mut self) -> Result<RawReading, SensorFault> {
        if let Err(err) = self.pin.set_high() {
            warn!("failed to set DHT22 line high before read: {err:?}");
            return Err(SensorFault::Bus);
        }

        match dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => Ok(RawReading {
                temperature_c: reading.temperature,
                relative_humidity: reading.relative_humidity,
            }),
            Err(DhtError::Timeout) => Err(SensorFault::Timeout),
            Err(DhtError::ChecksumMismatch) => Err(SensorFault::Checksum),
            Err(err) => {
                warn!("DHT22 bus error: {err:?}");
                Err(SensorFault::Bus)
            }
        }
    }
}

struct EspTransport {
    timeout: Duration,
    client: Option<HttpClient<EspHttpConnection>>,
}

impl EspTransport {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: None,
        }
    }

    fn client(&mut self, url: &str) -> Result<&mut HttpClient<EspHttpConnection>, TransportError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let conf = HttpClientConfiguration {
                    timeout: Some(self.timeout),
                    crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                    ..Default::default()
                };
                HttpClient::wrap(
                    EspHttpConnection::new(&conf).map_err(|err| request_error(url, err))?,
                )
            }
        };
        Ok(self.client.insert(client))
    }
}

fn request_error(url: &str, err: impl core::fmt::Debug) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        reason: format!("{err:?}"),
    }
}

fn read_response(
    url: &str,
    mut response: Response<&mut EspHttpConnection>,
) -> Result<HttpResponse, TransportError> {
    let status = response.status();
    let body = read_body(url, |buf| response.read(buf))?;
    Ok(HttpResponse { status, body })
}

impl HttpTransport for EspTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        let client = self.client(url)?;
        let request = client
            .request(Method::Get, url, &[])
            .map_err(|err| request_error(url, err))?;
        let response = request.submit().map_err(|err| request_error(url, err))?;
        read_response(url, response)
    }

    fn post_form(&mut self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/x-www-form-urlencoded"),
            ("Content-Length", content_length.as_str()),
        ];

        let client = self.client(url)?;
        let mut request = client
            .request(Method::Post, url, &headers)
            .map_err(|err| request_error(url, err))?;
        request
            .write_all(body.as_bytes())
            .map_err(|err| request_error(url, err))?;
        request.flush().map_err(|err| request_error(url, err))?;
        let response = request.submit().map_err(|err| request_error(url, err))?;
        read_response(url, response)
    }

    fn release(&mut self) {
        if self.client.take().is_some() {
            debug!("http client released");
        }
    }
}

/// Status LED, wired active-low.
struct LedIndicator {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    blink_ms: u32,
}

impl LedIndicator {
    fn new(gpio: i32, blink_ms: u32) -> anyhow::Result<Self> {
        // Pin number is build configuration; no other driver claims it.
        let pin = unsafe { AnyOutputPin::new(gpio) };
        let mut pin = PinDriver::output(pin)?;
        pin.set_high()?;
        Ok(Self { pin, blink_ms })
    }
}

impl StatusIndicator for LedIndicator {
    fn blink_once(&mut self) {
        if let Err(err) = self.pin.set_low() {
            warn!("failed to switch status led on: {err:?}");
        }
        FreeRtos::delay_ms(self.blink_ms);
        if let Err(err) = self.pin.set_high() {
            warn!("failed to switch status led off: {err:?}");
        }
    }

    fn blink_forever(&mut self) -> ! {
        loop {
            self.blink_once();
            FreeRtos::delay_ms(self.blink_ms);
        }
    }
}

/// `esp_timer` microseconds since boot.
struct BootClock;

impl MonotonicClock for BootClock {
    fn now_us(&self) -> u64 {
        let now = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
        now.max(0) as u64
    }
}

/// RTC timer wakeup; the only state that survives deep sleep.
struct RtcWakeTimer;

impl WakeTimer for RtcWakeTimer {
    fn arm(&mut self, duration_us: u64) {
        let rc = unsafe { esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(duration_us) };
        if rc != esp_idf_svc::sys::ESP_OK {
            warn!("esp_sleep_enable_timer_wakeup failed: esp_err_t={rc}");
        }
    }

    fn deep_sleep(&mut self) -> ! {
        unsafe { esp_idf_svc::sys::esp_deep_sleep_start() }
    }
}
