//! Network association.
//!
//! The radio reports association events from its own context (an SDK event
//! loop, a simulation thread). Those events go through [`AssociationHandler`],
//! which owns the reconnect budget and publishes into a shared
//! [`ConnectionSignal`]. [`ConnectionManager::connect`] blocks on that signal
//! with a timeout.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    config::WifiConfig,
    types::{ConnectionState, RetryBudget},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationEvent {
    StationStarted,
    AddressAcquired,
    Disconnected,
}

/// Instruction back to the radio after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand {
    Connect,
}

/// The only state shared between the association event context and the
/// cycle task.
#[derive(Debug)]
pub struct ConnectionSignal {
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl Default for ConnectionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock()
    }

    pub fn publish(&self, state: ConnectionState) {
        let mut current = self.lock();
        if *current != state {
            debug!("connection state {} -> {}", current.as_str(), state.as_str());
            *current = state;
        }
        self.changed.notify_all();
    }

    /// Blocks until the state is `Connected` or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| *state != ConnectionState::Connected)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == ConnectionState::Connected
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Event-side state machine. Runs wherever the radio delivers its events.
#[derive(Debug)]
pub struct AssociationHandler {
    signal: Arc<ConnectionSignal>,
    budget: RetryBudget,
}

impl AssociationHandler {
    pub fn new(signal: Arc<ConnectionSignal>, max_retries: u32) -> Self {
        Self {
            signal,
            budget: RetryBudget::new(max_retries),
        }
    }

    pub fn retries(&self) -> u32 {
        self.budget.count()
    }

    pub fn handle(&mut self, event: AssociationEvent) -> Option<RadioCommand> {
        let current = self.signal.state();

        match event {
            AssociationEvent::StationStarted => {
                self.signal.publish(ConnectionState::Connecting);
                Some(RadioCommand::Connect)
            }
            AssociationEvent::AddressAcquired => {
                self.budget.reset();
                self.signal.publish(ConnectionState::Connected);
                info!("network address acquired");
                None
            }
            AssociationEvent::Disconnected => {
                // Teardown requested by the cycle; do not fight it.
                if matches!(
                    current,
                    ConnectionState::Disconnected | ConnectionState::ExhaustedRetries
                ) {
                    return None;
                }

                if self.budget.try_consume() {
                    warn!(
                        "association lost, reconnect attempt {}/{}",
                        self.budget.count(),
                        self.budget.max()
                    );
                    self.signal.publish(ConnectionState::Connecting);
                    Some(RadioCommand::Connect)
                } else {
                    warn!(
                        "association failed after {} reconnect attempt(s); giving up",
                        self.budget.max()
                    );
                    self.signal.publish(ConnectionState::ExhaustedRetries);
                    None
                }
            }
        }
    }
}

/// Radio driver below the connect/disconnect contract.
pub trait Radio {
    type Error: core::fmt::Debug;

    /// Starts the station. Association progress is reported asynchronously
    /// through an [`AssociationHandler`] sharing this manager's signal.
    fn start(&mut self) -> Result<(), Self::Error>;

    fn stop(&mut self) -> Result<(), Self::Error>;
}

pub struct ConnectionManager<R> {
    radio: R,
    signal: Arc<ConnectionSignal>,
    timeout: Duration,
    max_retries: u32,
}

impl<R: Radio> ConnectionManager<R> {
    pub fn new(radio: R, signal: Arc<ConnectionSignal>, wifi: &WifiConfig) -> Self {
        Self {
            radio,
            signal,
            timeout: wifi.connect_timeout(),
            max_retries: wifi.max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.signal.state()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Starts association and waits for an address. A `false` result is final
    /// for this boot; reconnects already happened inside the handler's budget.
    pub fn connect(&mut self) -> bool {
        info!("starting network association");

        if let Err(err) = self.radio.start() {
            warn!("failed to start radio: {err:?}");
            return false;
        }

        let connected = self.signal.wait_connected(self.timeout);
        if connected {
            info!("network connected");
        } else {
            warn!(
                "network not connected within {} ms (state {})",
                self.timeout.as_millis(),
                self.signal.state().as_str()
            );
        }
        connected
    }

    pub fn disconnect(&mut self) {
        self.signal.publish(ConnectionState::Disconnected);
        if let Err(err) = self.radio.stop() {
            warn!("radio teardown failed: {err:?}");
        }
        info!("network disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicU32, Ordering},
        thread,
        time::Instant,
    };

    use super::*;

    fn quick_wifi(max_retries: u32, timeout_ms: u64) -> WifiConfig {
        WifiConfig {
            max_retries,
            connect_timeout_ms: timeout_ms,
            ..WifiConfig::default()
        }
    }

    /// Delivers scripted association outcomes from a separate thread, the way
    /// an SDK event loop would.
    struct ThreadedRadio {
        handler: Arc<Mutex<AssociationHandler>>,
        outcomes: Arc<Mutex<VecDeque<bool>>>,
        connects: Arc<AtomicU32>,
        stops: u32,
        worker: Option<thread::JoinHandle<()>>,
    }

    impl ThreadedRadio {
        fn new(signal: Arc<ConnectionSignal>, max_retries: u32, outcomes: &[bool]) -> Self {
            Self {
                handler: Arc::new(Mutex::new(AssociationHandler::new(signal, max_retries))),
                outcomes: Arc::new(Mutex::new(outcomes.iter().copied().collect())),
                connects: Arc::new(AtomicU32::new(0)),
                stops: 0,
                worker: None,
            }
        }
    }

    impl Radio for ThreadedRadio {
        type Error = ();

        fn start(&mut self) -> Result<(), ()> {
            let handler = self.handler.clone();
            let outcomes = self.outcomes.clone();
            let connects = self.connects.clone();
            self.worker = Some(thread::spawn(move || {
                let mut event = AssociationEvent::StationStarted;
                loop {
                    let command = handler.lock().unwrap().handle(event);
                    if command != Some(RadioCommand::Connect) {
                        break;
                    }
                    connects.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    event = match outcomes.lock().unwrap().pop_front() {
                        Some(true) => AssociationEvent::AddressAcquired,
                        _ => AssociationEvent::Disconnected,
                    };
                }
            }));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), ()> {
            self.stops += 1;
            Ok(())
        }
    }

    #[test]
    fn connect_returns_after_address_event() {
        let signal = Arc::new(ConnectionSignal::new());
        let radio = ThreadedRadio::new(signal.clone(), 5, &[false, false, true]);
        let connects = radio.connects.clone();
        let mut manager = ConnectionManager::new(radio, signal.clone(), &quick_wifi(5, 5_000));

        assert!(manager.connect());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connects.load(Ordering::SeqCst), 3);

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.radio.stops, 1);
    }

    #[test]
    fn connect_times_out_once_retries_are_exhausted() {
        let signal = Arc::new(ConnectionSignal::new());
        let radio = ThreadedRadio::new(signal.clone(), 3, &[false; 10]);
        let connects = radio.connects.clone();
        let mut manager = ConnectionManager::new(radio, signal.clone(), &quick_wifi(3, 1_000));

        let started = Instant::now();
        assert!(!manager.connect());
        assert!(started.elapsed() >= Duration::from_millis(1_000));

        // Initial connect plus the three budgeted reconnects.
        assert_eq!(connects.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state(), ConnectionState::ExhaustedRetries);
        assert_eq!(manager.radio.handler.lock().unwrap().retries(), 3);
    }

    #[test]
    fn disconnect_past_the_budget_requests_no_reconnect() {
        let signal = Arc::new(ConnectionSignal::new());
        let mut handler = AssociationHandler::new(signal.clone(), 2);

        assert_eq!(
            handler.handle(AssociationEvent::StationStarted),
            Some(RadioCommand::Connect)
        );
        assert_eq!(signal.state(), ConnectionState::Connecting);
        assert_eq!(
            handler.handle(AssociationEvent::Disconnected),
            Some(RadioCommand::Connect)
        );
        assert_eq!(
            handler.handle(AssociationEvent::Disconnected),
            Some(RadioCommand::Connect)
        );
        assert_eq!(handler.handle(AssociationEvent::Disconnected), None);
        assert_eq!(signal.state(), ConnectionState::ExhaustedRetries);
        assert_eq!(handler.retries(), 2);

        assert_eq!(handler.handle(AssociationEvent::Disconnected), None);
        assert_eq!(handler.retries(), 2);
    }

    #[test]
    fn address_event_clears_the_retry_count() {
        let signal = Arc::new(ConnectionSignal::new());
        let mut handler = AssociationHandler::new(signal.clone(), 3);

        handler.handle(AssociationEvent::StationStarted);
        handler.handle(AssociationEvent::Disconnected);
        handler.handle(AssociationEvent::Disconnected);
        assert_eq!(handler.retries(), 2);

        assert_eq!(handler.handle(AssociationEvent::AddressAcquired), None);
        assert_eq!(handler.retries(), 0);
        assert_eq!(signal.state(), ConnectionState::Connected);
    }

    #[test]
    fn teardown_disconnect_is_not_retried() {
        let signal = Arc::new(ConnectionSignal::new());
        let mut handler = AssociationHandler::new(signal.clone(), 3);
        handler.handle(AssociationEvent::StationStarted);
        handler.handle(AssociationEvent::AddressAcquired);

        signal.publish(ConnectionState::Disconnected);

        assert_eq!(handler.handle(AssociationEvent::Disconnected), None);
        assert_eq!(handler.retries(), 0);
        assert_eq!(signal.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn wait_connected_times_out_without_events() {
        let signal = ConnectionSignal::new();
        assert!(!signal.wait_connected(Duration::from_millis(20)));
        assert_eq!(signal.state(), ConnectionState::Idle);
    }

    #[test]
    fn radio_start_failure_reports_not_connected() {
        struct DeadRadio;

        impl Radio for DeadRadio {
            type Error = &'static str;

            fn start(&mut self) -> Result<(), Self::Error> {
                Err("modem unavailable")
            }

            fn stop(&mut self) -> Result<(), Self::Error> {
                Ok(())
            }
        }

        let signal = Arc::new(ConnectionSignal::new());
        let mut manager = ConnectionManager::new(DeadRadio, signal, &quick_wifi(5, 5_000));
        assert!(!manager.connect());
    }
}
