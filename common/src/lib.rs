pub mod config;
pub mod connection;
pub mod cycle;
pub mod error;
pub mod indicator;
pub mod remote;
pub mod sensor;
pub mod sleep;
pub mod types;

pub use config::{
    CycleConfig, EndpointConfig, IndicatorConfig, NodeConfig, SensorConfig, WifiConfig,
};
pub use connection::{
    AssociationEvent, AssociationHandler, ConnectionManager, ConnectionSignal, Radio, RadioCommand,
};
pub use cycle::{CycleOrchestrator, CycleOutcome};
pub use error::{
    AssociationError, ConfigError, NetworkError, NodeError, SensorError, SensorFault,
    TransportError,
};
pub use indicator::StatusIndicator;
pub use remote::{
    read_body, HttpResponse, HttpTransport, RemoteSyncClient, SyncSession, MAX_RESPONSE_BODY,
};
pub use sensor::{Hygrometer, RawReading, SensorAcquisition, ThreadDelay};
pub use sleep::{MonotonicClock, SleepScheduler, WakeTimer};
pub use types::{
    ConnectionState, CycleResult, IntervalConfig, IntervalSource, MeasurementSample, RetryBudget,
    SleepPlan,
};
