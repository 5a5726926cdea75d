use thiserror::Error;

/// Failure reported by the humidity/temperature driver for a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorFault {
    #[error("sensor did not answer in time")]
    Timeout,
    #[error("sensor frame checksum mismatch")]
    Checksum,
    #[error("sensor bus error")]
    Bus,
}

/// Every acquisition attempt failed. The orchestrator treats this as one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sensor read failed after {attempts} attempt(s), last error: {last}")]
pub struct SensorError {
    pub attempts: u32,
    pub last: SensorFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("failed reading response body from {url}: {reason}")]
    Body { url: String, reason: String },
    #[error("response body from {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interval response `{0}` is not an integer")]
    NotANumber(String),
    #[error("interval must be a positive number of minutes, got {0}")]
    NonPositive(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid interval response: {0}")]
    InvalidInterval(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("network association failed after {retries} reconnect attempt(s)")]
pub struct AssociationError {
    pub retries: u32,
}

/// Failure of one measurement attempt. Association failure is not an attempt
/// failure; it ends the cycle through `CycleOutcome::Halt`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}
