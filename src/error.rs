use thiserror::Error;

/// Sensor-side failures. All of these are "skip this tick", never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Pin read failed: {0}")]
    Pin(String),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Sensor not initialized")]
    NotInitialized,

    #[error("Read failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Malformed or unusable NMEA input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NmeaError {
    #[error("Not an RMC sentence")]
    NotRmc,

    #[error("Checksum mismatch (expected {expected:02X}, computed {computed:02X})")]
    Checksum { expected: u8, computed: u8 },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown fix status: {0:?}")]
    Status(String),

    #[error("Invalid number in field {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Downstream publish failures. Logged at the boundary, never retried.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {0}")]
    Status(u16),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Publisher already closed")]
    Closed,
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => PublishError::Status(status.as_u16()),
            None => PublishError::Transport(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type SensorResult<T> = Result<T, SensorError>;
