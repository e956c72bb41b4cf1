//! Vehicle telemetry kit: samples the inertial unit, vibration/shock switches
//! and GPS, detects collisions per sample, aggregates driving summaries on a
//! tick cadence and hands both to a [`publisher::Publisher`].

pub mod aggregator;
pub mod collision;
pub mod config;
pub mod error;
#[cfg(target_os = "linux")]
pub mod hardware;
pub mod health;
pub mod nmea;
pub mod position;
pub mod publisher;
pub mod reader;
pub mod sample;
pub mod scheduler;
pub mod sensors;
pub mod sim;
pub mod status;
pub mod travel;

pub use aggregator::{DrivingSummary, SampleAggregator};
pub use collision::{CollisionDetector, CrashEvent, CrashSource};
pub use config::{FixLossPolicy, TelemetryConfig, VibrationMode};
pub use error::{ConfigError, NmeaError, PublishError, SensorError};
pub use position::{Position, PositionProvider};
pub use publisher::{HttpPublisher, JsonLinesPublisher, Publisher};
pub use reader::SampleReader;
pub use sample::Sample;
pub use scheduler::{SchedulerHandle, SensorSet, ShutdownReport, TelemetryScheduler};
pub use travel::{Identity, IdentityResolver, TravelContext, TravelGate};
