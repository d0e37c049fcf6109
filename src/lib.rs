pub mod collectors;
pub mod config;
pub mod error;
pub mod kernel;
pub mod platform;
pub mod session;

pub use collectors::Collector;
pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use kernel::lifecycle::StopHandle;
pub use session::{Hosts, PerfSnapshot, TelemetrySession};
