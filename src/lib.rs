pub mod record;
pub mod error;
pub mod env;
pub mod config;
pub mod store;
pub mod sink;
pub mod backend;
pub mod idle;
pub mod coordinator;
pub mod layer;

#[cfg(feature = "http")]
pub mod http_sink;

pub mod init;
pub mod noop_sink;

pub use config::{UploadConfig, UploadStrategy};
pub use coordinator::{SkipReason, UploadCoordinator, UploadReport};
pub use init::LogRelay;
pub use record::{LogLevel, LogRecord};
