pub mod config;
pub mod error;
pub mod load;
pub mod logging;
pub mod merge;
pub mod validate;

pub use config::{AdapterConfig, Config, LaunchConfig, LogConfig, LogLevel, ProtocolConfig};
pub use error::ConfigError;
pub use load::{load_config, load_file, load_from_str};
