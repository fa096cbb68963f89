pub mod config;
pub mod logging;
pub mod state;

pub use config::AppConfig;
pub use logging::{init_logging, LoggingGuard};
pub use state::{AppState, ServiceStats};
