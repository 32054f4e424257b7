pub mod config;
pub mod logging;

pub use config::StoreConfig;
pub use logging::init_tracing;
