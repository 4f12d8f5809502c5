pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod logging;
pub mod receiver;
pub mod sensor;
pub mod sink;
pub mod store;

pub use engine::{Engine, EngineOptions, EngineStatus};
pub use error::{DeliveryError, EmulatorError, Result};
pub use logging::init_logger;
