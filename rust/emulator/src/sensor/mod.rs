pub mod generator;
pub mod interface;

pub use generator::{generate, generate_with};
pub use interface::{unit_for_name, Location, Reading, SensorConfig, SensorType};
