//! Status and data collaborators
//!
//! The broker does not know what a sensor is. It asks a `StatusSource` whether
//! a sensor is present and a `DataSource` for the readings pushed to
//! subscribers. Plain closures implement both traits, which is what tests use.

use rand::Rng;
use serde_json::json;

pub trait StatusSource: Send + Sync {
    fn is_connected(&self, sensor_id: &str) -> bool;
}

pub trait DataSource: Send + Sync {
    fn readings(&self, sensor_id: &str) -> String;
}

impl<F> StatusSource for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_connected(&self, sensor_id: &str) -> bool {
        self(sensor_id)
    }
}

impl<F> DataSource for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn readings(&self, sensor_id: &str) -> String {
        self(sensor_id)
    }
}

/// Default provider: random presence and a random reading stamped with the
/// current time in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedSensors;

impl StatusSource for SimulatedSensors {
    fn is_connected(&self, _sensor_id: &str) -> bool {
        rand::rng().random_bool(0.5)
    }
}

impl DataSource for SimulatedSensors {
    fn readings(&self, _sensor_id: &str) -> String {
        let value: f64 = rand::rng().random_range(0.0..100.0);
        json!({
            "value": value,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
        .to_string()
    }
}
