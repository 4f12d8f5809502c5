use super::interface::{Reading, SensorConfig};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces one synthetic reading for `config` using the thread-local RNG.
pub fn generate(config: &SensorConfig) -> Reading {
    generate_with(config, &mut rand::thread_rng())
}

/// Same as [`generate`] with a caller-supplied RNG.
pub fn generate_with<R: Rng>(config: &SensorConfig, rng: &mut R) -> Reading {
    let raw = sample(config.min_value, config.max_value, rng);
    // Rounding can step outside a range whose bounds carry more than two decimals.
    let value = round2(raw).clamp(config.min_value, config.max_value);

    Reading {
        sensor_id: config.sensor_id.clone(),
        sensor_type: config.sensor_type,
        value,
        unit: config.sensor_type.unit().to_string(),
        location: config.location,
        timestamp_ms: now_millis(),
    }
}

/// Uniform draw from `[min, max]`. Interpolates between the bounds when their
/// distance does not fit in an `f64`.
fn sample<R: Rng>(min: f64, max: f64, rng: &mut R) -> f64 {
    if (max - min).is_finite() {
        rng.gen_range(min..=max)
    } else {
        let t = rng.gen_range(0.0..=1.0);
        min * (1.0 - t) + max * t
    }
}

fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
