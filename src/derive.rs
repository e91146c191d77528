//! Pure formulas relating sampling rate, sampling period, signal length and
//! time bounds. Nothing here is ever stored: entities keep `sampling_rate`
//! and `t_start` only and recompute the rest on every read.

use crate::error::{NeoError, Result};

pub fn sampling_period(rate: f64) -> Result<f64> {
    if rate == 0.0 {
        return Err(NeoError::Division("sampling_period"));
    }
    Ok(1.0 / rate)
}

/// The inverse of [`sampling_period`], used when a caller sets the period.
pub fn sampling_rate_from_period(period: f64) -> Result<f64> {
    if period == 0.0 {
        return Err(NeoError::Division("sampling_rate"));
    }
    Ok(1.0 / period)
}

pub fn duration(signal_length: usize, period: f64) -> f64 {
    signal_length as f64 * period
}

pub fn t_stop(t_start: f64, duration: f64) -> f64 {
    t_start + duration
}
