//! Dose accumulation over wall-clock time.
//!
//! Dose is the integral of the UV Index over elapsed seconds. Integration
//! always resumes from `last_dose_update_time`, so a session that was
//! suspended for hours catches up in one step instead of counting ticks.

use crate::ExposureSession;
use chrono::{DateTime, Utc};

/// UV-Index-seconds in one standard erythemal dose (SED)
pub const SED_DOSE_UNITS: f64 = 4000.0;

/// Integrate the session's dose up to `until`.
///
/// Returns the dose added. Calls with an `until` at or before the last
/// update add nothing and only move the update marker. Callers clamp
/// `until` with [`integration_bound`] so the dose never runs past the
/// planned end.
pub fn integrate(session: &mut ExposureSession, until: DateTime<Utc>) -> f64 {
    let delta = seconds_between(session.last_dose_update_time, until);
    session.last_dose_update_time = until;

    if delta <= 0.0 {
        return 0.0;
    }

    let added = non_negative_uv(session.current_uv_index) * delta;
    session.accumulated_dose += added;
    added
}

/// Latest instant integration may reach: `min(now, planned_end_time)`
pub fn integration_bound(session: &ExposureSession, now: DateTime<Utc>) -> DateTime<Utc> {
    now.min(session.planned_end_time)
}

/// Convert a UV-Index-seconds dose to standard erythemal dose units
pub fn standard_erythemal_dose(dose: f64) -> f64 {
    dose / SED_DOSE_UNITS
}

/// Fractional seconds from `from` to `to` (negative if `to` is earlier)
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        // Only spans of roughly 292 years overflow nanoseconds
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

pub(crate) fn non_negative_uv(uv_index: f64) -> f64 {
    if uv_index.is_finite() && uv_index > 0.0 {
        uv_index
    } else {
        0.0
    }
}
