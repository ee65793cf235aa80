//! Burn threshold model.
//!
//! Linear model: minutes to burn at UV Index 1 for the skin class, divided
//! by the UV Index and multiplied by the protection factor.

use crate::SkinClass;

/// Upper bound on any countdown, in seconds (12 hours)
pub const MAX_REMAINING_SECONDS: i64 = 43_200;

/// Seconds until burning at a constant UV Index.
///
/// UV Index of zero (or not a number) means no burn risk and returns the
/// 12 hour cap.
pub fn seconds_to_burn(class: SkinClass, uv_index: f64, protection_factor: f64) -> i64 {
    if uv_index.is_nan() || uv_index <= 0.0 {
        return MAX_REMAINING_SECONDS;
    }

    let seconds = (class.base_minutes() / uv_index * effective_protection(protection_factor) * 60.0)
        .round();

    if seconds >= MAX_REMAINING_SECONDS as f64 {
        MAX_REMAINING_SECONDS
    } else {
        seconds as i64
    }
}

/// Dose budget for a session, in UV-Index-seconds.
///
/// This is the burn time at UV Index 1. It does not depend on the ambient
/// UV Index and is not capped: the cap applies to countdowns, not budgets.
pub fn dose_budget(class: SkinClass, protection_factor: f64) -> f64 {
    class.base_minutes() * effective_protection(protection_factor) * 60.0
}

/// Seconds left until `burn_limit_dose` is reached at a constant `uv_index`.
///
/// May return zero or a negative value when the budget is already spent.
pub fn remaining_seconds_for(burn_limit_dose: f64, accumulated_dose: f64, uv_index: f64) -> i64 {
    if uv_index.is_nan() || uv_index <= 0.0 {
        return MAX_REMAINING_SECONDS;
    }

    let seconds = ((burn_limit_dose - accumulated_dose) / uv_index).ceil();
    if seconds >= MAX_REMAINING_SECONDS as f64 {
        MAX_REMAINING_SECONDS
    } else {
        seconds as i64
    }
}

/// Protection factors below 1 (or garbage) mean no protection.
fn effective_protection(protection_factor: f64) -> f64 {
    if protection_factor.is_finite() && protection_factor > 1.0 {
        protection_factor
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type3_at_uv6_without_protection() {
        assert_eq!(seconds_to_burn(SkinClass::Type3, 6.0, 1.0), 300);
    }

    #[test]
    fn test_protection_factor_multiplies() {
        // 10 min / 5 * 15 = 30 min
        assert_eq!(seconds_to_burn(SkinClass::Type1, 5.0, 15.0), 1800);
    }

    #[test]
    fn test_zero_uv_returns_cap() {
        for class in SkinClass::ALL {
            assert_eq!(seconds_to_burn(class, 0.0, 1.0), MAX_REMAINING_SECONDS);
            assert_eq!(seconds_to_burn(class, -2.0, 30.0), MAX_REMAINING_SECONDS);
        }
        assert_eq!(
            seconds_to_burn(SkinClass::Type1, f64::NAN, 1.0),
            MAX_REMAINING_SECONDS
        );
    }

    #[test]
    fn test_tiny_uv_is_capped() {
        assert_eq!(
            seconds_to_burn(SkinClass::Type6, 0.0001, 50.0),
            MAX_REMAINING_SECONDS
        );
    }

    #[test]
    fn test_rounds_to_nearest_second() {
        // 10 / 7 * 60 = 85.714...
        assert_eq!(seconds_to_burn(SkinClass::Type1, 7.0, 1.0), 86);
    }

    #[test]
    fn test_non_positive_protection_treated_as_none() {
        assert_eq!(
            seconds_to_burn(SkinClass::Type3, 6.0, 0.0),
            seconds_to_burn(SkinClass::Type3, 6.0, 1.0)
        );
        assert_eq!(
            seconds_to_burn(SkinClass::Type3, 6.0, -5.0),
            seconds_to_burn(SkinClass::Type3, 6.0, 1.0)
        );
        assert_eq!(dose_budget(SkinClass::Type2, 0.5), 1200.0);
    }

    #[test]
    fn test_dose_budget_matches_burn_time_at_uv1() {
        assert_eq!(dose_budget(SkinClass::Type3, 1.0), 1800.0);
        assert_eq!(
            dose_budget(SkinClass::Type3, 1.0) as i64,
            seconds_to_burn(SkinClass::Type3, 1.0, 1.0)
        );
        // Not capped, unlike the countdown
        assert_eq!(dose_budget(SkinClass::Type6, 30.0), 162_000.0);
    }

    #[test]
    fn test_remaining_seconds_rounds_up() {
        assert_eq!(remaining_seconds_for(1800.0, 900.0, 6.0), 150);
        assert_eq!(remaining_seconds_for(1800.0, 900.0, 7.0), 129);
        assert_eq!(remaining_seconds_for(1800.0, 1800.0, 6.0), 0);
        assert!(remaining_seconds_for(1800.0, 1900.0, 6.0) < 0);
    }

    #[test]
    fn test_remaining_seconds_caps() {
        assert_eq!(remaining_seconds_for(1800.0, 0.0, 0.0), MAX_REMAINING_SECONDS);
        assert_eq!(
            remaining_seconds_for(1800.0, 0.0, 0.001),
            MAX_REMAINING_SECONDS
        );
    }
}
