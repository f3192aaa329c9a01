//! Per-sample consistency checks.
//!
//! Each check is independent and returns `NotApplicable` when the inputs it
//! needs are missing.

use super::Check;
use crate::types::{InstrumentType, ScaleHint};
use crate::units::UnitTable;

// Float slack for comparisons on values that were decimal in the dataset.
const EPSILON: f64 = 1e-9;

/// Predicted and ground-truth units are the same unit after normalization.
pub fn unit_consistent(units: &UnitTable, predicted: &str, expected: &str) -> Check {
    Check::from_bool(units.same_unit(predicted, expected))
}

/// Value lies within `[min, max]` of the scale, inclusive.
pub fn in_range(value: f64, hint: Option<&ScaleHint>) -> Check {
    match hint.map(|h| (h.min, h.max)) {
        Some((Some(min), Some(max))) => {
            Check::from_bool(value >= min - EPSILON && value <= max + EPSILON)
        }
        _ => Check::NotApplicable,
    }
}

/// Value sits within `tolerance * minor_tick` of a graduation.
///
/// Graduations are at `min + k * minor_tick`, with `min` defaulting to 0.
/// Digital instruments have no graduations.
pub fn tick_aligned(
    value: f64,
    instrument: &InstrumentType,
    hint: Option<&ScaleHint>,
    tolerance: f64,
) -> Check {
    if !instrument.is_analog() {
        return Check::NotApplicable;
    }
    let Some(hint) = hint else {
        return Check::NotApplicable;
    };
    let Some(tick) = hint.minor_tick.filter(|t| *t > 0.0) else {
        return Check::NotApplicable;
    };

    let origin = hint.min.unwrap_or(0.0);
    let steps = (value - origin) / tick;
    let distance = (steps - steps.round()).abs() * tick;
    Check::from_bool(distance <= tolerance * tick + EPSILON)
}

/// Value lies within the ground truth's acceptance interval.
pub fn value_correct(value: f64, interval: Option<[f64; 2]>) -> Check {
    match interval {
        Some([lo, hi]) => Check::from_bool(value >= lo - EPSILON && value <= hi + EPSILON),
        None => Check::NotApplicable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(min: Option<f64>, max: Option<f64>, minor: Option<f64>) -> ScaleHint {
        ScaleHint {
            min,
            max,
            minor_tick: minor,
            ..ScaleHint::default()
        }
    }

    #[test]
    fn test_unit_consistent() {
        let units = UnitTable::default();
        assert_eq!(unit_consistent(&units, "PSI", "psi"), Check::Pass);
        assert_eq!(unit_consistent(&units, "bar", "psi"), Check::Fail);
        assert_eq!(unit_consistent(&units, "", "psi"), Check::Fail);
    }

    #[test]
    fn test_in_range_inclusive() {
        let h = hint(Some(0.0), Some(100.0), None);
        assert_eq!(in_range(0.0, Some(&h)), Check::Pass);
        assert_eq!(in_range(100.0, Some(&h)), Check::Pass);
        assert_eq!(in_range(100.5, Some(&h)), Check::Fail);
        assert_eq!(in_range(-1.0, Some(&h)), Check::Fail);
    }

    #[test]
    fn test_in_range_needs_both_bounds() {
        assert_eq!(in_range(5.0, None), Check::NotApplicable);
        let h = hint(Some(0.0), None, None);
        assert_eq!(in_range(5.0, Some(&h)), Check::NotApplicable);
    }

    #[test]
    fn test_tick_aligned_default_tolerance_accepts_any_value() {
        let h = hint(Some(0.0), Some(100.0), Some(5.0));
        let gauge = InstrumentType::PressureGauge;
        // Half a tick is the furthest any value can be from a graduation
        assert_eq!(tick_aligned(49.5, &gauge, Some(&h), 0.5), Check::Pass);
        assert_eq!(tick_aligned(47.5, &gauge, Some(&h), 0.5), Check::Pass);
    }

    #[test]
    fn test_tick_aligned_tight_tolerance_discriminates() {
        let h = hint(Some(0.0), Some(100.0), Some(5.0));
        let gauge = InstrumentType::PressureGauge;
        assert_eq!(tick_aligned(50.0, &gauge, Some(&h), 0.05), Check::Pass);
        assert_eq!(tick_aligned(50.2, &gauge, Some(&h), 0.05), Check::Pass);
        assert_eq!(tick_aligned(49.5, &gauge, Some(&h), 0.05), Check::Fail);
    }

    #[test]
    fn test_tick_aligned_uses_scale_origin() {
        // Thermometer graduated every 2 degrees starting at -5
        let h = hint(Some(-5.0), Some(45.0), Some(2.0));
        let thermometer = InstrumentType::Thermometer;
        assert_eq!(tick_aligned(-1.0, &thermometer, Some(&h), 0.1), Check::Pass);
        assert_eq!(tick_aligned(0.0, &thermometer, Some(&h), 0.1), Check::Fail);
    }

    #[test]
    fn test_tick_aligned_not_applicable() {
        let h = hint(Some(0.0), Some(10.0), Some(1.0));
        assert_eq!(
            tick_aligned(3.0, &InstrumentType::DigitalDisplay, Some(&h), 0.5),
            Check::NotApplicable
        );
        assert_eq!(
            tick_aligned(3.0, &InstrumentType::Voltmeter, None, 0.5),
            Check::NotApplicable
        );
        let no_tick = hint(Some(0.0), Some(10.0), None);
        assert_eq!(
            tick_aligned(3.0, &InstrumentType::Voltmeter, Some(&no_tick), 0.5),
            Check::NotApplicable
        );
    }

    #[test]
    fn test_value_correct() {
        assert_eq!(value_correct(4.4, Some([4.3, 4.5])), Check::Pass);
        assert_eq!(value_correct(4.3, Some([4.3, 4.5])), Check::Pass);
        assert_eq!(value_correct(4.6, Some([4.3, 4.5])), Check::Fail);
        assert_eq!(value_correct(4.4, None), Check::NotApplicable);
    }
}
