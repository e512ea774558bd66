use biquad::{Coefficients, ToHertz, Type};

use crate::audio::config;
use crate::audio::errors::GraphError;

// --- Filter Calculation Helpers ---

/// Low-shelf coefficients for the tone stage. `gain_db` is 0.0 for the flat
/// (boosted) state and the configured cut otherwise.
pub(crate) fn calculate_tone_shelf(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, GraphError> {
    Coefficients::<f32>::from_params(
        Type::LowShelf(gain_db),
        sample_rate.hz(),
        config::TONE_SHELF_HZ.hz(),
        config::SHELF_Q_FACTOR,
    )
    .map_err(|e| GraphError::CoefficientCalculationError {
        filter_type: format!("ToneShelf: {:?}", e),
    })
}

pub(crate) fn tone_gain_db(tone_boost: bool, cut_db: f32) -> f32 {
    if tone_boost { 0.0 } else { cut_db }
}

// --- Crossfade Law ---

/// Linear crossfade: `(1 - p) / 2` for deck A, `(1 + p) / 2` for deck B.
///
/// Positions outside [-1, 1] are clamped. The two gains always sum to 1,
/// so the midpoint sits 6 dB below either end rather than the 3 dB of an
/// equal-power curve.
pub fn linear_crossfade_gains(position: f32) -> (f32, f32) {
    let p = if position.is_finite() {
        position.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    ((1.0 - p) / 2.0, (1.0 + p) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biquad::{Biquad, DirectForm1};

    #[test]
    fn crossfade_endpoints_and_midpoint() {
        assert_eq!(linear_crossfade_gains(-1.0), (1.0, 0.0));
        assert_eq!(linear_crossfade_gains(1.0), (0.0, 1.0));
        assert_eq!(linear_crossfade_gains(0.0), (0.5, 0.5));
        assert_eq!(linear_crossfade_gains(0.5), (0.25, 0.75));
    }

    #[test]
    fn crossfade_gains_sum_to_one() {
        for step in 0..=200 {
            let p = -1.0 + step as f32 * 0.01;
            let (a, b) = linear_crossfade_gains(p);
            assert!((a + b - 1.0).abs() < 1e-6, "position {}", p);
            assert!((0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b));
        }
    }

    #[test]
    fn crossfade_clamps_out_of_range() {
        assert_eq!(linear_crossfade_gains(3.0), (0.0, 1.0));
        assert_eq!(linear_crossfade_gains(f32::NAN), (0.5, 0.5));
    }

    #[test]
    fn cut_shelf_attenuates_bass_and_flat_shelf_does_not() {
        let sr = 44100.0;
        let bass: Vec<f32> = (0..8820)
            .map(|i| (2.0 * std::f32::consts::PI * 40.0 * i as f32 / sr).sin())
            .collect();

        let peak_after = |gain_db: f32| {
            let coeffs = calculate_tone_shelf(sr, gain_db).unwrap();
            let mut filter = DirectForm1::<f32>::new(coeffs);
            bass.iter()
                .map(|s| filter.run(*s))
                .skip(4410)
                .fold(0.0f32, |m, s| m.max(s.abs()))
        };

        let flat = peak_after(tone_gain_db(true, config::TONE_CUT_DB));
        let cut = peak_after(tone_gain_db(false, config::TONE_CUT_DB));
        assert!((flat - 1.0).abs() < 0.05, "flat peak {}", flat);
        assert!(cut < 0.1, "cut peak {}", cut);
    }
}
