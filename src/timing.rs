//! Period-derivative and epoch corrections applied before folding.
//!
//! A period measured by an acceleration search refers to the detection epoch; folding
//! coherently needs it referred to the middle of the span the backend folds.

pub const LIGHT_SPEED: f64 = 2.997_924_58e8; // m/s

/// `Pdot = P * a / c`.
pub fn acceleration_to_period_derivative(period_s: f64, acc_ms2: f64) -> f64 {
    period_s * acc_ms2 / LIGHT_SPEED
}

pub fn period_derivatives(periods: &[f64], accs: &[f64]) -> Vec<f64> {
    periods
        .iter()
        .zip(accs)
        .map(|(&p, &a)| acceleration_to_period_derivative(p, a))
        .collect()
}

/// Reference `p0` to the midpoint of the full FFT length (prepfold convention).
pub fn correct_period_for_drift_prepfold(p0: f64, pdot: f64, tsamp: f64, fft_size: u64) -> f64 {
    p0 - pdot * fft_size as f64 * tsamp / 2.0
}

/// PulsarX convention: the offset is the part of the FFT not covered by the samples.
/// Not interchangeable with the prepfold variant.
pub fn correct_period_for_drift_pulsarx(
    p0: f64,
    pdot: f64,
    n_samples: u64,
    tsamp: f64,
    fft_size: u64,
) -> f64 {
    p0 - pdot * (fft_size as f64 - n_samples as f64) * tsamp / 2.0
}
