// =============================================================================
// Bollinger Bands
// =============================================================================
//
// The middle band is a WMA. The band half-width is `num_std` population
// standard deviations of the window, where the deviation is measured around
// the plain window mean (SMA), not around the WMA:
//
//   upper[i]  = WMA[i] + num_std * σ[i]
//   lower[i]  = WMA[i] - num_std * σ[i]
//   σ[i]      = sqrt(Σ (price[i+j] - SMA[i])² / period)

use super::{calculate_sma, calculate_wma, forward_fill, Bands};

/// Bollinger Bands over a newest-first `price` series.
///
/// Returns empty bands when `period` is zero or exceeds the input length.
pub fn calculate_bollinger(price: &[f64], period: usize, num_std: f64) -> Bands {
    let middle = calculate_wma(price, period);
    if middle.is_empty() {
        return Bands::default();
    }
    let mean = calculate_sma(price, period);

    let len = price.len();
    let last_full = len - period;
    let mut upper = vec![0.0; len];
    let mut lower = vec![0.0; len];

    for i in 0..=last_full {
        let variance = price[i..i + period]
            .iter()
            .map(|p| (p - mean[i]).powi(2))
            .sum::<f64>()
            / period as f64;
        let half_width = num_std * variance.sqrt();

        upper[i] = middle[i] + half_width;
        lower[i] = middle[i] - half_width;
    }

    forward_fill(&mut upper, last_full);
    forward_fill(&mut lower, last_full);

    Bands {
        upper,
        middle,
        lower,
    }
}
