// =============================================================================
// Moving Average Envelope
// =============================================================================
//
// Fixed-percentage bands around a WMA:
//
//   upper[i] = WMA[i] * (1 + pct / 100)
//   lower[i] = WMA[i] * (1 - pct / 100)

use super::{calculate_wma, Bands};

/// Envelope bands over a newest-first `price` series. `pct` is a percentage
/// (2.28 means ±2.28 %).
pub fn calculate_envelope(price: &[f64], period: usize, pct: f64) -> Bands {
    let middle = calculate_wma(price, period);
    if middle.is_empty() {
        return Bands::default();
    }

    let up = 1.0 + pct / 100.0;
    let down = 1.0 - pct / 100.0;

    Bands {
        upper: middle.iter().map(|m| m * up).collect(),
        lower: middle.iter().map(|m| m * down).collect(),
        middle,
    }
}
