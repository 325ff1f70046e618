// =============================================================================
// Commodity Channel Index (CCI)
// =============================================================================
//
//   CCI[i] = (price[i] - WMA[i]) / (0.015 * MAD[i])
//
// The moving average is a WMA, and MAD[i] is the mean absolute deviation of
// the window price[i..i+period] around WMA[i] (not around the window mean).
// A zero MAD yields CCI 0.
// =============================================================================

use super::{calculate_wma, forward_fill};

const CCI_CONSTANT: f64 = 0.015;

/// CCI over a newest-first `price` series.
pub fn calculate_cci(price: &[f64], period: usize) -> Vec<f64> {
    let wma = calculate_wma(price, period);
    if wma.is_empty() {
        return Vec::new();
    }

    let inv_period = 1.0 / period as f64;
    let last_full = price.len() - period;
    let mut cci = vec![0.0; price.len()];

    for i in 0..=last_full {
        let ma = wma[i];
        let mad = price[i..i + period]
            .iter()
            .map(|p| (p - ma).abs())
            .sum::<f64>()
            * inv_period;

        cci[i] = if mad == 0.0 {
            0.0
        } else {
            (price[i] - ma) / (CCI_CONSTANT * mad)
        };
    }

    forward_fill(&mut cci, last_full);
    cci
}
