// =============================================================================
// Weighted and Simple Moving Averages
// =============================================================================
//
// WMA weights the `period` most recent samples linearly: the newest sample
// gets weight `period`, the oldest in the window weight 1.
//
//   WMA[i] = Σ_{j=0}^{period-1} price[i+j] * (period - j) / (period*(period+1)/2)
//
// WMA is the building block of every other indicator in this module (CCI,
// RSI averages, MACD, Bollinger and Envelope middle bands).
// =============================================================================

use super::forward_fill;

/// Weighted moving average over a newest-first `price` series.
pub fn calculate_wma(price: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || price.len() < period {
        return Vec::new();
    }

    let denominator = (period * (period + 1) / 2) as f64;
    let last_full = price.len() - period;
    let mut wma = vec![0.0; price.len()];

    for (i, slot) in wma.iter_mut().enumerate().take(last_full + 1) {
        let weighted: f64 = price[i..i + period]
            .iter()
            .enumerate()
            .map(|(j, p)| p * (period - j) as f64)
            .sum();
        *slot = weighted / denominator;
    }

    forward_fill(&mut wma, last_full);
    wma
}

/// Simple moving average over a newest-first `price` series.
pub fn calculate_sma(price: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || price.len() < period {
        return Vec::new();
    }

    let inv_period = 1.0 / period as f64;
    let last_full = price.len() - period;
    let mut sma = vec![0.0; price.len()];

    for (i, slot) in sma.iter_mut().enumerate().take(last_full + 1) {
        *slot = price[i..i + period].iter().sum::<f64>() * inv_period;
    }

    forward_fill(&mut sma, last_full);
    sma
}
