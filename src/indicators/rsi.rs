// =============================================================================
// Relative Strength Index (RSI) — WMA-averaged gains and losses
// =============================================================================
//
// Step 1: change[i] = price[i] - price[i+1] (newer minus older). The oldest
//          sample has no predecessor and contributes a zero gain and loss.
// Step 2: gains = max(change, 0), losses = max(-change, 0).
// Step 3: avg_gain = WMA(gains, period), avg_loss = WMA(losses, period).
// Step 4: RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS).
//
// A window without losses returns exactly 100. Capping RS at 100 instead
// would give 100 - 100/101 (about 99.01); the all-gain test pins the exact
// value, so do not switch to the capped form.
// =============================================================================

use super::{calculate_wma, forward_fill};

/// RSI over a newest-first `price` series. Needs `period + 1` samples.
pub fn calculate_rsi(price: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || price.len() < period + 1 {
        return Vec::new();
    }

    let len = price.len();
    let mut gains = vec![0.0; len];
    let mut losses = vec![0.0; len];

    for i in 0..len - 1 {
        let change = price[i] - price[i + 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    let avg_gain = calculate_wma(&gains, period);
    let avg_loss = calculate_wma(&losses, period);

    let last_full = len - period;
    let mut rsi = vec![0.0; len];
    for i in 0..=last_full {
        rsi[i] = rsi_from_averages(avg_gain[i], avg_loss[i]);
    }

    forward_fill(&mut rsi, last_full);
    rsi
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
