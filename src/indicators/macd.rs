// =============================================================================
// MACD — WMA-based, with a lagged two-sample line
// =============================================================================
//
//   diff[i]      = WMA(price, fast)[i] - WMA(price, slow)[i]
//   line[i]      = (diff[i+1] + diff[i+2]) / 2
//   signal       = WMA(line, signal_period)
//   histogram[i] = diff[i]
//
// The line is the mean of the two *previous* diff values, so the histogram
// (current diff) leads it by one sample. Near the oldest end, where i+1 or
// i+2 is out of range, the line falls back to diff[i+1] and then diff[i].
// =============================================================================

use serde::Serialize;

use super::{calculate_wma, forward_fill};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MacdSeries {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

impl MacdSeries {
    pub fn is_empty(&self) -> bool {
        self.macd_line.is_empty()
    }
}

/// MACD over a newest-first `price` series.
///
/// Empty when any period is zero or the input is shorter than the longest.
pub fn calculate_macd(price: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    if fast == 0 || slow == 0 || signal == 0 {
        return MacdSeries::default();
    }
    let longest = fast.max(slow).max(signal);
    if price.len() < longest {
        return MacdSeries::default();
    }

    let fast_wma = calculate_wma(price, fast);
    let slow_wma = calculate_wma(price, slow);

    let len = price.len();
    let last_full = len - fast.max(slow);
    let mut diff = vec![0.0; len];
    for i in 0..=last_full {
        diff[i] = fast_wma[i] - slow_wma[i];
    }
    forward_fill(&mut diff, last_full);

    let macd_line: Vec<f64> = (0..len)
        .map(|i| match (diff.get(i + 1), diff.get(i + 2)) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            (Some(a), None) => *a,
            _ => diff[i],
        })
        .collect();

    let signal_line = calculate_wma(&macd_line, signal);

    MacdSeries {
        macd_line,
        signal_line,
        histogram: diff,
    }
}
