// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math over **newest-first** series: index 0
// is the most recent sample. Every windowed function returns a vector as long
// as its input. Indices whose window would run past the oldest sample
// (i > len - period) repeat the value at the last fully covered index.
// Inputs shorter than the period produce an empty vector.

pub mod bollinger;
pub mod cci;
pub mod envelope;
pub mod macd;
pub mod moving_average;
pub mod price;
pub mod rsi;
pub mod volatility;
pub mod zone;

pub use bollinger::calculate_bollinger;
pub use cci::calculate_cci;
pub use envelope::calculate_envelope;
pub use macd::{calculate_macd, MacdSeries};
pub use moving_average::{calculate_sma, calculate_wma};
pub use price::composite_price;
pub use rsi::calculate_rsi;
pub use volatility::volatility_5day;
pub use zone::{classify_zone, latest_zone};

use serde::Serialize;

/// Upper / middle / lower band series, newest-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl Bands {
    pub fn is_empty(&self) -> bool {
        self.middle.is_empty()
    }
}

/// Copy `series[last_valid]` into every older index.
pub(crate) fn forward_fill(series: &mut [f64], last_valid: usize) {
    if last_valid + 1 >= series.len() {
        return;
    }
    let value = series[last_valid];
    for v in &mut series[last_valid + 1..] {
        *v = value;
    }
}
