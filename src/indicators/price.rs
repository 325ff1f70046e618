/// Composite price `(high + low + close) / 3` per sample.
///
/// Mismatched input lengths yield an empty series.
pub fn composite_price(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    if high.len() != low.len() || high.len() != close.len() {
        return Vec::new();
    }

    high.iter()
        .zip(low)
        .zip(close)
        .map(|((h, l), c)| (h + l + c) / 3.0)
        .collect()
}
