// =============================================================================
// Period Scaler — hour-denominated periods → candle counts
// =============================================================================
//
// Indicator periods are configured in hours. A 48-hour CCI on 15m candles is
// computed over 192 samples, on 4h candles over 12.
// =============================================================================

use crate::error::{EngineError, EngineResult};

/// A candle interval such as `15m`, `1h` or `1M`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub value: u32,
    pub unit: char,
}

impl Interval {
    /// Parse `<integer><unit>` with unit in `s m h d w M y`.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let invalid = || EngineError::InvalidInterval(raw.to_string());

        let unit = raw.chars().last().ok_or_else(invalid)?;
        if !matches!(unit, 's' | 'm' | 'h' | 'd' | 'w' | 'M' | 'y') {
            return Err(invalid());
        }

        let digits = &raw[..raw.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u32 = digits.parse().map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }

        Ok(Self { value, unit })
    }

    /// Length of one candle in minutes. Second-based intervals yield fractions.
    pub fn minutes(&self) -> f64 {
        let v = self.value as f64;
        match self.unit {
            's' => v / 60.0,
            'm' => v,
            'h' => v * 60.0,
            'd' => v * 1_440.0,
            'w' => v * 7.0 * 1_440.0,
            'M' => v * 30.0 * 1_440.0,
            // 'y': parse() admits nothing else.
            _ => v * 365.0 * 1_440.0,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

/// Convert an hour-denominated `period` into a sample count for `interval`.
///
/// `max(1, round(period * 60 / interval_minutes))`
pub fn scale_period(period: u32, interval: &Interval) -> usize {
    let scaled = (period as f64 * 60.0 / interval.minutes()).round();
    if scaled < 1.0 {
        1
    } else {
        scaled as usize
    }
}

/// Number of candles needed to cover `days` calendar days, with a 10 % margin
/// against boundary rounding.
///
/// `max(1, ceil(days * 1440 / interval_minutes * 1.1))`
pub fn candles_for_days(days: u32, interval: &Interval) -> usize {
    let needed = (days as f64 * 1_440.0 / interval.minutes() * 1.1).ceil();
    if needed < 1.0 {
        1
    } else {
        needed as usize
    }
}
