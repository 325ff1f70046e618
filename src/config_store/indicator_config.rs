// =============================================================================
// Indicator configuration — per-symbol periods and deviations
// =============================================================================
//
// Periods are in hours and are converted to candle counts at recompute time.
// The struct is an immutable value: updates replace it whole. Every field
// carries a default so that documents written before a field existed still
// deserialise.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    // ── CCI ─────────────────────────────────────────────────────────────
    pub cci_period1: u32,
    pub cci_period2: u32,
    pub cci_period3: u32,

    // ── MACD ────────────────────────────────────────────────────────────
    pub macd_fast1: u32,
    pub macd_slow1: u32,
    pub macd_signal1: u32,
    pub macd_fast2: u32,
    pub macd_slow2: u32,
    pub macd_signal2: u32,
    /// Display scaling constants, stored and served but not used by the math.
    pub macd_n1: f64,
    pub macd_n2: f64,

    // ── RSI ─────────────────────────────────────────────────────────────
    pub rsi_period1: u32,
    pub rsi_period2: u32,

    // ── Bands ───────────────────────────────────────────────────────────
    pub boll_period: u32,
    pub boll_deviation: f64,
    pub env_period: u32,
    /// Envelope half-width in percent.
    pub env_deviation: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            cci_period1: 48,
            cci_period2: 72,
            cci_period3: 168,
            macd_fast1: 48,
            macd_slow1: 72,
            macd_signal1: 2,
            macd_fast2: 72,
            macd_slow2: 168,
            macd_signal2: 2,
            macd_n1: 2000.0,
            macd_n2: 1000.0,
            rsi_period1: 48,
            rsi_period2: 72,
            boll_period: 24,
            boll_deviation: 2.0,
            env_period: 24,
            env_deviation: 2.28,
        }
    }
}

impl IndicatorConfig {
    pub fn cci_periods(&self) -> [u32; 3] {
        [self.cci_period1, self.cci_period2, self.cci_period3]
    }

    pub fn rsi_periods(&self) -> [u32; 2] {
        [self.rsi_period1, self.rsi_period2]
    }

    /// `(fast, slow, signal)` for both MACD lines.
    pub fn macd_triples(&self) -> [(u32, u32, u32); 2] {
        [
            (self.macd_fast1, self.macd_slow1, self.macd_signal1),
            (self.macd_fast2, self.macd_slow2, self.macd_signal2),
        ]
    }

    /// Every period must be positive and every deviation positive and finite.
    pub fn validate(&self) -> EngineResult<()> {
        let periods = [
            ("cci_period1", self.cci_period1),
            ("cci_period2", self.cci_period2),
            ("cci_period3", self.cci_period3),
            ("macd_fast1", self.macd_fast1),
            ("macd_slow1", self.macd_slow1),
            ("macd_signal1", self.macd_signal1),
            ("macd_fast2", self.macd_fast2),
            ("macd_slow2", self.macd_slow2),
            ("macd_signal2", self.macd_signal2),
            ("rsi_period1", self.rsi_period1),
            ("rsi_period2", self.rsi_period2),
            ("boll_period", self.boll_period),
            ("env_period", self.env_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(EngineError::ConfigValidation(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        for (name, value) in [
            ("boll_deviation", self.boll_deviation),
            ("env_deviation", self.env_deviation),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::ConfigValidation(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        Ok(())
    }
}
