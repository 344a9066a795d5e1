//! Band and spread resolution
//!
//! Maps the current ATR% to a volatility band, picks the base spread for
//! that band, and applies the RSI adjustment. Deterministic and
//! side-effect free; the planner calls this once per bar.

use crate::{Band, Policy};

/// Spread bounds after RSI adjustment
const MIN_SPREAD_PCT: f64 = 0.1;
const MAX_SPREAD_PCT: f64 = 2.0;

/// Resolved band and spreads for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadResolution {
    pub band: Band,
    pub spread_pct: f64,
    pub tp_spread_pct: f64,
}

/// Resolve band and spread from ATR% and RSI.
///
/// With dynamic spread disabled the band pins to `mid` and the fixed spread
/// applies unchanged; the TP spread still follows the pinned band.
pub fn resolve(policy: &Policy, atr_pct: f64, rsi: f64) -> SpreadResolution {
    if !policy.use_dynamic_spread {
        return SpreadResolution {
            band: Band::Mid,
            spread_pct: policy.fixed_spread_pct,
            tp_spread_pct: tp_spread_for_band(policy, Band::Mid),
        };
    }

    let (band, base_spread) = if atr_pct < policy.band_near_threshold {
        (Band::Near, policy.spread_near_pct)
    } else if atr_pct < policy.band_mid_threshold {
        (Band::Mid, policy.spread_mid_pct)
    } else {
        (Band::Far, policy.spread_far_pct)
    };

    let spread_pct = if policy.rsi_adjust_enabled {
        // Oversold tightens the ladder, overbought widens it
        let factor = if rsi < 30.0 {
            1.0 - policy.rsi_adjust_factor
        } else if rsi > 70.0 {
            1.0 + policy.rsi_adjust_factor
        } else {
            1.0
        };
        (base_spread * factor).clamp(MIN_SPREAD_PCT, MAX_SPREAD_PCT)
    } else {
        base_spread.clamp(MIN_SPREAD_PCT, MAX_SPREAD_PCT)
    };

    SpreadResolution {
        band,
        spread_pct,
        tp_spread_pct: tp_spread_for_band(policy, band),
    }
}

/// TP spread configured for a band
pub fn tp_spread_for_band(policy: &Policy, band: Band) -> f64 {
    match band {
        Band::Near => policy.tp_spread_near_pct,
        Band::Mid => policy.tp_spread_mid_pct,
        Band::Far => policy.tp_spread_far_pct,
    }
}
